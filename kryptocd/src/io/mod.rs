// SPDX-License-Identifier: AGPL-3.0-only

//! Byte-stream endpoints: the [`Source`]/[`Sink`] capability traits, the
//! [`Pipe`] that implements both, and the file-backed variants.

use std::os::unix::io::RawFd;

pub use self::{
    file::{FileSink, FileSource},
    pipe::Pipe,
};

mod file;
mod pipe;

/// A readable endpoint: an object carrying an OS file descriptor that data
/// can be read from, plus an open/closed flag.
///
/// Implementors never mutate the descriptor number except through `close`.
/// Once closed, [`Source::source_fd`] returns `-1` and [`Source::is_source_open`]
/// returns `false`; calling `close` again is a no-op that returns
/// successfully.
pub trait Source
{
    /// Close this source. Idempotent.
    fn close_source(&mut self) -> std::io::Result<()>;

    /// The underlying file descriptor, or `-1` if closed.
    ///
    /// Use this for `read` calls. Never close the returned descriptor
    /// directly — a later descriptor reusing the same number would then be
    /// closed unexpectedly by this object.
    fn source_fd(&self) -> RawFd;

    /// Set or clear this source's close-on-exec flag. Only valid while open.
    fn set_close_source_on_exec(&self, value: bool) -> std::io::Result<()>;

    /// Whether this source is currently open.
    fn is_source_open(&self) -> bool;
}

/// A writable endpoint, the dual of [`Source`].
pub trait Sink
{
    /// Close this sink. Idempotent.
    fn close_sink(&mut self) -> std::io::Result<()>;

    /// The underlying file descriptor, or `-1` if closed.
    ///
    /// Use this for `write` calls. Never close the returned descriptor
    /// directly.
    fn sink_fd(&self) -> RawFd;

    /// Set or clear this sink's close-on-exec flag. Only valid while open.
    fn set_close_sink_on_exec(&self, value: bool) -> std::io::Result<()>;

    /// Whether this sink is currently open.
    fn is_sink_open(&self) -> bool;
}
