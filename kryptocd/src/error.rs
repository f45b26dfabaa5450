// SPDX-License-Identifier: AGPL-3.0-only

//! Error types.
//!
//! Every fallible subsystem gets its own enum, one variant per failure kind,
//! each carrying enough context to both match on programmatically and print
//! usefully. [`Error`] composes them with `#[from]` so a `?` chain through
//! several layers converts automatically.

use {
    std::{borrow::Cow, error, ffi::NulError, fmt, io, os::unix::io::RawFd},
};

/// An [`io::Error`] annotated with which operation produced it.
///
/// Several steps in this crate (spawning, opening files, allocating pipes)
/// fail with a bare [`io::Error`] that, on its own, tells the caller nothing
/// about which of several similar calls went wrong. This type pairs the
/// error with a short note naming the step, without allocating unless the
/// note itself is owned.
#[derive(Debug)]
pub struct ContextError
{
    /// Which error ultimately occurred.
    pub inner: io::Error,

    /// Which step the error comes from.
    pub context: Cow<'static, str>,
}

impl fmt::Display for ContextError
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}: {}", self.context, self.inner)
    }
}

impl error::Error for ContextError
{
    fn source(&self) -> Option<&(dyn error::Error + 'static)>
    {
        Some(&self.inner)
    }
}

/// Attach a [`ContextError`] note to an [`io::Result`].
pub trait ResultExt
{
    /// The success type of the result.
    type Ok;

    /// Attach `context` to the error, if any.
    fn context<C>(self, context: C) -> Result<Self::Ok, ContextError>
        where C: Into<Cow<'static, str>>;
}

impl<T> ResultExt for Result<T, io::Error>
{
    type Ok = T;

    fn context<C>(self, context: C) -> Result<T, ContextError>
        where C: Into<Cow<'static, str>>
    {
        self.map_err(|inner| ContextError{inner, context: context.into()})
    }
}

/// Could not spawn a child process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError
{
    /// `fork(2)` failed.
    #[error("fork: {0}")]
    Fork(#[source] io::Error),

    /// The executable path or an argument contained an interior NUL.
    #[error("argument contains an interior NUL: {0}")]
    InvalidArgument(#[from] NulError),
}

/// Could not allocate an OS pipe.
#[derive(Debug, thiserror::Error)]
#[error("pipe2: {0}")]
pub struct PipeError(#[from] pub io::Error);

/// A [`crate::io::FileSource`] or [`crate::io::FileSink`] could not open its path.
#[derive(Debug, thiserror::Error)]
#[error("open {path}: {source}")]
pub struct OpenError
{
    /// The path that could not be opened.
    pub path: String,

    /// The underlying error.
    #[source]
    pub source: io::Error,
}

/// [`crate::io_pump::IoPump`] failed while copying bytes.
#[derive(Debug, thiserror::Error)]
pub enum PumpError
{
    /// Reading from the source failed.
    #[error("read from source: {0}")]
    ReadFailed(#[source] io::Error),

    /// A sink rejected bytes.
    #[error("sink (fd {fd}) is not writable: {source:?}")]
    SinkNotWritable
    {
        /// The offending sink's file descriptor.
        fd: RawFd,

        /// The underlying error, if any (a non-positive `write` return
        /// without an accompanying `errno` is represented as `None`).
        #[source]
        source: Option<io::Error>,
    },
}

/// [`crate::diskspace::Diskspace`] construction-time validation failed.
#[derive(Debug, thiserror::Error)]
pub enum DiskspaceError
{
    /// `usable` was not a positive number of megabytes.
    #[error("no usable disk space configured")]
    NoSpaceAvailable,

    /// The diskspace root directory does not exist or is not writable.
    #[error("diskspace directory is not usable: {0}")]
    DirectoryError(#[source] io::Error),
}

/// `Image` construction-time or probing-time failure.
#[derive(Debug, thiserror::Error)]
pub enum ImageError
{
    /// The image id contains `/` or a NUL byte.
    #[error("bad image id: {0:?}")]
    BadImageId(String),

    /// The passphrase contains a newline.
    #[error("passphrase contains a newline")]
    BadPassphrase,

    /// The compression level is not in `1..=9`.
    #[error("bad compression level: {0}")]
    BadCompression(i32),

    /// The archive lister reported a name the validator should have
    /// rejected.
    #[error("archiver reported an unexpected filename: {0:?}")]
    BadFilename(String),

    /// The per-image budget formula produced a non-positive archive cap.
    #[error("capacity too small to hold even the index")]
    CapacityTooSmall,

    /// After validation and/or refining, no files are left to archive.
    #[error("archive would be empty")]
    ArchiveWouldBeEmpty,

    /// The per-image workspace directory could not be created.
    #[error("could not create image workspace: {0}")]
    UnableToCreateSubdirectory(#[source] io::Error),

    /// The encrypted index file could not be written.
    #[error("could not write image index: {0}")]
    InfoWriteFailed(#[source] io::Error),

    /// A lower-level failure propagated from spawning, piping, or pumping.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A lower-level failure propagated from spawning, piping, or pumping.
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// A lower-level failure propagated from spawning, piping, or pumping.
    #[error(transparent)]
    Pump(#[from] PumpError),

    /// A lower-level failure propagated from spawning, piping, or pumping.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// A lower-level failure propagated from the disk-space arbiter.
    #[error(transparent)]
    Diskspace(#[from] DiskspaceError),
}

/// Any error this crate can produce.
#[derive(Debug, thiserror::Error)]
pub enum Error
{
    /// See [`SpawnError`].
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// See [`PipeError`].
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// See [`OpenError`].
    #[error(transparent)]
    Open(#[from] OpenError),

    /// See [`PumpError`].
    #[error(transparent)]
    Pump(#[from] PumpError),

    /// See [`DiskspaceError`].
    #[error(transparent)]
    Diskspace(#[from] DiskspaceError),

    /// See [`ImageError`].
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl From<Error> for ImageError
{
    fn from(error: Error) -> Self
    {
        match error {
            Error::Spawn(e)     => ImageError::Spawn(e),
            Error::Pipe(e)      => ImageError::Pipe(e),
            Error::Open(e)      => ImageError::Open(e),
            Error::Pump(e)      => ImageError::Pump(e),
            Error::Diskspace(e) => ImageError::Diskspace(e),
            Error::Image(e)     => e,
        }
    }
}
