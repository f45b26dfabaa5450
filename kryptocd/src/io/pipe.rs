// SPDX-License-Identifier: AGPL-3.0-only

use {
    super::{Sink, Source},
    crate::error::PipeError,
    std::os::unix::io::{AsRawFd, OwnedFd, RawFd},
};

/// A pair of [`Source`]/[`Sink`] endpoints backed by a single OS anonymous
/// pipe (`pipe(2)`).
///
/// The two halves have independent lifetimes: closing one does not close
/// the other. Close-on-exec is set on both halves at construction, matching
/// the "closed in the child unless explicitly kept" default that
/// [`crate::process::Childprocess::spawn`] relies on.
pub struct Pipe
{
    source: Option<OwnedFd>,
    sink:   Option<OwnedFd>,
}

impl Pipe
{
    /// Create a new pipe.
    pub fn new() -> Result<Self, PipeError>
    {
        let [source, sink] = kryptocd_os::pipe2(0)?;
        Ok(Self{source: Some(source), sink: Some(sink)})
    }
}

impl Source for Pipe
{
    fn close_source(&mut self) -> std::io::Result<()>
    {
        self.source = None;
        Ok(())
    }

    fn source_fd(&self) -> RawFd
    {
        self.source.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn set_close_source_on_exec(&self, value: bool) -> std::io::Result<()>
    {
        kryptocd_os::set_cloexec(self.source_fd(), value)
    }

    fn is_source_open(&self) -> bool
    {
        self.source.is_some()
    }
}

impl Sink for Pipe
{
    fn close_sink(&mut self) -> std::io::Result<()>
    {
        self.sink = None;
        Ok(())
    }

    fn sink_fd(&self) -> RawFd
    {
        self.sink.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn set_close_sink_on_exec(&self, value: bool) -> std::io::Result<()>
    {
        kryptocd_os::set_cloexec(self.sink_fd(), value)
    }

    fn is_sink_open(&self) -> bool
    {
        self.sink.is_some()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn fresh_pipe_has_both_ends_open()
    {
        let pipe = Pipe::new().unwrap();
        assert!(pipe.is_source_open());
        assert!(pipe.is_sink_open());
        assert_ne!(pipe.source_fd(), -1);
        assert_ne!(pipe.sink_fd(), -1);
    }

    #[test]
    fn closing_one_half_does_not_close_the_other()
    {
        let mut pipe = Pipe::new().unwrap();
        pipe.close_sink().unwrap();
        assert!(!pipe.is_sink_open());
        assert_eq!(pipe.sink_fd(), -1);
        assert!(pipe.is_source_open());
        assert_ne!(pipe.source_fd(), -1);
    }

    #[test]
    fn closing_twice_is_idempotent()
    {
        let mut pipe = Pipe::new().unwrap();
        pipe.close_source().unwrap();
        pipe.close_source().unwrap();
        assert!(!pipe.is_source_open());
        assert_eq!(pipe.source_fd(), -1);
    }
}
