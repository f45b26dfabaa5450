// SPDX-License-Identifier: AGPL-3.0-only

//! Copying bytes from one [`Source`] to any number of [`Sink`]s, in lock
//! step, with EOF tracking across repeated calls.

use {
    crate::{error::PumpError, io::{Sink, Source}},
    std::os::unix::io::RawFd,
};

const BUFFER_SIZE: usize = 1024;

/// Pump `n` bytes, or until EOF if `n` is negative, to mean "no limit" —
/// the spec's `-1` sentinel.
pub const UNTIL_EOF: i64 = -1;

/// Reads from one [`Source`] and tees every chunk, in order, to a fixed set
/// of sink file descriptors.
///
/// Sinks are snapshotted as bare file descriptors, not owned: closing them
/// remains the caller's responsibility. EOF is sticky across calls to
/// [`IoPump::pump`] — once observed, later calls return `0` immediately.
pub struct IoPump<S>
{
    source: S,
    sinks:  Vec<RawFd>,
    eof:    bool,
}

impl<S: Source> IoPump<S>
{
    /// Open a pump over `source` with no sinks yet.
    pub fn new(source: S) -> Self
    {
        crate::process::ignore_sigpipe_once();
        Self{source, sinks: Vec::new(), eof: false}
    }

    /// Append a destination. Bytes are written to every added sink, in the
    /// order they were added.
    pub fn add_sink(&mut self, sink: &impl Sink)
    {
        self.sinks.push(sink.sink_fd());
    }

    /// Whether the source has already been observed to be at EOF.
    pub fn at_eof(&self) -> bool
    {
        self.eof
    }

    /// Copy up to `n` bytes (or, if `n` is negative, until EOF) from the
    /// source to every sink. Returns the number of bytes actually copied.
    ///
    /// Short reads continue the loop; short writes are retried until every
    /// byte reaches every sink. A non-positive write to any sink is fatal
    /// and carries that sink's file descriptor in the returned error.
    pub fn pump(&mut self, n: i64) -> Result<u64, PumpError>
    {
        if self.eof {
            return Ok(0);
        }

        let mut buf = [0u8; BUFFER_SIZE];
        let mut pumped: u64 = 0;

        loop {
            if n >= 0 && pumped == n as u64 {
                break;
            }
            let want = if n < 0 {
                BUFFER_SIZE
            } else {
                usize::try_from(n as u64 - pumped).unwrap_or(usize::MAX).min(BUFFER_SIZE)
            };

            let read = kryptocd_os::read(self.source.source_fd(), &mut buf[.. want])
                .map_err(PumpError::ReadFailed)?;
            if read == 0 {
                self.eof = true;
                break;
            }

            for &sink_fd in &self.sinks {
                write_all(sink_fd, &buf[.. read])?;
            }
            pumped += read as u64;
        }

        Ok(pumped)
    }
}

fn write_all(fd: RawFd, mut bytes: &[u8]) -> Result<(), PumpError>
{
    while !bytes.is_empty() {
        let written = kryptocd_os::write(fd, bytes)
            .map_err(|source| PumpError::SinkNotWritable{fd, source: Some(source)})?;
        if written == 0 {
            return Err(PumpError::SinkNotWritable{fd, source: None});
        }
        bytes = &bytes[written ..];
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::io::Pipe};

    #[test]
    fn pumps_exact_count_and_stops()
    {
        let mut source = Pipe::new().unwrap();
        let mut sink = Pipe::new().unwrap();
        kryptocd_os::write(source.sink_fd(), b"hello world").unwrap();

        let mut pump = IoPump::new(PipeSource(source.source_fd()));
        pump.add_sink(&sink);
        let n = pump.pump(5).unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 5];
        assert_eq!(kryptocd_os::read(sink.source_fd(), &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        sink.close_sink().unwrap();
        source.close_source().unwrap();
    }

    #[test]
    fn eof_is_sticky_across_calls()
    {
        let mut source = Pipe::new().unwrap();
        kryptocd_os::write(source.sink_fd(), b"hi").unwrap();
        source.close_sink().unwrap();

        let mut pump = IoPump::new(PipeSource(source.source_fd()));
        let n = pump.pump(UNTIL_EOF).unwrap();
        assert_eq!(n, 2);
        assert!(pump.at_eof());
        assert_eq!(pump.pump(UNTIL_EOF).unwrap(), 0);
    }

    /// A borrow-only [`Source`] view over a raw fd, used so the tests can
    /// keep the real [`Pipe`] around to write into after handing its
    /// reading half to an `IoPump`.
    struct PipeSource(RawFd);

    impl Source for PipeSource
    {
        fn close_source(&mut self) -> std::io::Result<()>
        {
            Ok(())
        }

        fn source_fd(&self) -> RawFd
        {
            self.0
        }

        fn set_close_source_on_exec(&self, _value: bool) -> std::io::Result<()>
        {
            Ok(())
        }

        fn is_source_open(&self) -> bool
        {
            true
        }
    }
}
