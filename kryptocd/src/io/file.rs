// SPDX-License-Identifier: AGPL-3.0-only

use {
    super::{Sink, Source},
    crate::error::OpenError,
    std::{
        os::unix::io::{AsRawFd, OwnedFd, RawFd},
        path::Path,
    },
};

/// A [`Source`] backed by a file opened for reading.
#[derive(Debug)]
pub struct FileSource(Option<OwnedFd>);

impl FileSource
{
    /// Open `path` for reading.
    pub fn open(path: &Path) -> Result<Self, OpenError>
    {
        let fd = kryptocd_os::open(
            path.to_str().unwrap_or_default(),
            kryptocd_os::O_RDONLY,
            0,
        ).map_err(|source| OpenError{path: path.display().to_string(), source})?;
        Ok(Self(Some(fd)))
    }
}

impl Source for FileSource
{
    fn close_source(&mut self) -> std::io::Result<()>
    {
        self.0 = None;
        Ok(())
    }

    fn source_fd(&self) -> RawFd
    {
        self.0.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn set_close_source_on_exec(&self, value: bool) -> std::io::Result<()>
    {
        kryptocd_os::set_cloexec(self.source_fd(), value)
    }

    fn is_source_open(&self) -> bool
    {
        self.0.is_some()
    }
}

/// A [`Sink`] backed by a file opened for writing.
pub struct FileSink(Option<OwnedFd>);

impl FileSink
{
    /// Create `path` exclusively (fails if it already exists) and open it
    /// for writing, with the given permission bits.
    ///
    /// This is the mode the image workspace uses for both the archive file
    /// and the encrypted index: a fresh file per image attempt, never
    /// overwriting an existing one.
    pub fn create_new(path: &Path, mode: u32) -> Result<Self, OpenError>
    {
        let fd = kryptocd_os::open(
            path.to_str().unwrap_or_default(),
            kryptocd_os::O_WRONLY | kryptocd_os::O_CREAT | kryptocd_os::O_EXCL,
            mode,
        ).map_err(|source| OpenError{path: path.display().to_string(), source})?;
        Ok(Self(Some(fd)))
    }
}

impl Sink for FileSink
{
    fn close_sink(&mut self) -> std::io::Result<()>
    {
        self.0 = None;
        Ok(())
    }

    fn sink_fd(&self) -> RawFd
    {
        self.0.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn set_close_sink_on_exec(&self, value: bool) -> std::io::Result<()>
    {
        kryptocd_os::set_cloexec(self.sink_fd(), value)
    }

    fn is_sink_open(&self) -> bool
    {
        self.0.is_some()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn create_new_refuses_to_overwrite()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive");
        let _first = FileSink::create_new(&path, 0o600).unwrap();
        let second = FileSink::create_new(&path, 0o600);
        assert!(second.is_err());
    }

    #[test]
    fn open_missing_file_fails_with_path_in_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let err = FileSource::open(&path).unwrap_err();
        assert_eq!(err.path, path.display().to_string());
    }
}
