// SPDX-License-Identifier: AGPL-3.0-only

//! Archiving and listing: a [`super::compressor`]-adjacent pair of
//! [`ChildFilter`]s, each paired with a [`Worker`] that feeds or drains the
//! archiver's NUL/newline-delimited name stream over an internal [`Pipe`].

use {
    crate::{
        error::Error,
        io::{Pipe, Sink, Source},
        process::{ChildFilter, Worker},
    },
    log::warn,
};

fn argv_create(tar_executable: &str) -> Vec<String>
{
    vec![
        tar_executable.to_owned(),
        "--create".to_owned(),
        "--file=-".to_owned(),
        "--numeric-owner".to_owned(),
        "--no-recursion".to_owned(),
        "--files-from=-".to_owned(),
        "--null".to_owned(),
    ]
}

fn argv_list(tar_executable: &str) -> Vec<String>
{
    vec![tar_executable.to_owned(), "--list".to_owned(), "--file=-".to_owned()]
}

/// Creates a tar archive from a fixed list of absolute paths.
///
/// The archiver reads NUL-delimited names from stdin and writes the archive
/// to the caller's sink. A worker thread owns the internal [`Pipe`] feeding
/// those names: once every name has been written, it closes the pipe's sink,
/// which the archiver observes as EOF on its own stdin.
pub struct TarCreator
{
    filter: ChildFilter,
    worker: Worker<()>,
}

impl TarCreator
{
    /// Spawn the archiver and the name-feeding worker. `files` is copied so
    /// the archiver's lifetime does not depend on the caller's list
    /// surviving.
    pub fn new(
        tar_executable: &str,
        files:          &[String],
        sink:           &mut impl Sink,
    ) -> Result<Self, Error>
    {
        let mut list_pipe = Pipe::new()?;
        let filter = ChildFilter::new(tar_executable, &argv_create(tar_executable), &mut list_pipe, sink)?;

        let files: Vec<String> = files.to_vec();
        let worker = Worker::new();
        worker.start(move |_published| {
            for file in &files {
                if let Err(err) = write_all(&list_pipe, file.as_bytes()) {
                    warn!("tar creator: failed writing {file:?} to archiver stdin: {err}");
                    break;
                }
                if let Err(err) = write_all(&list_pipe, &[0]) {
                    warn!("tar creator: failed writing NUL separator: {err}");
                    break;
                }
            }
            let _ = list_pipe.close_sink();
        }).expect("freshly constructed worker is never already started");

        Ok(Self{filter, worker})
    }

    /// Nonblocking check: has the archiver already been reaped?
    pub fn is_running(&mut self) -> std::io::Result<bool>
    {
        self.filter.is_running()
    }

    /// Blocks until the archiver exits and the name-feeding worker has
    /// joined.
    pub fn wait(&mut self) -> std::io::Result<std::process::ExitStatus>
    {
        let status = self.filter.wait()?;
        self.worker.join();
        Ok(status)
    }

    /// True once the archiver has exited abnormally (signal or nonzero
    /// status).
    pub fn exited_abnormally(&mut self) -> std::io::Result<bool>
    {
        self.filter.exited_abnormally()
    }
}

/// Lists the members of a tar archive by name.
///
/// The archiver reads the archive from the caller's source and writes
/// newline-delimited entries to its own stdout; a worker thread reads that
/// stream, line by line, into an owned ordered sequence.
pub struct TarLister
{
    filter: ChildFilter,
    worker: Worker<Vec<String>>,
}

impl TarLister
{
    /// Spawn the archiver in list mode and the reading worker. `source`
    /// (the archive bytes) is handed to the archiver's stdin and closed
    /// here.
    pub fn new(tar_executable: &str, source: &mut impl Source) -> Result<Self, Error>
    {
        let mut list_pipe = Pipe::new()?;
        let filter = ChildFilter::new(tar_executable, &argv_list(tar_executable), source, &mut list_pipe)?;

        let worker = Worker::new();
        worker.start(move |published| {
            let mut files = Vec::new();
            let mut pending = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match kryptocd_os::read(list_pipe.source_fd(), &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for &byte in &buf[.. n] {
                            if byte == b'\n' {
                                files.push(String::from_utf8_lossy(&pending).into_owned());
                                pending.clear();
                            } else {
                                pending.push(byte);
                            }
                        }
                    },
                    Err(err) => {
                        warn!("tar lister: failed reading archiver stdout: {err}");
                        break;
                    },
                }
            }
            let _ = list_pipe.close_source();
            *published.lock().expect("worker mutex poisoned") = Some(files);
        }).expect("freshly constructed worker is never already started");

        Ok(Self{filter, worker})
    }

    /// Waits for the archiver and the reading worker to finish, then returns
    /// the accumulated file list.
    pub fn file_list(&mut self) -> std::io::Result<Vec<String>>
    {
        self.filter.wait()?;
        self.worker.join();
        Ok(self.worker.published().clone().unwrap_or_default())
    }

    /// True once the archiver has exited abnormally.
    pub fn exited_abnormally(&mut self) -> std::io::Result<bool>
    {
        self.filter.exited_abnormally()
    }
}

fn write_all(sink: &impl Sink, mut bytes: &[u8]) -> std::io::Result<()>
{
    while !bytes.is_empty() {
        let n = kryptocd_os::write(sink.sink_fd(), bytes)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
        }
        bytes = &bytes[n ..];
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    // TarCreator/TarLister spawn a real `tar` child process; exercising them
    // end-to-end belongs with the archive-pipeline integration tests in
    // `crate::archive`, which run against the real executable found on PATH.
}
