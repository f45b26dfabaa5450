// SPDX-License-Identifier: AGPL-3.0-only

//! The three-stage archive pipeline: tar, compress, encrypt — and its
//! dual for listing an existing archive's contents.

use crate::{
    error::Error,
    filters::{Compressor, Encryptor, TarCreator, TarLister},
    io::{Pipe, Sink, Source},
};

/// Executables for the three external tools the pipeline shells out to.
#[derive(Clone, Debug)]
pub struct Tools
{
    /// Path to the archiver (GNU tar or compatible).
    pub archiver:   String,

    /// Path to the compressor (bzip2 or compatible).
    pub compressor: String,

    /// Path to the encryption tool (GnuPG or compatible).
    pub encryptor:  String,
}

/// Archives `files`, compresses the result, and encrypts it with
/// `passphrase`, writing ciphertext to the caller's sink.
///
/// Internally: `TarCreator(files) -> Compressor(level) -> Encryptor(passphrase)
/// -> sink`, connected by two internal pipes. Dropping an `ArchiveCreator`
/// reaps the three stages in pipeline order.
pub struct ArchiveCreator
{
    tar:        TarCreator,
    compressor: Compressor,
    encryptor:  Encryptor,
}

impl ArchiveCreator
{
    /// Spawn all three stages.
    pub fn new(
        tools:       &Tools,
        files:       &[String],
        compression: i32,
        passphrase:  &str,
        sink:        &mut impl Sink,
    ) -> Result<Self, Error>
    {
        let mut stage1 = Pipe::new()?;
        let mut stage2 = Pipe::new()?;

        let tar = TarCreator::new(&tools.archiver, files, &mut stage1)?;
        let compressor = Compressor::new(&tools.compressor, compression, &mut stage1, &mut stage2)?;
        let encryptor = Encryptor::new(&tools.encryptor, passphrase, true, &mut stage2, sink)?;

        Ok(Self{tar, compressor, encryptor})
    }

    /// True once the archiver stage has exited, as a hint to callers pumping
    /// its ciphertext that the source side of the pipeline has gone dry.
    pub fn tar_exited_abnormally(&mut self) -> std::io::Result<bool>
    {
        self.tar.exited_abnormally()
    }

    /// Blocks until every stage has been reaped.
    pub fn wait(&mut self) -> std::io::Result<()>
    {
        self.tar.wait()?;
        self.compressor.wait()?;
        // The encryptor is deliberately not waited on: its destructor
        // relies on termination-on-drop (see `Encryptor`).
        Ok(())
    }
}

/// The dual of [`ArchiveCreator`]: decrypts, decompresses, and lists the
/// members of an existing archive.
pub struct ArchiveLister
{
    encryptor:  Encryptor,
    compressor: Compressor,
    tar:        TarLister,
}

impl ArchiveLister
{
    /// Spawn all three stages. `source` (the ciphertext) is handed to the
    /// encryptor's stdin and closed here.
    pub fn new(
        tools:      &Tools,
        passphrase: &str,
        source:     &mut impl Source,
    ) -> Result<Self, Error>
    {
        let mut stage1 = Pipe::new()?;
        let mut stage2 = Pipe::new()?;

        let encryptor = Encryptor::new(&tools.encryptor, passphrase, false, source, &mut stage1)?;
        let compressor = Compressor::new(&tools.compressor, -1, &mut stage1, &mut stage2)?;
        let tar = TarLister::new(&tools.archiver, &mut stage2)?;

        Ok(Self{encryptor, compressor, tar})
    }

    /// Waits for the pipeline and returns the listed file names.
    pub fn file_list(&mut self) -> std::io::Result<Vec<String>>
    {
        let files = self.tar.file_list()?;
        self.compressor.wait()?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests
{
    // End-to-end exercise requires real `tar`/`bzip2`/`gpg` executables on
    // PATH; covered by the image-level integration tests in `crate::image`.
}
