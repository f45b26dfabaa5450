// SPDX-License-Identifier: AGPL-3.0-only

//! Symmetric encryption and decryption.

use crate::{
    error::{Error, PipeError},
    io::{Pipe, Sink, Source},
    process::{ChildFilter, EXTRA_FD_STRING},
};

/// A [`ChildFilter`] around the encryption tool, fed the passphrase
/// out-of-band at [`crate::process::EXTRA_FD`].
///
/// Dropping an `Encryptor` never waits for the child: the encryption tool
/// can misbehave on stdin EOF during shutdown, so termination-on-drop (the
/// [`crate::process::Childprocess`] backstop) is preferred over a graceful
/// wait here.
pub struct Encryptor(ChildFilter);

impl Encryptor
{
    /// Spawn the encryption tool. `encrypt` selects symmetric-encrypt mode;
    /// otherwise the tool runs in its default (decrypt) mode.
    pub fn new(
        executable: &str,
        passphrase: &str,
        encrypt:    bool,
        source:     &mut impl Source,
        sink:       &mut impl Sink,
    ) -> Result<Self, Error>
    {
        let argv = argument_list(executable, encrypt);

        let mut passphrase_pipe = Pipe::new()?;
        write_passphrase(&passphrase_pipe, passphrase.as_bytes()).map_err(PipeError)?;
        passphrase_pipe.close_sink().ok();

        let filter = ChildFilter::with_extra_source(
            executable, &argv, source, sink, &mut passphrase_pipe,
        )?;
        Ok(Self(filter))
    }
}

fn argument_list(executable: &str, encrypt: bool) -> Vec<String>
{
    let passphrase_fd_arg = format!("--passphrase-fd={EXTRA_FD_STRING}");
    if encrypt {
        vec![executable.to_owned(), "--symmetric".to_owned(), passphrase_fd_arg]
    } else {
        vec![executable.to_owned(), passphrase_fd_arg]
    }
}

fn write_passphrase(pipe: &Pipe, mut bytes: &[u8]) -> std::io::Result<()>
{
    while !bytes.is_empty() {
        let n = kryptocd_os::write(pipe.sink_fd(), bytes)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
        }
        bytes = &bytes[n ..];
    }
    Ok(())
}

impl std::ops::Deref for Encryptor
{
    type Target = ChildFilter;

    fn deref(&self) -> &Self::Target
    {
        &self.0
    }
}

impl std::ops::DerefMut for Encryptor
{
    fn deref_mut(&mut self) -> &mut Self::Target
    {
        &mut self.0
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn encrypt_argv_uses_symmetric_flag()
    {
        let argv = argument_list("/usr/bin/gpg", true);
        assert_eq!(argv, vec!["/usr/bin/gpg", "--symmetric", "--passphrase-fd=3"]);
    }

    #[test]
    fn decrypt_argv_omits_symmetric_flag()
    {
        let argv = argument_list("/usr/bin/gpg", false);
        assert_eq!(argv, vec!["/usr/bin/gpg", "--passphrase-fd=3"]);
    }
}
