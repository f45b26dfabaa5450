// SPDX-License-Identifier: AGPL-3.0-only

//! The in-memory record of one committed image, and its on-disk encrypted
//! rendering.

use {
    crate::{
        error::{Error, PipeError},
        filters::Encryptor,
        io::{FileSink, Pipe, Sink},
    },
    std::path::Path,
};

/// Which files ended up in one committed image.
#[derive(Debug, Clone)]
pub struct Manifest
{
    /// The image id this manifest belongs to.
    pub image_id: String,

    /// The committed paths, in their original relative order.
    pub files: Vec<String>,
}

impl Manifest
{
    /// Encrypt the file list, one path per line, to `<directory>/<image_id>.gpg`.
    pub fn save_to_file(
        &self,
        encryptor_executable: &str,
        directory:            &Path,
        passphrase:           &str,
    ) -> Result<(), Error>
    {
        let path = directory.join(format!("{}.gpg", self.image_id));
        let mut output = FileSink::create_new(&path, 0o600)?;

        let mut contents_pipe = Pipe::new()?;
        let mut encryptor = Encryptor::new(
            encryptor_executable, passphrase, true, &mut contents_pipe, &mut output,
        )?;

        let mut body = String::new();
        for file in &self.files {
            body.push_str(file);
            body.push('\n');
        }
        write_all(&contents_pipe, body.as_bytes()).map_err(PipeError)?;
        contents_pipe.close_sink().ok();

        let status = encryptor.wait().map_err(PipeError)?;
        if !status.success() {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "encryptor exited abnormally");
            return Err(PipeError(err).into());
        }
        Ok(())
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
