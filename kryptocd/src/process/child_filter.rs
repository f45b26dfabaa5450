// SPDX-License-Identifier: AGPL-3.0-only

//! [`Childprocess`] specialized to wire stdin/stdout to a [`Source`]/[`Sink`]
//! pair, with an optional extra inbound fd for out-of-band credentials.

use {
    super::childprocess::dup_raw,
    crate::{
        error::SpawnError,
        io::{Sink, Source},
    },
    std::{
        collections::BTreeMap,
        ops::{Deref, DerefMut},
        os::unix::io::RawFd,
    },
};

/// The documented extra file-descriptor number used to deliver the
/// passphrase to the encryption tool: `max(stdin, stdout, stderr) + 1`.
pub const EXTRA_FD: RawFd = 3;

/// [`EXTRA_FD`] rendered as the decimal string the child program expects on
/// its command line (e.g. `--passphrase-fd=3`).
pub const EXTRA_FD_STRING: &str = "3";

/// A [`Childprocess`](super::Childprocess) whose stdin/stdout are wired to a
/// caller-supplied [`Source`]/[`Sink`] pair, and which optionally receives a
/// third, extra inbound source at [`EXTRA_FD`].
///
/// After construction, every endpoint passed in has been closed in the
/// parent — their underlying descriptors now live only in the child.
pub struct ChildFilter(super::Childprocess);

impl ChildFilter
{
    /// Map `source` to the child's stdin and `sink` to its stdout.
    pub fn new(
        executable: &str,
        argv:       &[String],
        source:     &mut impl Source,
        sink:       &mut impl Sink,
    ) -> Result<Self, SpawnError>
    {
        let fd_map = Self::stdio_fd_map(source, sink)?;
        Ok(Self(super::Childprocess::spawn(executable, argv, fd_map, true)?))
    }

    /// Like [`ChildFilter::new`], additionally mapping `extra_source` to
    /// [`EXTRA_FD`] — used to deliver the passphrase to the encryption
    /// tool.
    pub fn with_extra_source(
        executable:   &str,
        argv:         &[String],
        source:       &mut impl Source,
        sink:         &mut impl Sink,
        extra_source: &mut impl Source,
    ) -> Result<Self, SpawnError>
    {
        let mut fd_map = Self::stdio_fd_map(source, sink)?;
        let extra_fd = dup_raw(extra_source.source_fd()).map_err(SpawnError::Fork)?;
        extra_source.close_source().ok();
        fd_map.insert(EXTRA_FD, extra_fd);
        Ok(Self(super::Childprocess::spawn(executable, argv, fd_map, true)?))
    }

    fn stdio_fd_map(
        source: &mut impl Source,
        sink:   &mut impl Sink,
    ) -> Result<BTreeMap<RawFd, RawFd>, SpawnError>
    {
        let mut fd_map = BTreeMap::new();
        fd_map.insert(libc::STDIN_FILENO, dup_raw(source.source_fd()).map_err(SpawnError::Fork)?);
        source.close_source().ok();
        fd_map.insert(libc::STDOUT_FILENO, dup_raw(sink.sink_fd()).map_err(SpawnError::Fork)?);
        sink.close_sink().ok();
        Ok(fd_map)
    }
}

impl Deref for ChildFilter
{
    type Target = super::Childprocess;

    fn deref(&self) -> &Self::Target
    {
        &self.0
    }
}

impl DerefMut for ChildFilter
{
    fn deref_mut(&mut self) -> &mut Self::Target
    {
        &mut self.0
    }
}
