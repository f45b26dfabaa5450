// SPDX-License-Identifier: AGPL-3.0-only

//! Byte-stream (de)compression.

use crate::{
    error::Error,
    io::{Sink, Source},
    process::ChildFilter,
};

/// A [`ChildFilter`] around the compression tool.
pub struct Compressor(ChildFilter);

impl Compressor
{
    /// `level` selects the mode: a value in `1..=9` compresses at that
    /// level; any other value decompresses.
    pub fn new(
        executable: &str,
        level:      i32,
        source:     &mut impl Source,
        sink:       &mut impl Sink,
    ) -> Result<Self, Error>
    {
        let argv = argument_list(executable, level);
        Ok(Self(ChildFilter::new(executable, &argv, source, sink)?))
    }
}

fn argument_list(executable: &str, level: i32) -> Vec<String>
{
    let mode = if (1 ..= 9).contains(&level) {
        format!("-{level}")
    } else {
        "--decompress".to_owned()
    };
    vec![executable.to_owned(), "--stdout".to_owned(), mode]
}

impl std::ops::Deref for Compressor
{
    type Target = ChildFilter;

    fn deref(&self) -> &Self::Target
    {
        &self.0
    }
}

impl std::ops::DerefMut for Compressor
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
    fn compress_argument_list_uses_dash_level()
    {
        let argv = argument_list("/usr/bin/bzip2", 7);
        assert_eq!(argv, vec!["/usr/bin/bzip2", "--stdout", "-7"]);
    }

    #[test]
    fn out_of_range_level_means_decompress()
    {
        let argv = argument_list("/usr/bin/bzip2", 0);
        assert_eq!(argv, vec!["/usr/bin/bzip2", "--stdout", "--decompress"]);

        let argv = argument_list("/usr/bin/bzip2", -1);
        assert_eq!(argv, vec!["/usr/bin/bzip2", "--stdout", "--decompress"]);

        let argv = argument_list("/usr/bin/bzip2", 10);
        assert_eq!(argv, vec!["/usr/bin/bzip2", "--stdout", "--decompress"]);
    }
}
