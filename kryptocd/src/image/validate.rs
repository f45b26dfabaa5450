// SPDX-License-Identifier: AGPL-3.0-only

//! Path and parameter validation for the Validating state.

/// Bytes the archiver is known to mangle in path names: the ASCII control
/// range plus the Latin-1 C1 control range. Conservative by design — a
/// vendored table, not derived from the archiver at runtime, since there is
/// no portable way to query it.
fn is_bad_byte(byte: u8) -> bool
{
    matches!(byte, 0x00 ..= 0x1f | 0x7f ..= 0x9f)
}

/// Why a path was rejected during validation.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejection
{
    /// Empty, missing the leading `/`, contains `//`, contains a byte the
    /// archiver is known to mangle, or a directory/non-directory trailing
    /// slash mismatch.
    BadName,

    /// `stat` failed (most commonly: permission denied, or the path has
    /// disappeared).
    PermissionDenied,
}

/// Validate one path per the Validating-state rules. `Ok(())` means the
/// path may proceed to Probing.
pub fn validate_path(path: &str) -> Result<(), Rejection>
{
    if path.is_empty()
        || !path.starts_with('/')
        || path.contains("//")
        || path.bytes().any(is_bad_byte)
    {
        return Err(Rejection::BadName);
    }

    let metadata = std::fs::symlink_metadata(path).map_err(|_| Rejection::PermissionDenied)?;
    let is_directory = metadata.is_dir();
    let has_trailing_slash = path.ends_with('/');
    if is_directory != has_trailing_slash {
        return Err(Rejection::BadName);
    }

    Ok(())
}

/// Partition `files` in place: paths failing validation move into
/// `rejected_bad_name` or `rejected_permission_denied`; the function returns
/// the validated paths, in their original relative order.
pub fn partition(
    files:                      &[String],
    rejected_bad_name:          &mut Vec<String>,
    rejected_permission_denied: &mut Vec<String>,
) -> Vec<String>
{
    let mut accepted = Vec::with_capacity(files.len());
    for path in files {
        match validate_path(path) {
            Ok(())                              => accepted.push(path.clone()),
            Err(Rejection::BadName)             => rejected_bad_name.push(path.clone()),
            Err(Rejection::PermissionDenied)    => rejected_permission_denied.push(path.clone()),
        }
    }
    accepted
}

/// Image id must not contain `/` or NUL.
pub fn validate_image_id(image_id: &str) -> bool
{
    !image_id.contains('/') && !image_id.contains('\0')
}

/// Passphrase must not contain a newline.
pub fn validate_passphrase(passphrase: &str) -> bool
{
    !passphrase.contains('\n')
}

/// Compression level must be in `1..=9`.
pub fn validate_compression(compression: i32) -> bool
{
    (1 ..= 9).contains(&compression)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn relative_path_is_bad_name()
    {
        assert_eq!(validate_path("relative/path"), Err(Rejection::BadName));
    }

    #[test]
    fn double_slash_is_bad_name()
    {
        assert_eq!(validate_path("/foo//bar"), Err(Rejection::BadName));
    }

    #[test]
    fn control_byte_is_bad_name()
    {
        assert_eq!(validate_path("/foo\nbar"), Err(Rejection::BadName));
    }

    #[test]
    fn missing_file_is_permission_denied()
    {
        assert_eq!(
            validate_path("/nonexistent/kryptocd-validate-test-path"),
            Err(Rejection::PermissionDenied),
        );
    }

    #[test]
    fn plain_file_without_trailing_slash_is_ok()
    {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(validate_path(file.to_str().unwrap()), Ok(()));
    }

    #[test]
    fn directory_without_trailing_slash_is_bad_name()
    {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(validate_path(dir.path().to_str().unwrap()), Err(Rejection::BadName));
    }

    #[test]
    fn directory_with_trailing_slash_is_ok()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("{}/", dir.path().to_str().unwrap());
        assert_eq!(validate_path(&path), Ok(()));
    }

    #[test]
    fn image_id_rejects_slash_and_nul()
    {
        assert!(validate_image_id("backup-2026-07-31"));
        assert!(!validate_image_id("bad/id"));
        assert!(!validate_image_id("bad\0id"));
    }

    #[test]
    fn passphrase_rejects_newline()
    {
        assert!(validate_passphrase("correct horse battery staple"));
        assert!(!validate_passphrase("bad\npassphrase"));
    }

    #[test]
    fn compression_level_range()
    {
        assert!(validate_compression(1));
        assert!(validate_compression(9));
        assert!(!validate_compression(0));
        assert!(!validate_compression(10));
    }
}
