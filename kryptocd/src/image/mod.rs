// SPDX-License-Identifier: AGPL-3.0-only

//! Assembling one fixed-capacity archive from a candidate file list.
//!
//! The state machine is Validating, Reserving, Probing, Refining,
//! Committing, Ready: validate the request, reserve a disk-space budget,
//! try to tar+compress+encrypt the whole remaining file list into the
//! archive cap, shrink the attempt when it overflows, and once an attempt
//! fits, encrypt the committed file list to the index and hand back a
//! live [`Image`] whose `Drop` tears the workspace back down.

pub use self::manifest::Manifest;

mod manifest;
mod validate;

use crate::{
    archive::{ArchiveCreator, ArchiveLister, Tools},
    diskspace::Diskspace,
    error::{ImageError, SpawnError},
    io::{FileSink, Pipe, Sink},
    io_pump::IoPump,
};
use log::{debug, warn};
use std::path::{Path, PathBuf};

const MEGABYTE: u64 = 1024 * 1024;
const BLOCK_SIZE: u64 = 2048;

/// Filesystem overhead (directory records, path tables, volume descriptors)
/// reserved out of every image's block budget ahead of the archive and its
/// index.
const RESERVED_BLOCKS_FOR_FILESYSTEM_OVERHEAD: u64 = 40;

const ARCHIVE_FILENAME: &str = "kryptocd_archive.tar.bz2.gpg";

/// A committed image: an encrypted, compressed archive plus its encrypted
/// index, both living under a per-image workspace directory and backed by
/// a slice of a shared [`Diskspace`] budget.
///
/// Dropping an `Image` unlinks every regular file under its workspace,
/// removes the workspace directory, and releases the held megabytes back
/// to `Diskspace`.
#[derive(Debug)]
pub struct Image<'d>
{
    id:                  String,
    workspace:           PathBuf,
    allocated_megabytes: u64,
    diskspace:           &'d Diskspace,
}

impl<'d> Image<'d>
{
    /// The image id this image was committed under.
    pub fn id(&self) -> &str
    {
        &self.id
    }

    /// The per-image workspace directory holding the archive and index.
    pub fn workspace(&self) -> &Path
    {
        &self.workspace
    }
}

impl<'d> Drop for Image<'d>
{
    fn drop(&mut self)
    {
        if let Ok(entries) = std::fs::read_dir(&self.workspace) {
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        let _ = std::fs::remove_dir(&self.workspace);
        if self.allocated_megabytes > 0 {
            self.diskspace.release(self.allocated_megabytes);
        }
    }
}

/// Validate, reserve, probe, refine, and commit one image from `files`.
///
/// `files` is mutated in place: paths that end up in the committed archive
/// are removed from it, and every rejection is appended to the matching
/// `rejected_*` list, in the order encountered. On success, a [`Manifest`]
/// recording the committed file list is appended to `manifests` and a live
/// [`Image`] is returned; on failure, nothing observable survives (the
/// workspace is gone and the budget has been released).
#[allow(clippy::too_many_arguments)]
pub fn create<'d>(
    image_id:                   &str,
    passphrase:                 &str,
    compression:                i32,
    files:                      &mut Vec<String>,
    rejected_too_large:         &mut Vec<String>,
    rejected_permission_denied: &mut Vec<String>,
    rejected_bad_name:          &mut Vec<String>,
    manifests:                  &mut Vec<Manifest>,
    diskspace:                  &'d Diskspace,
    disc_capacity_blocks:       u64,
    tools:                      &Tools,
) -> Result<Image<'d>, ImageError>
{
    if !validate::validate_image_id(image_id) {
        return Err(ImageError::BadImageId(image_id.to_owned()));
    }
    if !validate::validate_passphrase(passphrase) {
        return Err(ImageError::BadPassphrase);
    }
    if !validate::validate_compression(compression) {
        return Err(ImageError::BadCompression(compression));
    }

    let accepted = validate::partition(files, rejected_bad_name, rejected_permission_denied);
    *files = accepted;
    if !rejected_bad_name.is_empty() || !rejected_permission_denied.is_empty() {
        debug!(
            "image {image_id}: validating rejected {} bad-name and {} permission-denied paths",
            rejected_bad_name.len(), rejected_permission_denied.len(),
        );
    }
    if files.is_empty() {
        return Err(ImageError::ArchiveWouldBeEmpty);
    }

    let usable_megabytes = diskspace.get_usable();
    let image_max_blocks = disc_capacity_blocks.min(usable_megabytes.saturating_mul(MEGABYTE) / BLOCK_SIZE);
    let image_max_megabytes =
        ((disc_capacity_blocks.saturating_mul(BLOCK_SIZE) + MEGABYTE - 1) / MEGABYTE).min(usable_megabytes);

    let estimated_index_bytes: u64 = files.iter().map(|f| f.len() as u64 + 1).sum();
    let estimated_index_blocks = estimated_index_bytes / BLOCK_SIZE + 1;

    let archive_max_blocks =
        image_max_blocks as i64 - RESERVED_BLOCKS_FOR_FILESYSTEM_OVERHEAD as i64 - estimated_index_blocks as i64;
    if archive_max_blocks <= 0 {
        return Err(ImageError::CapacityTooSmall);
    }
    let archive_max_bytes = archive_max_blocks as u64 * BLOCK_SIZE;

    let workspace = diskspace.get_directory().join(image_id);
    std::fs::create_dir(&workspace).map_err(ImageError::UnableToCreateSubdirectory)?;

    if image_max_megabytes == 0 {
        cleanup_failed(&workspace, diskspace, 0);
        return Err(ImageError::CapacityTooSmall);
    }
    let mut allocated_megabytes = diskspace.allocate(image_max_megabytes);
    debug!("image {image_id}: reserved {allocated_megabytes}MB of {image_max_megabytes}MB max, archive cap {archive_max_bytes} bytes");

    let archive_path = workspace.join(ARCHIVE_FILENAME);

    let committed = loop {
        match assemble_image_data(
            files,
            rejected_permission_denied,
            tools,
            compression,
            passphrase,
            &archive_path,
            archive_max_bytes,
            &mut allocated_megabytes,
            image_max_megabytes,
            diskspace,
        ) {
            Ok(Some(committed)) => break committed,
            Ok(None) => {
                let rejected = files.remove(0);
                warn!("image {image_id}: {rejected:?} does not fit even alone, rejected as too large");
                rejected_too_large.push(rejected);
                if files.is_empty() {
                    cleanup_failed(&workspace, diskspace, allocated_megabytes);
                    return Err(ImageError::ArchiveWouldBeEmpty);
                }
            },
            Err(err) => {
                cleanup_failed(&workspace, diskspace, allocated_megabytes);
                return Err(err);
            },
        }
    };

    debug!("image {image_id}: committed {} files", committed.len());

    let manifest = Manifest{image_id: image_id.to_owned(), files: committed};
    if let Err(err) = manifest.save_to_file(&tools.encryptor, &workspace, passphrase) {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, err);
        cleanup_failed(&workspace, diskspace, allocated_megabytes);
        return Err(ImageError::InfoWriteFailed(io_err));
    }
    files.drain(.. manifest.files.len());
    manifests.push(manifest);

    Ok(Image{id: image_id.to_owned(), workspace, allocated_megabytes, diskspace})
}

fn cleanup_failed(workspace: &Path, diskspace: &Diskspace, allocated_megabytes: u64)
{
    let _ = std::fs::remove_dir_all(workspace);
    if allocated_megabytes > 0 {
        diskspace.release(allocated_megabytes);
    }
}

/// One full pass over the current `files`: try the whole remaining list,
/// and if it overflows the archive cap, keep shrinking the attempt
/// (Refining) until either an attempt fits or the attempt empties out.
///
/// `Ok(Some(committed))` means an attempt fit and should be committed.
/// `Ok(None)` means even a single file did not fit — the caller should
/// reject the first remaining file and try again from scratch.
#[allow(clippy::too_many_arguments)]
fn assemble_image_data(
    files:                      &mut Vec<String>,
    rejected_permission_denied: &mut Vec<String>,
    tools:                      &Tools,
    compression:                i32,
    passphrase:                 &str,
    archive_path:               &Path,
    archive_max_bytes:          u64,
    allocated_megabytes:        &mut u64,
    image_max_megabytes:        u64,
    diskspace:                  &Diskspace,
) -> Result<Option<Vec<String>>, ImageError>
{
    let mut this_time = files.clone();
    let mut reductions: u32 = 0;

    loop {
        debug!("probing {} files, {reductions} prior reductions", this_time.len());
        let (fits, dumped) = probe_once(
            &this_time,
            tools,
            compression,
            passphrase,
            archive_path,
            archive_max_bytes,
            allocated_megabytes,
            image_max_megabytes,
            diskspace,
        )?;

        diff_and_reject_forbidden(&this_time, &dumped, files, rejected_permission_denied)?;

        if fits {
            return Ok(Some(this_time));
        }

        this_time = reduce_fileset(this_time, &mut reductions);
        if this_time.is_empty() {
            return Ok(None);
        }
    }
}

/// Archive `this_time` into `archive_path` while simultaneously feeding an
/// [`ArchiveLister`] the same bytes, pumping only as many as the archive
/// cap and the currently allocated megabytes allow (requesting more
/// diskspace when the allocation, not the cap, is the binding limit).
///
/// Returns whether the whole of `this_time` fit under the cap, and the
/// archiver's own account of what it actually archived (with the leading
/// `/` tar strips restored).
#[allow(clippy::too_many_arguments)]
fn probe_once(
    this_time:           &[String],
    tools:               &Tools,
    compression:         i32,
    passphrase:          &str,
    archive_path:        &Path,
    archive_max_bytes:   u64,
    allocated_megabytes: &mut u64,
    image_max_megabytes: u64,
    diskspace:           &Diskspace,
) -> Result<(bool, Vec<String>), ImageError>
{
    let _ = std::fs::remove_file(archive_path);
    let mut archive_file = FileSink::create_new(archive_path, 0o600)?;

    let mut archive_creator_sink = Pipe::new()?;
    let archive_creator =
        ArchiveCreator::new(tools, this_time, compression, passphrase, &mut archive_creator_sink)
            .map_err(ImageError::from)?;

    let mut lister_feeder = Pipe::new()?;
    let mut archive_lister =
        ArchiveLister::new(tools, passphrase, &mut lister_feeder).map_err(ImageError::from)?;

    let mut pump = IoPump::new(archive_creator_sink);
    pump.add_sink(&archive_file);
    pump.add_sink(&lister_feeder);

    let mut bytes_so_far: u64 = 0;
    loop {
        let budget_bytes = allocated_megabytes.saturating_mul(MEGABYTE);
        let mut chunk = budget_bytes.saturating_sub(bytes_so_far);
        if bytes_so_far.saturating_add(chunk) > archive_max_bytes {
            chunk = archive_max_bytes - bytes_so_far;
        }
        if chunk == 0 {
            break;
        }

        let pumped = pump.pump(chunk as i64)?;
        bytes_so_far += pumped;

        if pump.at_eof() || bytes_so_far >= archive_max_bytes {
            break;
        }
        if *allocated_megabytes < image_max_megabytes {
            *allocated_megabytes += diskspace.allocate(image_max_megabytes - *allocated_megabytes);
        }
    }

    let fits = pump.at_eof();

    archive_file.close_sink().ok();
    lister_feeder.close_sink().ok();
    drop(archive_creator);

    let dumped: Vec<String> = archive_lister
        .file_list()
        .map_err(SpawnError::Fork)
        .map_err(ImageError::from)?
        .into_iter()
        .map(|name| format!("/{name}"))
        .collect();

    if !fits {
        let _ = std::fs::remove_file(archive_path);
    }

    Ok((fits, dumped))
}

/// Walk `this_time` and `dumped` in lockstep: `dumped` must be a
/// subsequence of `this_time` (the archiver may silently skip entries it
/// could not read, but it may never report one that was not offered).
/// Entries of `this_time` missing from `dumped` move from `files` to
/// `rejected_permission_denied`; any leftover `dumped` entry with no match
/// is a filename the validator should already have caught.
fn diff_and_reject_forbidden(
    this_time:                  &[String],
    dumped:                     &[String],
    files:                      &mut Vec<String>,
    rejected_permission_denied: &mut Vec<String>,
) -> Result<(), ImageError>
{
    let mut dumped_iter = dumped.iter().peekable();
    let mut forbidden = Vec::new();

    for entry in this_time {
        if dumped_iter.peek() == Some(&entry) {
            dumped_iter.next();
        } else {
            forbidden.push(entry.clone());
        }
    }

    if let Some(leftover) = dumped_iter.next() {
        return Err(ImageError::BadFilename(leftover.clone()));
    }

    if !forbidden.is_empty() {
        files.retain(|f| !forbidden.contains(f));
        rejected_permission_denied.extend(forbidden);
    }

    Ok(())
}

/// The first overflow drops the last candidate outright (most attempts
/// overflow by one big file); every subsequent overflow on the same
/// attempt halves what remains, so pathological cases converge in
/// O(log n) probes instead of one-at-a-time.
fn reduce_fileset(this_time: Vec<String>, reductions: &mut u32) -> Vec<String>
{
    *reductions += 1;
    if *reductions == 1 {
        let mut this_time = this_time;
        this_time.pop();
        this_time
    } else {
        let half = this_time.len() / 2;
        this_time.into_iter().take(half).collect()
    }
}
