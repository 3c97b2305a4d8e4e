//! Tarball extraction.
//!
//! Registry tarballs are gzip-compressed ustar streams. npm wraps package
//! files under a top-level directory (almost always `package/`, but e.g.
//! `@types/*` use the bare package name), so extraction runs two passes:
//! the first computes the longest directory prefix common to every
//! non-directory entry, the second extracts with that prefix stripped.

use crate::error::PkgError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

/// Extract a gzipped package tarball into `dest`, stripping the wrapper prefix.
///
/// `dest` is created if needed. Entries whose names become empty after prefix
/// stripping are skipped. Regular files, directories, and symlinks are
/// materialized; PAX extended headers are ignored; file modes are applied
/// where the host supports them (chmod failures are non-fatal).
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` for malformed archives or unsafe entry paths.
pub fn extract_package(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let prefix = common_prefix(bytes)?;
    debug!(prefix = %prefix.display(), dest = %dest.display(), "extracting tarball");

    fs::create_dir_all(dest)
        .map_err(|e| PkgError::extract_failed(format!("Failed to create {}: {e}", dest.display())))?;

    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let entry_type = entry.header().entry_type();
        if is_extension_header(entry_type) {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        check_entry_path(&path)?;

        let Some(stripped) = strip_prefix_components(&path, &prefix) else {
            continue;
        };

        let dest_path = dest.join(&stripped);
        if !dest_path.starts_with(dest) {
            return Err(PkgError::extract_failed(format!(
                "Tarball entry escapes destination: {}",
                path.display()
            )));
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PkgError::extract_failed(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&dest_path).map_err(|e| {
                    PkgError::extract_failed(format!(
                        "Failed to create {}: {e}",
                        dest_path.display()
                    ))
                })?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| PkgError::extract_failed(format!("Bad symlink entry: {e}")))?
                    .ok_or_else(|| {
                        PkgError::extract_failed(format!(
                            "Symlink entry without target: {}",
                            path.display()
                        ))
                    })?;
                recreate_symlink(&target, &dest_path)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut file = File::create(&dest_path).map_err(|e| {
                    PkgError::extract_failed(format!(
                        "Failed to create {}: {e}",
                        dest_path.display()
                    ))
                })?;
                io::copy(&mut entry, &mut file).map_err(|e| {
                    PkgError::extract_failed(format!(
                        "Failed to write {}: {e}",
                        dest_path.display()
                    ))
                })?;
                apply_mode(entry.header().mode().unwrap_or(0o644), &dest_path);
            }
            // Hard links, fifos, and devices have no place in a package.
            _ => {}
        }
    }

    Ok(())
}

/// First pass: longest directory prefix shared by every non-directory entry.
fn common_prefix(bytes: &[u8]) -> Result<PathBuf, PkgError> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);

    let mut prefix: Option<Vec<std::ffi::OsString>> = None;

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?
    {
        let entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let entry_type = entry.header().entry_type();
        if is_extension_header(entry_type) || entry_type == EntryType::Directory {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?;

        // The prefix can only span parent directories, never the file itself.
        let parent: Vec<std::ffi::OsString> = path
            .parent()
            .map(|p| p.components().map(|c| c.as_os_str().to_os_string()).collect())
            .unwrap_or_default();

        prefix = Some(match prefix {
            None => parent,
            Some(current) => current
                .iter()
                .zip(parent.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a.clone())
                .collect(),
        });

        if prefix.as_ref().is_some_and(|p| p.is_empty()) {
            break;
        }
    }

    Ok(prefix.unwrap_or_default().iter().collect())
}

/// Strip `prefix` components from `path`; `None` when nothing remains.
fn strip_prefix_components(path: &Path, prefix: &Path) -> Option<PathBuf> {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}

/// Reject absolute paths and parent-directory traversal.
fn check_entry_path(path: &Path) -> Result<(), PkgError> {
    if path.is_absolute() {
        return Err(PkgError::extract_failed(format!(
            "Tarball contains absolute path: {}",
            path.display()
        )));
    }

    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains path traversal: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn is_extension_header(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::XHeader | EntryType::XGlobalHeader | EntryType::GNULongName | EntryType::GNULongLink
    )
}

#[cfg(unix)]
fn recreate_symlink(target: &Path, dest: &Path) -> Result<(), PkgError> {
    if dest.symlink_metadata().is_ok() {
        let _ = fs::remove_file(dest);
    }
    std::os::unix::fs::symlink(target, dest).map_err(|e| {
        PkgError::extract_failed(format!(
            "Failed to create symlink {} -> {}: {e}",
            dest.display(),
            target.display()
        ))
    })
}

#[cfg(not(unix))]
fn recreate_symlink(_target: &Path, _dest: &Path) -> Result<(), PkgError> {
    // Symlink entries are skipped on hosts without Unix symlinks.
    Ok(())
}

#[cfg(unix)]
fn apply_mode(mode: u32, path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn apply_mode(_mode: u32, _path: &Path) {}
