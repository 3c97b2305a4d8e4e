//! Global content-addressable package store.
//!
//! Each extracted package lives at `<root>/<safe>@<version>_<hash8>` where
//! `safe` escapes `/` and `@` to `+` and `hash8` is derived from the
//! integrity string. Entries are immutable once created: the fetcher builds
//! them in a workspace and renames them into place, and the linker only ever
//! hardlinks out of them.

use crate::error::PkgError;
use dalkey_util::hash::blake3_prefix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filename of the metadata sidecar inside each store entry.
pub const META_NAME: &str = ".meta";

/// Length of the hash suffix in entry directory names.
const HASH_PREFIX_LEN: usize = 8;

/// Sidecar describing how a store entry came to be.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub name: String,
    pub version: String,
    pub integrity: String,
    pub tarball: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

/// A store entry discovered by [`PackageStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntryInfo {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Content-addressable store of extracted packages.
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Escape a package name for use in a directory name.
    #[must_use]
    pub fn safe_name(name: &str) -> String {
        name.replace(['/', '@'], "+")
    }

    /// Reverse [`safe_name`](Self::safe_name), restoring `@scope/name`.
    fn unsafe_name(safe: &str) -> String {
        match safe.strip_prefix('+') {
            Some(rest) => format!("@{}", rest.replacen('+', "/", 1)),
            None => safe.to_string(),
        }
    }

    /// Deterministic path of the entry for a package.
    ///
    /// The hash suffix is derived from the integrity string, or from
    /// `name@version` when no integrity is known.
    #[must_use]
    pub fn entry_path(&self, name: &str, version: &str, integrity: &str) -> PathBuf {
        let key = if integrity.is_empty() {
            format!("{name}@{version}")
        } else {
            integrity.to_string()
        };
        let hash = blake3_prefix(&key, HASH_PREFIX_LEN);
        self.root
            .join(format!("{}@{version}_{hash}", Self::safe_name(name)))
    }

    /// Whether a complete entry exists for the package.
    ///
    /// A directory alone is not enough: a valid entry carries the package
    /// manifest (an interrupted rename cannot produce one without it).
    #[must_use]
    pub fn has(&self, name: &str, version: &str, integrity: &str) -> bool {
        let dir = self.entry_path(name, version, integrity);
        dir.is_dir() && dir.join("package.json").is_file()
    }

    /// Read the metadata sidecar of an entry.
    #[must_use]
    pub fn read_meta(&self, entry: &Path) -> Option<StoreMeta> {
        let content = fs::read(entry.join(META_NAME)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// Write the metadata sidecar. This is the last step of entry creation.
    ///
    /// # Errors
    /// Returns an error if the sidecar cannot be written.
    pub fn write_meta(&self, entry: &Path, meta: &StoreMeta) -> Result<(), PkgError> {
        let content = serde_json::to_vec(meta)
            .map_err(|e| PkgError::store_error(format!("Failed to serialize meta: {e}")))?;
        dalkey_util::fs::atomic_write(&entry.join(META_NAME), &content)
            .map_err(|e| PkgError::store_error(format!("Failed to write meta: {e}")))
    }

    /// Enumerate store entries, skipping anything with a malformed name.
    ///
    /// # Errors
    /// Returns an error if the store root cannot be read.
    pub fn list(&self) -> Result<Vec<StoreEntryInfo>, PkgError> {
        let mut entries = Vec::new();

        if !self.root.exists() {
            return Ok(entries);
        }

        for entry in fs::read_dir(&self.root)
            .map_err(|e| PkgError::store_error(format!("Failed to read store: {e}")))?
            .flatten()
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let dir_name = entry.file_name();
            let Some(dir_name) = dir_name.to_str() else {
                continue;
            };

            let Some((name, version)) = parse_entry_name(dir_name) else {
                continue;
            };

            entries.push(StoreEntryInfo {
                name,
                version,
                path,
            });
        }

        entries.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(entries)
    }

    /// Delete the entry for a package.
    ///
    /// # Errors
    /// Returns an error if the directory tree cannot be removed.
    pub fn remove(&self, name: &str, version: &str, integrity: &str) -> Result<(), PkgError> {
        let dir = self.entry_path(name, version, integrity);
        if dir.exists() {
            debug!(entry = %dir.display(), "removing store entry");
            fs::remove_dir_all(&dir)
                .map_err(|e| PkgError::store_error(format!("Failed to remove entry: {e}")))?;
        }
        Ok(())
    }
}

/// Parse `<safe>@<version>_<hash8>` back into `(name, version)`.
fn parse_entry_name(dir_name: &str) -> Option<(String, String)> {
    let (rest, hash) = dir_name.rsplit_once('_')?;
    if hash.len() != HASH_PREFIX_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let (safe, version) = rest.rsplit_once('@')?;
    if safe.is_empty() || version.is_empty() {
        return None;
    }

    Some((PackageStore::unsafe_name(safe), version.to_string()))
}
