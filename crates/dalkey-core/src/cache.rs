//! On-disk metadata cache.
//!
//! Caches packuments between installs so that repeated resolutions within
//! the TTL make no network calls. One file per `(name, abbreviated?)` pair;
//! the filename combines an escaped package name with a short hash so that
//! escaping collisions cannot alias two packages.

use crate::error::PkgError;
use crate::packument::Packument;
use dalkey_util::{fs::atomic_write, hash::blake3_prefix};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Default time-to-live for cached metadata.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// On-disk TTL cache of package documents, keyed by package name.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
    ttl: Duration,
}

impl MetadataCache {
    /// Create a cache rooted at `<cache_dir>/metadata` with the default TTL.
    #[must_use]
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("metadata"),
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the TTL (tests shorten it).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for a package document.
    #[must_use]
    pub fn entry_path(&self, name: &str, abbreviated: bool) -> PathBuf {
        let safe = name.replace(['/', '@'], "+");
        let hash = blake3_prefix(name, 8);
        let suffix = if abbreviated { ".min" } else { "" };
        self.root.join(format!("{safe}-{hash}{suffix}.json"))
    }

    /// Get a cached abbreviated packument if it is younger than the TTL.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Packument> {
        self.get_with_max_age(name, self.ttl)
    }

    /// Get a cached abbreviated packument regardless of age.
    ///
    /// Serves `prefer_offline` installs, which accept stale metadata over a
    /// network round trip.
    #[must_use]
    pub fn get_stale(&self, name: &str) -> Option<Packument> {
        self.get_with_max_age(name, Duration::MAX)
    }

    fn get_with_max_age(&self, name: &str, max_age: Duration) -> Option<Packument> {
        let path = self.entry_path(name, true);
        let metadata = fs::metadata(&path).ok()?;

        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())?;
        if age > max_age {
            debug!(name, age_secs = age.as_secs(), "metadata cache entry expired");
            return None;
        }

        let content = fs::read(&path).ok()?;
        match serde_json::from_slice(&content) {
            Ok(doc) => {
                debug!(name, "metadata cache hit");
                Some(doc)
            }
            Err(_) => {
                // A corrupt entry is a miss; it will be overwritten.
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Store an abbreviated packument.
    ///
    /// The document is written compactly and atomically.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be written.
    pub fn set(&self, name: &str, doc: &Packument) -> Result<(), PkgError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| PkgError::cache_error(format!("Failed to create cache dir: {e}")))?;

        let content = serde_json::to_vec(doc)
            .map_err(|e| PkgError::cache_error(format!("Failed to serialize packument: {e}")))?;

        let path = self.entry_path(name, true);
        atomic_write(&path, &content)
            .map_err(|e| PkgError::cache_error(format!("Failed to write cache entry: {e}")))
    }

    /// Remove both the abbreviated and full entries for a package.
    pub fn invalidate(&self, name: &str) {
        let _ = fs::remove_file(self.entry_path(name, true));
        let _ = fs::remove_file(self.entry_path(name, false));
    }

    /// Remove oldest entries until the cache size is at most 80% of `max_bytes`.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be read.
    pub fn prune(&self, max_bytes: u64) -> Result<u64, PkgError> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut total: u64 = 0;

        for entry in fs::read_dir(&self.root)
            .map_err(|e| PkgError::cache_error(format!("Failed to read cache dir: {e}")))?
            .flatten()
        {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            total += metadata.len();
            entries.push((entry.path(), metadata.len(), mtime));
        }

        let target = max_bytes * 8 / 10;
        if total <= target {
            return Ok(0);
        }

        // Oldest first.
        entries.sort_by_key(|(_, _, mtime)| *mtime);

        let mut freed: u64 = 0;
        for (path, size, _) in entries {
            if total - freed <= target {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                freed += size;
            }
        }

        debug!(freed, "pruned metadata cache");
        Ok(freed)
    }

    /// Remove every cache entry.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be removed.
    pub fn clear(&self) -> Result<(), PkgError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .map_err(|e| PkgError::cache_error(format!("Failed to clear cache: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(name: &str) -> Packument {
        Packument {
            name: name.to_string(),
            ..Packument::default()
        }
    }

    #[test]
    fn test_miss_is_none() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());
        assert!(cache.get("lodash").is_none());
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        cache.set("lodash", &doc("lodash")).unwrap();
        let cached = cache.get("lodash").unwrap();
        assert_eq!(cached.name, "lodash");
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path()).with_ttl(Duration::ZERO);

        cache.set("lodash", &doc("lodash")).unwrap();
        // TTL of zero: the entry is immediately stale.
        assert!(cache.get("lodash").is_none());
        // But the stale read still serves it.
        assert!(cache.get_stale("lodash").is_some());
    }

    #[test]
    fn test_invalidate() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        cache.set("lodash", &doc("lodash")).unwrap();
        cache.invalidate("lodash");
        assert!(cache.get("lodash").is_none());
    }

    #[test]
    fn test_scoped_names_do_not_collide() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        // These escape to the same safe name; the hash suffix keeps them apart.
        let a = cache.entry_path("@types/node", true);
        let b = cache.entry_path("types+node", true);
        assert_ne!(a, b);
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        fs::create_dir_all(cache.root()).unwrap();
        fs::write(cache.entry_path("lodash", true), "not json").unwrap();
        assert!(cache.get("lodash").is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        cache.set("a", &doc("a")).unwrap();
        cache.set("b", &doc("b")).unwrap();
        cache.clear().unwrap();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_prune_respects_target() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::new(dir.path());

        for i in 0..10 {
            cache.set(&format!("pkg-{i}"), &doc(&format!("pkg-{i}"))).unwrap();
        }

        // A tiny budget forces pruning down to <= 80% of it.
        let freed = cache.prune(64).unwrap();
        assert!(freed > 0);

        let remaining: u64 = fs::read_dir(cache.root())
            .unwrap()
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        assert!(remaining <= 64 * 8 / 10 || remaining == 0);
    }
}
