//! Package fetching: download, verify, extract into the store.
//!
//! Fetches run with bounded concurrency. A package is committed to the store
//! only after its bytes hash to the declared integrity; verification failures
//! leave neither a store entry nor a cached tarball behind.

use crate::error::PkgError;
use crate::registry::RegistryClient;
use crate::resolve::ResolvedPackage;
use crate::store::{PackageStore, StoreMeta};
use crate::tarball::extract_package;
use base64::Engine;
use futures::stream::{self, StreamExt};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of fetching one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Store entry the package was extracted into.
    pub path: PathBuf,
    /// Whether the entry already existed.
    pub from_cache: bool,
}

/// Result of fetching a whole resolution set.
#[derive(Debug, Default)]
pub struct FetchSet {
    /// `name@version` -> result. Optional packages that failed are absent.
    pub results: BTreeMap<String, FetchResult>,
    pub warnings: Vec<String>,
}

/// Downloads tarballs and materializes store entries.
pub struct Fetcher {
    registry: RegistryClient,
    store: PackageStore,
    tarball_dir: PathBuf,
    concurrency: usize,
    offline: bool,
}

impl Fetcher {
    /// Create a fetcher.
    ///
    /// Tarballs are cached under `<cache_dir>/tarballs`.
    #[must_use]
    pub fn new(
        registry: RegistryClient,
        store: PackageStore,
        cache_dir: &Path,
        concurrency: usize,
        offline: bool,
    ) -> Self {
        Self {
            registry,
            store,
            tarball_dir: cache_dir.join("tarballs"),
            concurrency: concurrency.max(1),
            offline,
        }
    }

    /// Path of the cached tarball for a package.
    #[must_use]
    pub fn tarball_path(&self, name: &str, version: &str) -> PathBuf {
        self.tarball_dir
            .join(format!("{}-{version}.tgz", PackageStore::safe_name(name)))
    }

    /// Fetch every package of a resolution set.
    ///
    /// # Errors
    /// Fails on the first non-optional package that cannot be fetched,
    /// verified, or extracted.
    pub async fn fetch_all<'a, I>(&self, packages: I) -> Result<FetchSet, PkgError>
    where
        I: IntoIterator<Item = &'a ResolvedPackage>,
    {
        let results: Vec<(String, bool, Result<FetchResult, PkgError>)> =
            stream::iter(packages.into_iter().map(|pkg| async move {
                let result = self.fetch_one(pkg).await;
                (pkg.key(), pkg.optional, result)
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut set = FetchSet::default();
        for (key, optional, result) in results {
            match result {
                Ok(fetched) => {
                    set.results.insert(key, fetched);
                }
                Err(e) if optional => {
                    warn!(%key, error = %e, "skipping optional package");
                    set.warnings
                        .push(format!("Skipping optional package {key}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            total = set.results.len(),
            cached = set.results.values().filter(|r| r.from_cache).count(),
            "fetch complete"
        );
        Ok(set)
    }

    async fn fetch_one(&self, pkg: &ResolvedPackage) -> Result<FetchResult, PkgError> {
        let entry = self
            .store
            .entry_path(&pkg.name, &pkg.version, &pkg.integrity);

        // Fast path: a complete entry (manifest plus sidecar) is reused as-is.
        if self.store.has(&pkg.name, &pkg.version, &pkg.integrity)
            && self.store.read_meta(&entry).is_some()
        {
            debug!(key = %pkg.key(), "store hit");
            return Ok(FetchResult {
                path: entry,
                from_cache: true,
            });
        }

        let tarball_path = self.tarball_path(&pkg.name, &pkg.version);
        let (bytes, cached_tarball) = if tarball_path.is_file() {
            let bytes = fs::read(&tarball_path).map_err(|e| {
                PkgError::download_failed(format!(
                    "Failed to read cached tarball {}: {e}",
                    tarball_path.display()
                ))
            })?;
            (bytes::Bytes::from(bytes), true)
        } else if self.offline {
            return Err(PkgError::offline_miss(&pkg.key()));
        } else {
            debug!(url = %pkg.tarball, "downloading tarball");
            (self.registry.download_tarball(&pkg.tarball).await?, false)
        };

        if let Err(e) = verify_integrity(&bytes, &pkg.integrity, &pkg.key()) {
            // A corrupt cached tarball must not satisfy the next install.
            if cached_tarball {
                let _ = fs::remove_file(&tarball_path);
            }
            return Err(e);
        }

        if !cached_tarball {
            if let Some(parent) = tarball_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    PkgError::download_failed(format!("Failed to create tarball cache: {e}"))
                })?;
            }
            dalkey_util::fs::atomic_write(&tarball_path, &bytes).map_err(|e| {
                PkgError::download_failed(format!("Failed to cache tarball: {e}"))
            })?;
        }

        self.extract_into_store(pkg, &bytes, &entry)?;

        Ok(FetchResult {
            path: entry,
            from_cache: false,
        })
    }

    /// Extract into a workspace next to the final entry, then rename over it.
    fn extract_into_store(
        &self,
        pkg: &ResolvedPackage,
        bytes: &[u8],
        entry: &Path,
    ) -> Result<(), PkgError> {
        fs::create_dir_all(self.store.root())
            .map_err(|e| PkgError::store_error(format!("Failed to create store: {e}")))?;

        let workspace = self.store.root().join(format!(
            ".tmp-{}-{}-{}",
            PackageStore::safe_name(&pkg.name),
            std::process::id(),
            rand_u32()
        ));

        if let Err(e) = extract_package(bytes, &workspace) {
            let _ = fs::remove_dir_all(&workspace);
            return Err(e);
        }

        // Last writer wins: drop any previous entry, then move into place.
        if entry.exists() {
            let _ = fs::remove_dir_all(entry);
        }

        if let Err(e) = fs::rename(&workspace, entry) {
            // A concurrent fetcher may have renamed its own workspace first;
            // both succeed and the later one wins.
            let _ = fs::remove_dir_all(&workspace);
            if !entry.exists() {
                return Err(PkgError::store_error(format!(
                    "Failed to commit store entry {}: {e}",
                    entry.display()
                )));
            }
        }

        self.store.write_meta(
            entry,
            &StoreMeta {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                integrity: pkg.integrity.clone(),
                tarball: pkg.tarball.clone(),
                fetched_at: chrono::Utc::now(),
            },
        )
    }
}

/// Verify tarball bytes against an `algo-digest` integrity string.
///
/// Digests compare as standard base64; sha1 digests additionally compare as
/// hex, covering integrity strings synthesized from legacy shasums. An empty
/// integrity string verifies trivially (there is nothing to check against).
pub fn verify_integrity(bytes: &[u8], integrity: &str, pkg: &str) -> Result<(), PkgError> {
    if integrity.is_empty() {
        return Ok(());
    }

    let Some((algo, expected)) = integrity.split_once('-') else {
        return Err(PkgError::integrity_mismatch(pkg, integrity, "<unparseable>"));
    };

    let digest: Vec<u8> = match algo {
        "sha512" => Sha512::digest(bytes).to_vec(),
        "sha256" => Sha256::digest(bytes).to_vec(),
        "sha1" => Sha1::digest(bytes).to_vec(),
        _ => {
            return Err(PkgError::integrity_mismatch(
                pkg,
                integrity,
                "<unsupported algorithm>",
            ))
        }
    };

    let actual_b64 = base64::engine::general_purpose::STANDARD.encode(&digest);
    if actual_b64 == expected {
        return Ok(());
    }

    if algo == "sha1" {
        let actual_hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        if actual_hex.eq_ignore_ascii_case(expected) {
            return Ok(());
        }
    }

    Err(PkgError::integrity_mismatch(
        pkg,
        integrity,
        &format!("{algo}-{actual_b64}"),
    ))
}

#[allow(clippy::cast_possible_truncation)]
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    // Truncation is intentional: we just need some entropy for workspace names
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    );
    hasher.finish() as u32
}
