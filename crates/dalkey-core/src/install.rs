//! The install pipeline.
//!
//! Ties the stages together: manifest -> resolution (or lockfile in frozen
//! mode) -> fetch -> link -> lockfile. The lockfile is written only after a
//! successful link, so an aborted install leaves the previous lockfile as the
//! consistent on-disk snapshot.

use crate::cache::MetadataCache;
use crate::config::InstallConfig;
use crate::error::PkgError;
use crate::fetch::Fetcher;
use crate::link::Linker;
use crate::lockfile::LockfileManager;
use crate::manifest::Manifest;
use crate::registry::RegistryClient;
use crate::resolve::{ResolveOptions, ResolvedPackage, Resolver};
use crate::store::PackageStore;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Summary of a completed install.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Packages in the installed set.
    pub total: usize,
    /// Packages whose tarball was downloaded or re-extracted this run.
    pub downloaded: usize,
    /// Packages served from an existing store entry.
    pub from_cache: usize,
    /// Package instances materialized into the module tree.
    pub linked: usize,
    pub binaries_installed: usize,
    /// Whether the set came from the lockfile instead of the resolver.
    pub frozen: bool,
    pub warnings: Vec<String>,
}

/// Run a full install for the project at `project_root`.
///
/// # Errors
/// Any unrecoverable stage failure aborts the install; the lockfile is left
/// untouched in that case.
pub async fn install(project_root: &Path, config: &InstallConfig) -> Result<InstallReport, PkgError> {
    let manifest = Manifest::read_from_dir(project_root)?;
    let lock_manager = LockfileManager::new(project_root);

    let registry = RegistryClient::new(
        &config.registry,
        config.fallback_registry.as_deref(),
        config.token.as_deref(),
    )?;

    let mut report = InstallReport::default();

    let (flat, hints) = if config.frozen {
        report.frozen = true;
        frozen_flat_set(&lock_manager, &manifest, config)?
    } else {
        let resolver = Resolver::new(
            registry.clone(),
            MetadataCache::new(&config.cache_dir),
            ResolveOptions {
                production: config.production,
                offline: config.offline,
                prefer_offline: config.prefer_offline,
                auto_install_peers: config.auto_install_peers,
                strict_peer_dependencies: config.strict_peer_dependencies,
            },
        );
        let resolution = resolver.resolve(&manifest).await?;
        let hints = resolution.direct_hints();
        report.warnings.extend(resolution.warnings);
        (resolution.flat, hints)
    };

    let fetcher = Fetcher::new(
        registry,
        PackageStore::new(&config.store_dir),
        &config.cache_dir,
        config.concurrency,
        config.offline,
    );
    let fetch_set = fetcher.fetch_all(flat.values()).await?;
    report.warnings.extend(fetch_set.warnings.iter().cloned());
    report.total = fetch_set.results.len();
    report.from_cache = fetch_set.results.values().filter(|r| r.from_cache).count();
    report.downloaded = report.total - report.from_cache;

    let linker = Linker::new(project_root);
    let link_report = linker.link(&flat, &fetch_set.results, &hints)?;
    report.linked = link_report.linked;
    report.binaries_installed = link_report.binaries_installed;
    report.warnings.extend(link_report.warnings);

    // The lockfile commits only after the tree is in place; frozen installs
    // already came from it.
    if !config.frozen {
        lock_manager.write(&flat, &manifest)?;
    }

    info!(
        total = report.total,
        downloaded = report.downloaded,
        cached = report.from_cache,
        "install complete"
    );
    Ok(report)
}

/// Frozen mode: the flat set comes from the lockfile, which must exist and
/// match the manifest. Nothing is resolved and no lockfile is written.
fn frozen_flat_set(
    lock_manager: &LockfileManager,
    manifest: &Manifest,
    config: &InstallConfig,
) -> Result<(BTreeMap<String, ResolvedPackage>, BTreeMap<String, String>), PkgError> {
    let Some(lockfile) = lock_manager.read()? else {
        return Err(PkgError::lock_stale(
            "Frozen install requires a lockfile, and none exists",
        ));
    };

    if !lockfile.is_up_to_date(manifest) {
        return Err(PkgError::lock_stale(
            "Lockfile is out of date with the manifest",
        ));
    }

    let mut flat = lockfile.to_resolved();
    if config.production {
        flat.retain(|_, pkg| !pkg.dev);
    }

    let mut direct_names: Vec<&String> = manifest.dependencies.keys().collect();
    if !config.production {
        direct_names.extend(manifest.dev_dependencies.keys());
    }

    let mut hints = BTreeMap::new();
    for name in direct_names {
        if let Some(pkg) = flat.values().find(|pkg| &pkg.name == name) {
            hints.insert(name.clone(), pkg.version.clone());
        }
    }

    Ok((flat, hints))
}
