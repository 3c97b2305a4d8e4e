//! Module tree linker.
//!
//! Materializes the fetched packages into the per-project `modules/` tree:
//! one hoisted version per name at the top level, conflicting versions nested
//! under the parents that require them, binaries shimmed into `.bin/`. Files
//! are hardlinked out of the store (copy on cross-device failure), so the
//! tree shares bytes with the store and the store stays immutable.

use crate::error::PkgError;
use crate::fetch::FetchResult;
use crate::paths::MODULES_DIR;
use crate::resolve::ResolvedPackage;
use crate::store::META_NAME;
use crate::version::{max_satisfying, parse_version, Range};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marker filename inside the module tree.
pub const MARKER_NAME: &str = ".marker";

/// Binary shim directory inside the module tree.
pub const BIN_DIR: &str = ".bin";

/// Marker schema version.
const MARKER_SCHEMA: u32 = 1;

/// Document identifying the module tree as tool-owned.
#[derive(Debug, Serialize, Deserialize)]
pub struct Marker {
    pub schema: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Result of a link run.
#[derive(Debug, Default)]
pub struct LinkReport {
    /// Package instances materialized (hoisted and nested).
    pub linked: usize,
    pub binaries_installed: usize,
    pub warnings: Vec<String>,
}

/// Materializes a resolution into a project's module tree.
pub struct Linker {
    modules_dir: PathBuf,
}

impl Linker {
    /// Create a linker for a project root.
    #[must_use]
    pub fn new(project_root: &Path) -> Self {
        Self {
            modules_dir: project_root.join(MODULES_DIR),
        }
    }

    /// The module tree directory this linker manages.
    #[must_use]
    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Link the flat set into the module tree.
    ///
    /// `fetched` maps `name@version` keys to store entries; packages without
    /// a fetch result (skipped optionals) are left out of the tree.
    /// `direct_hints` are the versions chosen for the project's own manifest
    /// entries and take precedence when hoisting.
    ///
    /// # Errors
    /// Returns `PKG_LINK_FAILED` on filesystem failures.
    pub fn link(
        &self,
        flat: &BTreeMap<String, ResolvedPackage>,
        fetched: &BTreeMap<String, FetchResult>,
        direct_hints: &BTreeMap<String, String>,
    ) -> Result<LinkReport, PkgError> {
        let mut report = LinkReport::default();

        self.prepare()?;

        // Only packages that actually landed in the store take part.
        let present: Vec<&ResolvedPackage> = flat
            .values()
            .filter(|pkg| fetched.contains_key(&pkg.key()))
            .collect();

        // Group versions per name, keeping first-encountered order for ties.
        let mut groups: HashMap<&str, Vec<&ResolvedPackage>> = HashMap::new();
        for pkg in &present {
            groups.entry(pkg.name.as_str()).or_default().push(*pkg);
        }

        let hoisted = choose_hoisted(&groups, &present, direct_hints);

        // Hoisted packages land at modules/<name>.
        let mut primary_location: HashMap<String, PathBuf> = HashMap::new();
        for (name, version) in &hoisted {
            let key = format!("{name}@{version}");
            let Some(result) = fetched.get(&key) else {
                continue;
            };
            let dest = package_dir(&self.modules_dir, name)?;
            copy_tree(&result.path, &dest)?;
            primary_location.insert(key, dest);
            report.linked += 1;
        }

        // Every parent whose resolved edge disagrees with the hoisted choice
        // gets its required version nested under itself.
        let mut nested_done: HashSet<(String, String)> = HashSet::new();
        for parent in &present {
            for (dep_name, dep_range) in parent
                .dependencies
                .iter()
                .chain(parent.optional_dependencies.iter())
            {
                let Some(required) = resolve_edge(&groups, dep_name, dep_range) else {
                    continue;
                };
                if hoisted.get(dep_name.as_str()).map(String::as_str) == Some(required.as_str()) {
                    continue;
                }

                let nest_key = (parent.name.clone(), dep_name.clone());
                if !nested_done.insert(nest_key) {
                    continue;
                }

                let key = format!("{dep_name}@{required}");
                let Some(result) = fetched.get(&key) else {
                    continue;
                };

                let parent_dir = package_dir(&self.modules_dir, &parent.name)?;
                let dest = package_dir(&parent_dir.join(MODULES_DIR), dep_name)?;
                debug!(parent = %parent.name, dep = %key, "nesting conflicting version");
                copy_tree(&result.path, &dest)?;
                primary_location.entry(key).or_insert(dest);
                report.linked += 1;
            }
        }

        self.install_binaries(&present, &primary_location, &mut report)?;

        self.write_marker()?;

        info!(
            linked = report.linked,
            binaries = report.binaries_installed,
            "link complete"
        );
        Ok(report)
    }

    /// Clean the existing tree and recreate the skeleton.
    ///
    /// Visible entries are removed; hidden entries are preserved to protect
    /// tool-managed caches. The marker is what authorizes treating the tree
    /// as ours; it is rewritten at the end of every run.
    fn prepare(&self) -> Result<(), PkgError> {
        if self.modules_dir.exists() {
            let marker = self.read_marker();
            if marker.is_none() {
                debug!("module tree has no marker, cleaning conservatively");
            }

            for entry in fs::read_dir(&self.modules_dir)
                .map_err(|e| PkgError::link_failed(format!("Failed to read module tree: {e}")))?
                .flatten()
            {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                remove_entry(&entry.path())?;
            }
        }

        let bin_dir = self.modules_dir.join(BIN_DIR);
        if bin_dir.exists() {
            fs::remove_dir_all(&bin_dir)
                .map_err(|e| PkgError::link_failed(format!("Failed to clear .bin: {e}")))?;
        }
        fs::create_dir_all(&bin_dir)
            .map_err(|e| PkgError::link_failed(format!("Failed to create .bin: {e}")))?;

        Ok(())
    }

    fn read_marker(&self) -> Option<Marker> {
        let content = fs::read(self.modules_dir.join(MARKER_NAME)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    fn write_marker(&self) -> Result<(), PkgError> {
        let marker = Marker {
            schema: MARKER_SCHEMA,
            created_at: chrono::Utc::now(),
        };
        let content = serde_json::to_vec(&marker)
            .map_err(|e| PkgError::link_failed(format!("Failed to serialize marker: {e}")))?;
        dalkey_util::fs::atomic_write(&self.modules_dir.join(MARKER_NAME), &content)
            .map_err(|e| PkgError::link_failed(format!("Failed to write marker: {e}")))
    }

    /// Install binary entry points into `.bin/`.
    fn install_binaries(
        &self,
        present: &[&ResolvedPackage],
        primary_location: &HashMap<String, PathBuf>,
        report: &mut LinkReport,
    ) -> Result<(), PkgError> {
        let bin_dir = self.modules_dir.join(BIN_DIR);

        for pkg in present {
            if pkg.bin.is_empty() {
                continue;
            }
            let Some(pkg_dir) = primary_location.get(&pkg.key()) else {
                continue;
            };

            for (bin_name, bin_path) in &pkg.bin {
                let link_path = bin_dir.join(bin_name);
                if link_path.symlink_metadata().is_ok() {
                    report.warnings.push(format!(
                        "Binary name collision: {bin_name} (last writer {} wins)",
                        pkg.key()
                    ));
                    remove_entry(&link_path)?;
                }

                install_binary(&self.modules_dir, &bin_dir, pkg_dir, bin_name, bin_path)?;
                report.binaries_installed += 1;
            }
        }

        Ok(())
    }
}

/// Choose the hoisted version per name: direct hint first, then the version
/// most dependents resolve to, ties broken by first-encountered order.
fn choose_hoisted(
    groups: &HashMap<&str, Vec<&ResolvedPackage>>,
    present: &[&ResolvedPackage],
    direct_hints: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    // Multiplicity: how many dependents resolve each (name, version) edge.
    let mut multiplicity: HashMap<(&str, String), usize> = HashMap::new();
    for parent in present {
        for (dep_name, dep_range) in parent
            .dependencies
            .iter()
            .chain(parent.optional_dependencies.iter())
        {
            if let Some(version) = resolve_edge(groups, dep_name, dep_range) {
                *multiplicity
                    .entry((dep_name.as_str(), version))
                    .or_insert(0) += 1;
            }
        }
    }

    let mut hoisted = BTreeMap::new();
    for (name, versions) in groups {
        if let Some(hint) = direct_hints.get(*name) {
            if versions.iter().any(|pkg| &pkg.version == hint) {
                hoisted.insert((*name).to_string(), hint.clone());
                continue;
            }
        }

        let mut best: Option<(&ResolvedPackage, usize)> = None;
        for pkg in versions {
            let count = multiplicity
                .get(&(*name, pkg.version.clone()))
                .copied()
                .unwrap_or(0);
            // Strictly-greater keeps the first encountered on ties.
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((*pkg, count));
            }
        }

        if let Some((pkg, _)) = best {
            hoisted.insert((*name).to_string(), pkg.version.clone());
        }
    }

    hoisted
}

/// Resolve a dependency edge against the versions present in the flat set.
fn resolve_edge(
    groups: &HashMap<&str, Vec<&ResolvedPackage>>,
    dep_name: &str,
    dep_range: &str,
) -> Option<String> {
    let candidates = groups.get(dep_name)?;
    let range = Range::parse(dep_range);

    let versions: Vec<Version> = candidates
        .iter()
        .filter_map(|pkg| parse_version(&pkg.version))
        .collect();

    max_satisfying(&versions, &range)
        .map(std::string::ToString::to_string)
        .or_else(|| {
            // An edge no present version satisfies (e.g. an alias range):
            // fall back to the only version installed under that name.
            if candidates.len() == 1 {
                Some(candidates[0].version.clone())
            } else {
                None
            }
        })
}

/// Directory for a package under `base`, creating scope directories.
fn package_dir(base: &Path, name: &str) -> Result<PathBuf, PkgError> {
    if let Some(rest) = name.strip_prefix('@') {
        let Some((scope, local)) = rest.split_once('/') else {
            return Err(PkgError::link_failed(format!(
                "Invalid scoped package name: {name}"
            )));
        };
        let scope_dir = base.join(format!("@{scope}"));
        fs::create_dir_all(&scope_dir).map_err(|e| {
            PkgError::link_failed(format!("Failed to create scope directory @{scope}: {e}"))
        })?;
        Ok(scope_dir.join(local))
    } else {
        fs::create_dir_all(base)
            .map_err(|e| PkgError::link_failed(format!("Failed to create {}: {e}", base.display())))?;
        Ok(base.join(name))
    }
}

/// Recreate `src` at `dst`: directories created, files hardlinked (copied on
/// failure), symlinks recreated with the same target text. The store's
/// metadata sidecar is not part of the package payload and is skipped.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), PkgError> {
    if dst.exists() {
        remove_entry(dst)?;
    }
    copy_tree_inner(src, dst, true)
}

fn copy_tree_inner(src: &Path, dst: &Path, top_level: bool) -> Result<(), PkgError> {
    fs::create_dir_all(dst)
        .map_err(|e| PkgError::link_failed(format!("Failed to create {}: {e}", dst.display())))?;

    for entry in fs::read_dir(src)
        .map_err(|e| PkgError::link_failed(format!("Failed to read {}: {e}", src.display())))?
    {
        let entry = entry
            .map_err(|e| PkgError::link_failed(format!("Failed to read entry: {e}")))?;
        let file_name = entry.file_name();

        if top_level && file_name.to_string_lossy() == META_NAME {
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&file_name);
        let file_type = entry
            .file_type()
            .map_err(|e| PkgError::link_failed(format!("Failed to stat entry: {e}")))?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path).map_err(|e| {
                PkgError::link_failed(format!("Failed to read symlink {}: {e}", src_path.display()))
            })?;
            recreate_symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_tree_inner(&src_path, &dst_path, false)?;
        } else {
            // Hardlink shares bytes with the immutable store entry.
            if fs::hard_link(&src_path, &dst_path).is_err() {
                fs::copy(&src_path, &dst_path).map_err(|e| {
                    PkgError::link_failed(format!(
                        "Failed to copy {} to {}: {e}",
                        src_path.display(),
                        dst_path.display()
                    ))
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn recreate_symlink(target: &Path, dst: &Path) -> Result<(), PkgError> {
    std::os::unix::fs::symlink(target, dst).map_err(|e| {
        PkgError::link_failed(format!(
            "Failed to create symlink {} -> {}: {e}",
            dst.display(),
            target.display()
        ))
    })
}

#[cfg(not(unix))]
fn recreate_symlink(_target: &Path, _dst: &Path) -> Result<(), PkgError> {
    Ok(())
}

/// Remove a file, symlink, or directory tree.
fn remove_entry(path: &Path) -> Result<(), PkgError> {
    let Ok(metadata) = path.symlink_metadata() else {
        return Ok(());
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|e| PkgError::link_failed(format!("Failed to remove {}: {e}", path.display())))
}

/// Install one binary: a relative symlink on Unix, node shims on Windows.
fn install_binary(
    modules_dir: &Path,
    bin_dir: &Path,
    pkg_dir: &Path,
    bin_name: &str,
    bin_path: &str,
) -> Result<(), PkgError> {
    let bin_rel = bin_path.trim_start_matches("./");
    let target_abs = pkg_dir.join(bin_rel);
    let link_path = bin_dir.join(bin_name);

    #[cfg(unix)]
    {
        // .bin lives directly under modules/, so the relative target is one
        // level up plus the package-relative path.
        let target_rel = pkg_dir
            .strip_prefix(modules_dir)
            .map(|p| Path::new("..").join(p).join(bin_rel))
            .unwrap_or_else(|_| target_abs.clone());

        std::os::unix::fs::symlink(&target_rel, &link_path).map_err(|e| {
            PkgError::link_failed(format!(
                "Failed to create binary symlink {} -> {}: {e}",
                link_path.display(),
                target_rel.display()
            ))
        })?;

        // Ensure the target is executable; a missing bit would make the shim
        // useless. Failures here are not fatal.
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(&target_abs) {
            let mut perms = metadata.permissions();
            perms.set_mode(perms.mode() | 0o111);
            let _ = fs::set_permissions(&target_abs, perms);
        }
    }

    #[cfg(windows)]
    {
        let _ = modules_dir;
        let cmd_path = bin_dir.join(format!("{bin_name}.cmd"));
        let cmd_body = format!("@ECHO off\r\nnode \"{}\" %*\r\n", target_abs.display());
        fs::write(&cmd_path, cmd_body).map_err(|e| {
            PkgError::link_failed(format!("Failed to create cmd shim {}: {e}", cmd_path.display()))
        })?;

        let ps1_path = bin_dir.join(format!("{bin_name}.ps1"));
        let ps1_body = format!(
            "#!/usr/bin/env pwsh\r\n& node \"{}\" $args\r\nexit $LASTEXITCODE\r\n",
            target_abs.display()
        );
        fs::write(&ps1_path, ps1_body).map_err(|e| {
            PkgError::link_failed(format!("Failed to create ps1 shim {}: {e}", ps1_path.display()))
        })?;
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (modules_dir, target_abs, link_path);
    }

    Ok(())
}
