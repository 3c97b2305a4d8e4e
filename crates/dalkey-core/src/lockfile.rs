//! Lockfile reading, writing, and validation.
//!
//! The lockfile binds a manifest to the exact flat set an install produced:
//! reproducible installs re-read it instead of resolving. Determinism is part
//! of the format contract: keys are lexicographically ordered, empty sub-maps
//! and false flags are omitted, output is two-space indented JSON with a
//! single trailing newline, and writes are atomic.

use crate::error::{codes, PkgError};
use crate::manifest::Manifest;
use crate::resolve::ResolvedPackage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lockfile filename.
pub const LOCKFILE_NAME: &str = "dalkey.lock";

/// Schema version for the lockfile format.
pub const LOCK_SCHEMA_VERSION: u32 = 1;

/// A locked package entry: the projection of a resolved package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedRecord {
    pub version: String,
    /// Tarball URL the package resolves to.
    pub resolved: String,
    /// Integrity string (`algo-base64`).
    pub integrity: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "peerDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bin: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dev: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !b
}

/// The complete lockfile document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    /// `name@version` -> locked record.
    #[serde(default)]
    pub packages: BTreeMap<String, LockedRecord>,
}

impl Lockfile {
    /// Build a lockfile from a flat resolution set and the manifest it came from.
    #[must_use]
    pub fn from_flat(flat: &BTreeMap<String, ResolvedPackage>, manifest: &Manifest) -> Self {
        let packages = flat
            .iter()
            .map(|(key, pkg)| {
                (
                    key.clone(),
                    LockedRecord {
                        version: pkg.version.clone(),
                        resolved: pkg.tarball.clone(),
                        integrity: pkg.integrity.clone(),
                        dependencies: pkg.dependencies.clone(),
                        peer_dependencies: pkg.peer_dependencies.clone(),
                        optional_dependencies: pkg.optional_dependencies.clone(),
                        bin: pkg.bin.clone(),
                        optional: pkg.optional,
                        dev: pkg.dev,
                    },
                )
            })
            .collect();

        Self {
            version: LOCK_SCHEMA_VERSION,
            dependencies: manifest.dependencies.clone(),
            dev_dependencies: manifest.dev_dependencies.clone(),
            packages,
        }
    }

    /// Rebuild the flat set from the lockfile.
    ///
    /// Keys split at their last `@` so scoped names survive; empty sub-maps
    /// come back as empty maps for downstream consumers.
    #[must_use]
    pub fn to_resolved(&self) -> BTreeMap<String, ResolvedPackage> {
        self.packages
            .iter()
            .filter_map(|(key, record)| {
                let (name, _) = key.rsplit_once('@')?;
                Some((
                    key.clone(),
                    ResolvedPackage {
                        name: name.to_string(),
                        version: record.version.clone(),
                        tarball: record.resolved.clone(),
                        integrity: record.integrity.clone(),
                        dependencies: record.dependencies.clone(),
                        optional_dependencies: record.optional_dependencies.clone(),
                        peer_dependencies: record.peer_dependencies.clone(),
                        bin: record.bin.clone(),
                        optional: record.optional,
                        dev: record.dev,
                    },
                ))
            })
            .collect()
    }

    /// Whether the lockfile still matches the manifest's declared ranges.
    ///
    /// Any added, removed, or re-ranged entry in either dependency section
    /// marks the lockfile out of date.
    #[must_use]
    pub fn is_up_to_date(&self, manifest: &Manifest) -> bool {
        self.dependencies == manifest.dependencies
            && self.dev_dependencies == manifest.dev_dependencies
    }
}

/// Manages the lockfile of one project.
#[derive(Debug, Clone)]
pub struct LockfileManager {
    path: PathBuf,
}

impl LockfileManager {
    /// Create a manager for a project root.
    #[must_use]
    pub fn new(project_root: &Path) -> Self {
        Self {
            path: project_root.join(LOCKFILE_NAME),
        }
    }

    /// The lockfile path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a lockfile exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the lockfile, if present.
    ///
    /// # Errors
    /// Returns `PKG_LOCK_INVALID_JSON` for unparseable content and
    /// `PKG_LOCK_VERSION_MISMATCH` when the schema version differs.
    pub fn read(&self) -> Result<Option<Lockfile>, PkgError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PkgError::new(
                    codes::PKG_LOCK_INVALID_JSON,
                    format!("Failed to read lockfile: {e}"),
                ))
            }
        };

        let lockfile: Lockfile = serde_json::from_str(&content).map_err(|e| {
            PkgError::new(codes::PKG_LOCK_INVALID_JSON, format!("Invalid lockfile JSON: {e}"))
        })?;

        if lockfile.version != LOCK_SCHEMA_VERSION {
            return Err(PkgError::lock_version_mismatch(
                lockfile.version,
                LOCK_SCHEMA_VERSION,
            ));
        }

        Ok(Some(lockfile))
    }

    /// Write the lockfile for a flat set, atomically.
    ///
    /// # Errors
    /// Returns `PKG_LOCK_WRITE_FAILED` if serialization or the write fails.
    pub fn write(
        &self,
        flat: &BTreeMap<String, ResolvedPackage>,
        manifest: &Manifest,
    ) -> Result<(), PkgError> {
        let lockfile = Lockfile::from_flat(flat, manifest);

        let mut content = serde_json::to_string_pretty(&lockfile).map_err(|e| {
            PkgError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to serialize lockfile: {e}"),
            )
        })?;
        content.push('\n');

        dalkey_util::fs::atomic_write(&self.path, content.as_bytes()).map_err(|e| {
            PkgError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to write lockfile: {e}"),
            )
        })
    }
}
