//! Typed registry package documents.
//!
//! The abbreviated packument is the registry view of a package limited to the
//! fields resolution and fetching need: the version map, dist-tags, and per
//! version the dependency maps, bin descriptor, and dist record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Abbreviated package document for one package name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: String,
    /// Symbolic tags (e.g. `latest`) mapping to versions.
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    /// Version string -> version record.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
}

impl Packument {
    /// The version the `latest` dist-tag points at, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }
}

/// One published version of a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "peerDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "peerDependenciesMeta",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub peer_dependencies_meta: BTreeMap<String, PeerMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
    /// Deprecation message, when the version is deprecated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(default)]
    pub dist: Dist,
}

/// Per-peer metadata marking individual peers optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub optional: bool,
}

/// Distribution record: where the tarball lives and how to verify it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Dist {
    /// The canonical integrity string: `dist.integrity`, or `sha1-<shasum>`
    /// synthesized when only the legacy shasum is present.
    #[must_use]
    pub fn integrity_string(&self) -> String {
        if let Some(integrity) = &self.integrity {
            if !integrity.is_empty() {
                return integrity.clone();
            }
        }
        self.shasum
            .as_deref()
            .map(|s| format!("sha1-{s}"))
            .unwrap_or_default()
    }
}

/// The `bin` field: either a single path or a name -> path map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Single(String),
    Map(BTreeMap<String, String>),
}

impl BinField {
    /// Normalize into a name -> relative path map.
    ///
    /// The string form uses the package name without its scope as the
    /// binary name.
    #[must_use]
    pub fn normalized(&self, pkg_name: &str) -> BTreeMap<String, String> {
        match self {
            Self::Single(path) => {
                let bin_name = pkg_name.rsplit('/').next().unwrap_or(pkg_name);
                let mut map = BTreeMap::new();
                map.insert(bin_name.to_string(), path.clone());
                map
            }
            Self::Map(map) => map.clone(),
        }
    }
}
