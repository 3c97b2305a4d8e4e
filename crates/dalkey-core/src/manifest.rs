//! Project manifest reading.
//!
//! The manifest is the project's declarative package document. The pipeline
//! consumes the dependency sections, peer metadata, and the bin descriptor;
//! `scripts` is parsed but never executed here (lifecycle hooks are a
//! boundary of the install pipeline, not part of it).

use crate::error::PkgError;
use crate::packument::{BinField, PeerMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest filename.
pub const MANIFEST_NAME: &str = "package.json";

/// A parsed project manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
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
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
}

impl Manifest {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    /// Returns an error if the file is missing or not valid JSON.
    pub fn read_from(path: &Path) -> Result<Self, PkgError> {
        if !path.exists() {
            return Err(PkgError::manifest_not_found(path));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PkgError::manifest_invalid(format!("Failed to read: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| PkgError::manifest_invalid(format!("Invalid JSON: {e}")))
    }

    /// Read the manifest from a project directory.
    ///
    /// # Errors
    /// Returns an error if `package.json` is missing or invalid.
    pub fn read_from_dir(project_root: &Path) -> Result<Self, PkgError> {
        Self::read_from(&project_root.join(MANIFEST_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_manifest() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            serde_json::json!({
                "name": "my-app",
                "version": "1.0.0",
                "dependencies": { "lodash": "^4.17.0" },
                "devDependencies": { "typescript": "^5.0.0" },
                "optionalDependencies": { "fsevents": "^2.0.0" },
                "peerDependencies": { "react": "^18.0.0" },
                "peerDependenciesMeta": { "react": { "optional": true } },
                "scripts": { "postinstall": "echo done" }
            })
            .to_string(),
        )
        .unwrap();

        let manifest = Manifest::read_from_dir(dir.path()).unwrap();
        assert_eq!(manifest.name, "my-app");
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(manifest.dev_dependencies.len(), 1);
        assert_eq!(manifest.optional_dependencies.len(), 1);
        assert!(manifest.peer_dependencies_meta["react"].optional);
        assert_eq!(manifest.scripts.len(), 1);
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = Manifest::read_from_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_MANIFEST_NOT_FOUND);
    }

    #[test]
    fn test_invalid_manifest_json() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        let err = Manifest::read_from_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_MANIFEST_INVALID);
    }

    #[test]
    fn test_empty_sections_default() {
        let manifest: Manifest = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.dev_dependencies.is_empty());
        assert!(manifest.bin.is_none());
    }
}
