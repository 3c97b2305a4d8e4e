//! End-to-end install pipeline tests, fully offline.
//!
//! Metadata comes from a pre-seeded disk cache and tarballs from the tarball
//! cache; the registry URL is unroutable, so any accidental network call
//! fails the test.

use base64::Engine;
use dalkey_core::cache::MetadataCache;
use dalkey_core::packument::{Dist, Packument, VersionRecord};
use dalkey_core::{install, InstallConfig, LockfileManager};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tar::{Builder, Header};
use tempfile::{tempdir, TempDir};

fn tarball(name: &str, version: &str, deps: &[(&str, &str)]) -> Vec<u8> {
    let deps_json: BTreeMap<&str, &str> = deps.iter().copied().collect();
    let manifest = serde_json::json!({
        "name": name,
        "version": version,
        "dependencies": deps_json,
    })
    .to_string();

    let mut tar_bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut tar_bytes);

        let mut header = Header::new_ustar();
        header.set_path("package/package.json").unwrap();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, manifest.as_bytes()).unwrap();

        let index = b"module.exports = {};\n";
        let mut header = Header::new_ustar();
        header.set_path("package/index.js").unwrap();
        header.set_size(index.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &index[..]).unwrap();

        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

fn integrity(bytes: &[u8]) -> String {
    format!(
        "sha512-{}",
        base64::engine::general_purpose::STANDARD.encode(Sha512::digest(bytes))
    )
}

/// A tiny offline registry: metadata in the disk cache, tarballs in the
/// tarball cache.
struct FakeRegistry {
    cache_dir: TempDir,
    store_dir: TempDir,
}

impl FakeRegistry {
    fn new() -> Self {
        Self {
            cache_dir: tempdir().unwrap(),
            store_dir: tempdir().unwrap(),
        }
    }

    fn publish(&self, name: &str, versions: &[(&str, &[(&str, &str)])]) {
        let cache = MetadataCache::new(self.cache_dir.path());
        let mut doc = Packument {
            name: name.to_string(),
            ..Packument::default()
        };

        for (version, deps) in versions {
            let tgz = tarball(name, version, deps);
            let tarball_path = self
                .cache_dir
                .path()
                .join("tarballs")
                .join(format!("{}-{version}.tgz", name.replace(['/', '@'], "+")));
            fs::create_dir_all(tarball_path.parent().unwrap()).unwrap();
            fs::write(&tarball_path, &tgz).unwrap();

            doc.versions.insert(
                (*version).to_string(),
                VersionRecord {
                    name: name.to_string(),
                    version: (*version).to_string(),
                    dependencies: deps
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                    dist: Dist {
                        tarball: format!(
                            "https://registry.invalid/{name}/-/{name}-{version}.tgz"
                        ),
                        integrity: Some(integrity(&tgz)),
                        shasum: None,
                    },
                    ..VersionRecord::default()
                },
            );
        }

        if let Some(last) = doc.versions.keys().next_back().cloned() {
            doc.dist_tags.insert("latest".to_string(), last);
        }
        cache.set(name, &doc).unwrap();
    }

    fn config(&self) -> InstallConfig {
        let mut config = InstallConfig::new()
            .with_registry("http://127.0.0.1:1")
            .with_store_dir(self.store_dir.path())
            .with_cache_dir(self.cache_dir.path());
        config.offline = true;
        config
    }
}

fn project_with(manifest: &serde_json::Value) -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("package.json"), manifest.to_string()).unwrap();
    dir
}

fn module_version(project: &Path, name: &str) -> String {
    let manifest: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(project.join("modules").join(name).join("package.json")).unwrap(),
    )
    .unwrap();
    manifest["version"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_install_resolves_fetches_links_and_locks() {
    let registry = FakeRegistry::new();
    registry.publish(
        "a",
        &[
            ("1.0.0", &[("b", "^1.0.0")]),
            ("1.1.0", &[("b", "^1.0.0"), ("c", "^2.0.0")]),
        ],
    );
    registry.publish("b", &[("1.0.0", &[]), ("1.0.5", &[])]);
    registry.publish("c", &[("2.0.1", &[])]);

    let project = project_with(&serde_json::json!({
        "name": "app",
        "dependencies": { "a": "^1.0.0" }
    }));

    let report = install(project.path(), &registry.config()).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.downloaded, 3);
    assert_eq!(report.linked, 3);

    // The hoisted tree holds the maxima the resolver picked.
    assert_eq!(module_version(project.path(), "a"), "1.1.0");
    assert_eq!(module_version(project.path(), "b"), "1.0.5");
    assert_eq!(module_version(project.path(), "c"), "2.0.1");

    // The lockfile records the same flat set.
    let lockfile = LockfileManager::new(project.path()).read().unwrap().unwrap();
    let keys: Vec<&str> = lockfile.packages.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a@1.1.0", "b@1.0.5", "c@2.0.1"]);
}

#[tokio::test]
async fn test_second_install_comes_from_store() {
    let registry = FakeRegistry::new();
    registry.publish("lone", &[("1.0.0", &[])]);

    let project = project_with(&serde_json::json!({
        "name": "app",
        "dependencies": { "lone": "^1.0.0" }
    }));

    let first = install(project.path(), &registry.config()).await.unwrap();
    assert_eq!(first.downloaded, 1);

    let second = install(project.path(), &registry.config()).await.unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.from_cache, 1);
}

#[tokio::test]
async fn test_frozen_install_uses_lockfile() {
    let registry = FakeRegistry::new();
    registry.publish("lone", &[("1.0.0", &[])]);

    let project = project_with(&serde_json::json!({
        "name": "app",
        "dependencies": { "lone": "^1.0.0" }
    }));

    install(project.path(), &registry.config()).await.unwrap();

    // Wipe the module tree; a frozen install must rebuild it from the
    // lockfile without resolving.
    fs::remove_dir_all(project.path().join("modules")).unwrap();

    let mut config = registry.config();
    config.frozen = true;
    let report = install(project.path(), &config).await.unwrap();

    assert!(report.frozen);
    assert_eq!(module_version(project.path(), "lone"), "1.0.0");
}

#[tokio::test]
async fn test_version_conflict_produces_nested_copy() {
    let registry = FakeRegistry::new();
    registry.publish("x", &[("1.0.0", &[]), ("2.0.0", &[])]);
    registry.publish("y", &[("1.0.0", &[("x", "^2.0.0")])]);
    registry.publish("z", &[("1.0.0", &[("x", "^1.0.0")])]);

    let project = project_with(&serde_json::json!({
        "name": "app",
        "dependencies": { "x": "^1.0.0", "y": "^1.0.0", "z": "^1.0.0" }
    }));

    install(project.path(), &registry.config()).await.unwrap();

    // x@1 is hoisted (direct hint); y gets its x@2 nested.
    assert_eq!(module_version(project.path(), "x"), "1.0.0");
    let nested: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(
            project
                .path()
                .join("modules")
                .join("y")
                .join("modules")
                .join("x")
                .join("package.json"),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(nested["version"], "2.0.0");
    // z agrees with the hoisted copy and gets no nested dir.
    assert!(!project
        .path()
        .join("modules")
        .join("z")
        .join("modules")
        .exists());
}

#[tokio::test]
async fn test_scoped_packages_land_under_scope_dirs() {
    let registry = FakeRegistry::new();
    registry.publish("@scope/pkg", &[("1.2.3", &[])]);

    let project = project_with(&serde_json::json!({
        "name": "app",
        "dependencies": { "@scope/pkg": "^1.0.0" }
    }));

    install(project.path(), &registry.config()).await.unwrap();

    assert!(project
        .path()
        .join("modules")
        .join("@scope")
        .join("pkg")
        .join("package.json")
        .exists());
}
