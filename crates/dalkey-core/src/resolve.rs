//! Parallel dependency resolution.
//!
//! Resolution walks the dependency graph concurrently: every sibling resolves
//! in its own task, metadata lookups for the same name coalesce into a single
//! fetch through a shared-future map, and the flat result map applies a
//! first-writer-wins rule per `name@version` so racing paths converge on one
//! record.

use crate::cache::MetadataCache;
use crate::error::PkgError;
use crate::manifest::Manifest;
use crate::packument::Packument;
use crate::registry::RegistryClient;
use crate::version::{max_satisfying, parse_version, Range};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use semver::Version;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Resolver options, taken from the install configuration.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Skip devDependencies.
    pub production: bool,
    /// Never touch the network; metadata must come from the cache.
    pub offline: bool,
    /// Accept stale cached metadata instead of revalidating.
    pub prefer_offline: bool,
    /// Resolve peer dependencies as if they were regular dependencies.
    pub auto_install_peers: bool,
    /// Treat optional peers as required and fail on peer resolution errors.
    pub strict_peer_dependencies: bool,
}

/// A node handed back for each direct dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    pub version: String,
    pub dev: bool,
    pub optional: bool,
    pub peer: bool,
}

/// One entry of the flat resolution set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Declared name: for `npm:` aliases this is the alias, not the real name.
    pub name: String,
    pub version: String,
    pub tarball: String,
    /// Canonical integrity string (`algo-base64`, or `sha1-<shasum>`).
    pub integrity: String,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub peer_dependencies: BTreeMap<String, String>,
    /// Normalized bin map (name -> relative executable path).
    pub bin: BTreeMap<String, String>,
    pub optional: bool,
    pub dev: bool,
}

impl ResolvedPackage {
    /// The canonical `name@version` key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// The output of a resolution run.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Direct dependency name -> resolved node.
    pub root: BTreeMap<String, DependencyNode>,
    /// `name@version` -> resolved package.
    pub flat: BTreeMap<String, ResolvedPackage>,
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Direct-dependency version hints for the linker's hoisting pass.
    #[must_use]
    pub fn direct_hints(&self) -> BTreeMap<String, String> {
        self.root
            .iter()
            .map(|(name, node)| (name.clone(), node.version.clone()))
            .collect()
    }
}

type PackumentFuture = Shared<BoxFuture<'static, Result<Arc<Packument>, PkgError>>>;

struct ResolverInner {
    registry: RegistryClient,
    cache: MetadataCache,
    options: ResolveOptions,
    /// In-memory metadata map: the primary lookup tier.
    packuments: RwLock<HashMap<String, Arc<Packument>>>,
    /// In-flight fetches; concurrent lookups for one name share one future.
    inflight: Mutex<HashMap<String, PackumentFuture>>,
    /// Flat resolution set; first writer wins per key.
    flat: Mutex<BTreeMap<String, ResolvedPackage>>,
    warnings: Mutex<Vec<String>>,
}

/// Parallel dependency resolver.
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

impl Resolver {
    /// Create a resolver over a registry client and metadata cache.
    #[must_use]
    pub fn new(registry: RegistryClient, cache: MetadataCache, options: ResolveOptions) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                registry,
                cache,
                options,
                packuments: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                flat: Mutex::new(BTreeMap::new()),
                warnings: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Preload a package document into the in-memory metadata map.
    ///
    /// Used by tests and warm-start paths; resolution for this name will not
    /// touch the cache or the network.
    pub async fn preload(&self, name: &str, doc: Packument) {
        self.inner
            .packuments
            .write()
            .await
            .insert(name.to_string(), Arc::new(doc));
    }

    /// Resolve the manifest's dependency graph into a flat set.
    ///
    /// # Errors
    /// Returns the first non-demotable failure: metadata lookup errors on
    /// required packages, or ranges no published version satisfies.
    pub async fn resolve(&self, manifest: &Manifest) -> Result<Resolution, PkgError> {
        let mut directs: Vec<(String, String, bool, bool)> = Vec::new();

        // dependencies always; devDependencies unless production;
        // optionalDependencies flagged optional. `dependencies` wins when a
        // name appears in more than one section.
        for (name, range) in &manifest.optional_dependencies {
            directs.push((name.clone(), range.clone(), false, true));
        }
        if !self.inner.options.production {
            for (name, range) in &manifest.dev_dependencies {
                if !manifest.optional_dependencies.contains_key(name) {
                    directs.push((name.clone(), range.clone(), true, false));
                }
            }
        }
        for (name, range) in &manifest.dependencies {
            directs.retain(|(n, _, _, _)| n != name);
            directs.push((name.clone(), range.clone(), false, false));
        }

        let tasks = directs.into_iter().map(|(name, range, dev, optional)| {
            let inner = Arc::clone(&self.inner);
            async move {
                let result = resolve_dep(
                    inner.clone(),
                    name.clone(),
                    range.clone(),
                    dev,
                    optional,
                    false,
                    HashSet::new(),
                )
                .await;
                (name, range, optional, result)
            }
        });

        let mut root = BTreeMap::new();
        for (name, range, optional, result) in futures::future::join_all(tasks).await {
            match result {
                Ok(Some(node)) => {
                    root.insert(name, node);
                }
                Ok(None) => {}
                Err(e) if optional => {
                    self.inner
                        .warnings
                        .lock()
                        .await
                        .push(format!("Skipping optional dependency {name}@{range}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        let flat = self.inner.flat.lock().await.clone();
        let warnings = self.inner.warnings.lock().await.clone();

        debug!(packages = flat.len(), "resolution complete");
        Ok(Resolution {
            root,
            flat,
            warnings,
        })
    }
}

/// Resolve one dependency edge; recursion is boxed for the async call graph.
fn resolve_dep(
    inner: Arc<ResolverInner>,
    declared_name: String,
    range_text: String,
    dev: bool,
    optional: bool,
    peer: bool,
    mut seen: HashSet<String>,
) -> BoxFuture<'static, Result<Option<DependencyNode>, PkgError>> {
    async move {
        // Alias unwrap: `npm:real-name@range` re-targets the metadata lookup
        // while the declared name stays the key the module tree will use.
        let (lookup_name, effective_range) = match range_text.strip_prefix("npm:") {
            Some(rest) => parse_alias_target(rest)?,
            None => (declared_name.clone(), range_text.clone()),
        };

        // Per-path cycle guard. The set is cloned before each descent, so
        // siblings never see each other's entries.
        let seen_key = format!("{declared_name}@{range_text}");
        if !seen.insert(seen_key) {
            return Ok(None);
        }

        let packument = lookup_packument(&inner, &lookup_name).await?;

        let range = Range::parse(&effective_range);
        let parsed: Vec<(Version, &str)> = packument
            .versions
            .keys()
            .filter_map(|raw| parse_version(raw).map(|v| (v, raw.as_str())))
            .collect();
        let versions: Vec<Version> = parsed.iter().map(|(v, _)| v.clone()).collect();

        let chosen = max_satisfying(&versions, &range)
            .ok_or_else(|| PkgError::version_not_found(&declared_name, &effective_range))?;
        let chosen_raw = parsed
            .iter()
            .find(|(v, _)| v == chosen)
            .map(|(_, raw)| (*raw).to_string())
            .ok_or_else(|| PkgError::version_not_found(&declared_name, &effective_range))?;

        let key = format!("{declared_name}@{chosen_raw}");

        // Reuse an existing record for this key; the node still reflects the
        // current path's flags OR-ed over the record's.
        {
            let flat = inner.flat.lock().await;
            if let Some(existing) = flat.get(&key) {
                return Ok(Some(DependencyNode {
                    name: declared_name,
                    version: chosen_raw,
                    dev: dev || existing.dev,
                    optional: optional || existing.optional,
                    peer,
                }));
            }
        }

        let Some(record) = packument.versions.get(&chosen_raw) else {
            return Err(PkgError::version_not_found(&declared_name, &effective_range));
        };

        let resolved = ResolvedPackage {
            name: declared_name.clone(),
            version: chosen_raw.clone(),
            tarball: record.dist.tarball.clone(),
            integrity: record.dist.integrity_string(),
            dependencies: record.dependencies.clone(),
            optional_dependencies: record.optional_dependencies.clone(),
            peer_dependencies: record.peer_dependencies.clone(),
            bin: record
                .bin
                .as_ref()
                .map(|b| b.normalized(&lookup_name))
                .unwrap_or_default(),
            optional,
            dev,
        };

        // First writer wins: a concurrent task may have inserted this key
        // between the reuse check and here.
        {
            let mut flat = inner.flat.lock().await;
            flat.entry(key.clone()).or_insert(resolved);
        }

        if let Some(message) = &record.deprecated {
            inner
                .warnings
                .lock()
                .await
                .push(format!("{key} is deprecated: {message}"));
        }

        // Transitive edges: regular deps, optional deps, and peers when
        // auto-install is on (optional-marked peers only under strict mode).
        let mut edges: Vec<(String, String, bool, bool)> = Vec::new();
        for (name, range) in &record.dependencies {
            edges.push((name.clone(), range.clone(), optional, false));
        }
        for (name, range) in &record.optional_dependencies {
            edges.push((name.clone(), range.clone(), true, false));
        }
        if inner.options.auto_install_peers {
            for (name, range) in &record.peer_dependencies {
                let peer_optional = record
                    .peer_dependencies_meta
                    .get(name)
                    .is_some_and(|meta| meta.optional);
                if peer_optional && !inner.options.strict_peer_dependencies {
                    continue;
                }
                edges.push((name.clone(), range.clone(), optional, true));
            }
        }

        let tasks = edges.into_iter().map(|(name, range, edge_optional, edge_peer)| {
            let inner = Arc::clone(&inner);
            let seen = seen.clone();
            async move {
                let result = resolve_dep(
                    inner,
                    name.clone(),
                    range.clone(),
                    dev,
                    edge_optional,
                    edge_peer,
                    seen,
                )
                .await;
                (name, range, edge_optional, edge_peer, result)
            }
        });

        for (name, range, edge_optional, edge_peer, result) in
            futures::future::join_all(tasks).await
        {
            if let Err(e) = result {
                let demote = edge_optional
                    || (edge_peer && !inner.options.strict_peer_dependencies);
                if demote {
                    warn!(%name, %range, error = %e, "skipping unresolvable dependency");
                    inner
                        .warnings
                        .lock()
                        .await
                        .push(format!("Skipping {name}@{range} (required by {key}): {e}"));
                } else {
                    return Err(e);
                }
            }
        }

        Ok(Some(DependencyNode {
            name: declared_name,
            version: chosen_raw,
            dev,
            optional,
            peer,
        }))
    }
    .boxed()
}

/// Look up a packument: memory, then a coalesced in-flight fetch that falls
/// through to the disk cache and finally the network.
async fn lookup_packument(
    inner: &Arc<ResolverInner>,
    name: &str,
) -> Result<Arc<Packument>, PkgError> {
    if let Some(doc) = inner.packuments.read().await.get(name) {
        return Ok(Arc::clone(doc));
    }

    let future = {
        let mut inflight = inner.inflight.lock().await;
        if let Some(existing) = inflight.get(name) {
            existing.clone()
        } else {
            let inner = Arc::clone(inner);
            let name_owned = name.to_string();
            let name = name_owned.clone();
            let future: PackumentFuture = async move { fetch_packument(&inner, &name).await }
                .boxed()
                .shared();
            inflight.insert(name_owned, future.clone());
            future
        }
    };

    let result = future.await;

    {
        let mut inflight = inner.inflight.lock().await;
        inflight.remove(name);
    }

    if let Ok(doc) = &result {
        inner
            .packuments
            .write()
            .await
            .insert(name.to_string(), Arc::clone(doc));
    }

    result
}

/// The un-coalesced fetch path: disk cache, then network.
async fn fetch_packument(
    inner: &Arc<ResolverInner>,
    name: &str,
) -> Result<Arc<Packument>, PkgError> {
    let cached = if inner.options.prefer_offline || inner.options.offline {
        inner.cache.get_stale(name)
    } else {
        inner.cache.get(name)
    };

    if let Some(doc) = cached {
        return Ok(Arc::new(doc));
    }

    if inner.options.offline {
        return Err(PkgError::offline_miss(name));
    }

    let doc = inner.registry.get_abbreviated(name).await?;
    if let Err(e) = inner.cache.set(name, &doc) {
        warn!(%name, error = %e, "failed to write metadata cache entry");
    }
    Ok(Arc::new(doc))
}

/// Parse the target of an `npm:` alias: `real-name[@range]`, scope-aware.
fn parse_alias_target(rest: &str) -> Result<(String, String), PkgError> {
    if rest.is_empty() {
        return Err(PkgError::spec_invalid("Empty npm: alias target"));
    }

    // The name may itself start with '@' (a scope), so only an '@' past the
    // first character separates the range.
    let split_at = rest[1..].find('@').map(|i| i + 1);

    match split_at {
        Some(i) => {
            let (name, range) = rest.split_at(i);
            let range = &range[1..];
            if name.is_empty() || range.is_empty() {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid npm: alias target '{rest}'"
                )));
            }
            Ok((name.to_string(), range.to_string()))
        }
        None => Ok((rest.to_string(), "*".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packument::{Dist, VersionRecord};
    use tempfile::tempdir;

    fn record(version: &str, deps: &[(&str, &str)]) -> VersionRecord {
        VersionRecord {
            version: version.to_string(),
            dependencies: deps
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            dist: Dist {
                tarball: format!("https://registry.example.com/t/{version}.tgz"),
                shasum: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
                integrity: Some(format!("sha512-{version}")),
                ..Dist::default()
            },
            ..VersionRecord::default()
        }
    }

    fn packument(name: &str, records: Vec<VersionRecord>) -> Packument {
        let mut doc = Packument {
            name: name.to_string(),
            ..Packument::default()
        };
        for rec in records {
            doc.versions.insert(rec.version.clone(), rec);
        }
        if let Some(last) = doc.versions.keys().next_back().cloned() {
            doc.dist_tags.insert("latest".to_string(), last);
        }
        doc
    }

    fn manifest(deps: &[(&str, &str)]) -> Manifest {
        Manifest {
            name: "test-app".to_string(),
            dependencies: deps
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Manifest::default()
        }
    }

    fn test_resolver(options: ResolveOptions) -> (Resolver, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // The registry URL is unroutable: any network call fails the test.
        let registry = RegistryClient::new("http://127.0.0.1:1", None, None).unwrap();
        let cache = MetadataCache::new(dir.path());
        (Resolver::new(registry, cache, options), dir)
    }

    #[tokio::test]
    async fn test_flat_set_from_seeded_metadata() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());

        resolver
            .preload(
                "a",
                packument(
                    "a",
                    vec![
                        record("1.0.0", &[("b", "^1.0.0")]),
                        record("1.1.0", &[("b", "^1.0.0"), ("c", "^2.0.0")]),
                    ],
                ),
            )
            .await;
        resolver
            .preload("b", packument("b", vec![record("1.0.0", &[]), record("1.0.5", &[])]))
            .await;
        resolver
            .preload("c", packument("c", vec![record("2.0.1", &[])]))
            .await;

        let manifest = manifest(&[("a", "^1.0.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();

        let keys: Vec<&str> = resolution.flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a@1.1.0", "b@1.0.5", "c@2.0.1"]);
        assert_eq!(resolution.root["a"].version, "1.1.0");
    }

    #[tokio::test]
    async fn test_no_satisfying_version() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());
        resolver
            .preload("a", packument("a", vec![record("1.0.0", &[])]))
            .await;

        let manifest = manifest(&[("a", "^9.0.0")]);
        let err = resolver.resolve(&manifest).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_VERSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_optional_failure_is_warning() {
        let (resolver, _dir) = test_resolver(ResolveOptions {
            offline: true,
            ..ResolveOptions::default()
        });
        resolver
            .preload("a", packument("a", vec![record("1.0.0", &[])]))
            .await;

        let mut m = manifest(&[("a", "^1.0.0")]);
        m.optional_dependencies
            .insert("missing".to_string(), "^1.0.0".to_string());

        let resolution = resolver.resolve(&m).await.unwrap();
        assert!(resolution.flat.contains_key("a@1.0.0"));
        assert!(!resolution.flat.keys().any(|k| k.starts_with("missing@")));
        assert!(!resolution.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_fails() {
        let (resolver, _dir) = test_resolver(ResolveOptions {
            offline: true,
            ..ResolveOptions::default()
        });

        let manifest = manifest(&[("missing", "^1.0.0")]);
        let err = resolver.resolve(&manifest).await.unwrap_err();
        assert_eq!(err.code(), crate::error::codes::PKG_OFFLINE_MISS);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());
        resolver
            .preload("a", packument("a", vec![record("1.0.0", &[("b", "^1.0.0")])]))
            .await;
        resolver
            .preload("b", packument("b", vec![record("1.0.0", &[("a", "^1.0.0")])]))
            .await;

        let manifest = manifest(&[("a", "^1.0.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();

        assert!(resolution.flat.contains_key("a@1.0.0"));
        assert!(resolution.flat.contains_key("b@1.0.0"));
    }

    #[tokio::test]
    async fn test_dev_dependencies_skipped_in_production() {
        let (resolver, _dir) = test_resolver(ResolveOptions {
            production: true,
            ..ResolveOptions::default()
        });
        resolver
            .preload("a", packument("a", vec![record("1.0.0", &[])]))
            .await;
        resolver
            .preload("tsc", packument("tsc", vec![record("5.0.0", &[])]))
            .await;

        let mut m = manifest(&[("a", "^1.0.0")]);
        m.dev_dependencies
            .insert("tsc".to_string(), "^5.0.0".to_string());

        let resolution = resolver.resolve(&m).await.unwrap();
        assert!(resolution.flat.contains_key("a@1.0.0"));
        assert!(!resolution.flat.contains_key("tsc@5.0.0"));
    }

    #[tokio::test]
    async fn test_dev_flag_recorded() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());
        resolver
            .preload("tsc", packument("tsc", vec![record("5.0.0", &[])]))
            .await;

        let mut m = manifest(&[]);
        m.dev_dependencies
            .insert("tsc".to_string(), "^5.0.0".to_string());

        let resolution = resolver.resolve(&m).await.unwrap();
        assert!(resolution.flat["tsc@5.0.0"].dev);
    }

    #[tokio::test]
    async fn test_alias_resolves_real_name_under_declared_key() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());
        resolver
            .preload(
                "string-width",
                packument("string-width", vec![record("4.2.3", &[])]),
            )
            .await;

        let manifest = manifest(&[("string-width-cjs", "npm:string-width@^4.2.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();

        // The module tree key is the alias; the tarball is the real package's.
        let pkg = &resolution.flat["string-width-cjs@4.2.3"];
        assert_eq!(pkg.name, "string-width-cjs");
        assert!(pkg.tarball.contains("4.2.3"));
    }

    #[tokio::test]
    async fn test_deprecated_version_warns() {
        let (resolver, _dir) = test_resolver(ResolveOptions::default());
        let mut rec = record("1.0.0", &[]);
        rec.deprecated = Some("use something else".to_string());
        resolver.preload("old", packument("old", vec![rec])).await;

        let manifest = manifest(&[("old", "^1.0.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();
        assert!(resolution
            .warnings
            .iter()
            .any(|w| w.contains("deprecated")));
    }

    #[tokio::test]
    async fn test_peers_resolved_when_auto_install() {
        let (resolver, _dir) = test_resolver(ResolveOptions {
            auto_install_peers: true,
            ..ResolveOptions::default()
        });

        let mut rec = record("1.0.0", &[]);
        rec.peer_dependencies
            .insert("react".to_string(), "^18.0.0".to_string());
        resolver.preload("ui-kit", packument("ui-kit", vec![rec])).await;
        resolver
            .preload("react", packument("react", vec![record("18.2.0", &[])]))
            .await;

        let manifest = manifest(&[("ui-kit", "^1.0.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();
        assert!(resolution.flat.contains_key("react@18.2.0"));
    }

    #[tokio::test]
    async fn test_optional_peer_excluded_unless_strict() {
        let mut rec = record("1.0.0", &[]);
        rec.peer_dependencies
            .insert("react".to_string(), "^18.0.0".to_string());
        rec.peer_dependencies_meta.insert(
            "react".to_string(),
            crate::packument::PeerMeta { optional: true },
        );

        let (resolver, _dir) = test_resolver(ResolveOptions {
            auto_install_peers: true,
            ..ResolveOptions::default()
        });
        resolver
            .preload("ui-kit", packument("ui-kit", vec![rec]))
            .await;
        resolver
            .preload("react", packument("react", vec![record("18.2.0", &[])]))
            .await;

        let manifest = manifest(&[("ui-kit", "^1.0.0")]);
        let resolution = resolver.resolve(&manifest).await.unwrap();
        assert!(!resolution.flat.contains_key("react@18.2.0"));
    }

    #[tokio::test]
    async fn test_disk_cache_avoids_network() {
        let dir = tempdir().unwrap();
        let registry = RegistryClient::new("http://127.0.0.1:1", None, None).unwrap();
        let cache = MetadataCache::new(dir.path());
        cache
            .set("a", &packument("a", vec![record("1.0.0", &[])]))
            .unwrap();

        let resolver = Resolver::new(registry, cache, ResolveOptions::default());
        let manifest = manifest(&[("a", "^1.0.0")]);

        // The registry is unroutable, so this only succeeds if the disk cache
        // served the metadata.
        let resolution = resolver.resolve(&manifest).await.unwrap();
        assert!(resolution.flat.contains_key("a@1.0.0"));
    }

    #[test]
    fn test_parse_alias_target() {
        assert_eq!(
            parse_alias_target("string-width@^4.2.0").unwrap(),
            ("string-width".to_string(), "^4.2.0".to_string())
        );
        assert_eq!(
            parse_alias_target("@scope/name@~1.0.0").unwrap(),
            ("@scope/name".to_string(), "~1.0.0".to_string())
        );
        assert_eq!(
            parse_alias_target("plain").unwrap(),
            ("plain".to_string(), "*".to_string())
        );
        assert!(parse_alias_target("").is_err());
    }
}
