//! Install pipeline configuration.
//!
//! The command layer builds an [`InstallConfig`] once and hands it to the
//! core; defaults are resolved at construction time so the pipeline never
//! consults the environment mid-flight.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "DALKEY_REGISTRY";

/// Default maximum in-flight tarball fetches.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Configuration surface consumed by the install pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Registry base URL (trailing slash stripped at client construction).
    pub registry: String,
    /// Optional fallback registry queried once per name if the primary fails.
    pub fallback_registry: Option<String>,
    /// Bearer token attached to registry requests when set.
    pub token: Option<String>,
    /// Root of the global content-addressable package store.
    pub store_dir: PathBuf,
    /// Root of the metadata/tarball cache.
    pub cache_dir: PathBuf,
    /// Maximum in-flight tarball fetches.
    pub concurrency: usize,
    /// Never touch the network; fail on cache misses.
    pub offline: bool,
    /// Serve stale cached metadata instead of revalidating.
    pub prefer_offline: bool,
    /// Require an up-to-date lockfile and install exactly from it.
    pub frozen: bool,
    /// Skip devDependencies.
    pub production: bool,
    /// Resolve non-optional peer dependencies as if they were regular deps.
    pub auto_install_peers: bool,
    /// Treat every peer dependency as required and fail on peer errors.
    pub strict_peer_dependencies: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            registry: std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string()),
            fallback_registry: None,
            token: None,
            store_dir: paths::store_dir(),
            cache_dir: paths::cache_dir(),
            concurrency: DEFAULT_CONCURRENCY,
            offline: false,
            prefer_offline: false,
            frozen: false,
            production: false,
            auto_install_peers: false,
            strict_peer_dependencies: false,
        }
    }
}

impl InstallConfig {
    /// Create a config with default directories and registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the auth token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the store directory.
    #[must_use]
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// Set the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the fetch concurrency.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}
