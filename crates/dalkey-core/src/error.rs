//! Package manager error types.

use std::fmt;
use std::io;

/// Package manager error codes.
pub mod codes {
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_VERSION_NOT_FOUND: &str = "PKG_VERSION_NOT_FOUND";
    pub const PKG_NETWORK_FAILURE: &str = "PKG_NETWORK_FAILURE";
    pub const PKG_HTTP_ERROR: &str = "PKG_HTTP_ERROR";
    pub const PKG_INTEGRITY_MISMATCH: &str = "PKG_INTEGRITY_MISMATCH";
    pub const PKG_OFFLINE_MISS: &str = "PKG_OFFLINE_MISS";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_LINK_FAILED: &str = "PKG_LINK_FAILED";
    pub const PKG_STORE_ERROR: &str = "PKG_STORE_ERROR";
    pub const PKG_CACHE_ERROR: &str = "PKG_CACHE_ERROR";
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_MANIFEST_NOT_FOUND: &str = "PKG_MANIFEST_NOT_FOUND";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
    pub const PKG_LOCK_VERSION_MISMATCH: &str = "PKG_LOCK_VERSION_MISMATCH";
    pub const PKG_LOCK_STALE: &str = "PKG_LOCK_STALE";
    pub const PKG_LOCK_WRITE_FAILED: &str = "PKG_LOCK_WRITE_FAILED";
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
}

/// Package manager error.
///
/// Errors carry a stable code (part of the output contract) plus a
/// human-readable message. `Clone` is required so a single failed metadata
/// fetch can be handed to every resolver task waiting on it.
#[derive(Debug, Clone)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a no-satisfying-version error.
    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::PKG_VERSION_NOT_FOUND,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    /// Create a network failure error (connect/timeout/5xx after retries).
    pub fn network(url: &str, cause: impl fmt::Display) -> Self {
        Self::new(
            codes::PKG_NETWORK_FAILURE,
            format!("Request to {url} failed: {cause}"),
        )
    }

    /// Create an HTTP error with a captured body excerpt.
    #[must_use]
    pub fn http(status: u16, url: &str, excerpt: &str) -> Self {
        Self::new(
            codes::PKG_HTTP_ERROR,
            format!("HTTP {status} from {url}: {excerpt}"),
        )
    }

    /// Create an integrity mismatch error.
    #[must_use]
    pub fn integrity_mismatch(pkg: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::PKG_INTEGRITY_MISMATCH,
            format!("Integrity mismatch for {pkg}: expected {expected}, got {actual}"),
        )
    }

    /// Create an offline miss error.
    #[must_use]
    pub fn offline_miss(pkg: &str) -> Self {
        Self::new(
            codes::PKG_OFFLINE_MISS,
            format!("{pkg} is not in the cache and offline mode is enabled"),
        )
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Create a link failed error.
    pub fn link_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LINK_FAILED, msg)
    }

    /// Create a store error.
    pub fn store_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_STORE_ERROR, msg)
    }

    /// Create a cache error.
    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, msg)
    }

    /// Create a spec invalid error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_SPEC_INVALID, msg)
    }

    /// Create a manifest not found error.
    #[must_use]
    pub fn manifest_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_MANIFEST_NOT_FOUND,
            format!("Manifest not found: {}", path.display()),
        )
    }

    /// Create a manifest invalid error.
    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, msg)
    }

    /// Create a lockfile schema mismatch error.
    #[must_use]
    pub fn lock_version_mismatch(found: u32, expected: u32) -> Self {
        Self::new(
            codes::PKG_LOCK_VERSION_MISMATCH,
            format!("Lockfile version {found} not supported (expected {expected})"),
        )
    }

    /// Create a lockfile out-of-date error.
    pub fn lock_stale(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LOCK_STALE, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_STORE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PKG_NETWORK_FAILURE, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PKG_NETWORK_FAILURE, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PKG_NETWORK_FAILURE, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, format!("Invalid JSON: {e}"))
    }
}
