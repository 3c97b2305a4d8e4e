//! Default filesystem locations for the store and caches.

use std::path::{Path, PathBuf};

/// Schema version for store/cache directories.
/// Bump this when changing formats that would break compatibility.
pub const SCHEMA_VERSION: u32 = 1;

/// Name of the per-project module tree directory.
pub const MODULES_DIR: &str = "modules";

/// Find the project root by walking up from `cwd` looking for `package.json` or `.git`.
///
/// Returns the first directory containing either marker, or `None` if neither is found.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").exists() || current.join(".git").exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Get the cache directory for dalkey.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/dalkey/v{N}` or `~/.cache/dalkey/v{N}`
/// - macOS: `~/Library/Caches/dalkey/v{N}`
/// - Windows: `%LOCALAPPDATA%\dalkey\cache\v{N}`
#[must_use]
pub fn cache_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".dalkey-cache"),
                |p| p.join(".cache").join("dalkey"),
            )
        },
        |p| p.join("dalkey"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
}

/// Get the global package store directory.
///
/// Lives under the user data dir so that caches can be wiped without losing
/// extracted packages.
#[must_use]
pub fn store_dir() -> PathBuf {
    let base = dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".dalkey-store"),
                |p| p.join(".local").join("share").join("dalkey"),
            )
        },
        |p| p.join("dalkey"),
    );

    base.join(format!("v{SCHEMA_VERSION}")).join("store")
}
