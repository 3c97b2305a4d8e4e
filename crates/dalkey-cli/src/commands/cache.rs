//! `dalkey cache` command implementation.

use dalkey_core::cache::MetadataCache;
use dalkey_core::paths;
use miette::Result;

pub fn prune(max_bytes: u64) -> Result<()> {
    let cache = MetadataCache::new(&paths::cache_dir());
    match cache.prune(max_bytes) {
        Ok(freed) => {
            let freed_mb = freed as f64 / (1024.0 * 1024.0);
            println!("Pruned metadata cache, freed {freed_mb:.2} MB");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

pub fn clear() -> Result<()> {
    let cache = MetadataCache::new(&paths::cache_dir());
    match cache.clear() {
        Ok(()) => {
            println!("Metadata cache cleared");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
