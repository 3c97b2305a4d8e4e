//! `dalkey store` command implementation.

use dalkey_core::paths;
use dalkey_core::PackageStore;
use miette::Result;

pub fn list() -> Result<()> {
    let store = PackageStore::new(paths::store_dir());
    match store.list() {
        Ok(entries) => {
            if entries.is_empty() {
                println!("(store is empty)");
                return Ok(());
            }
            for entry in entries {
                println!("{}@{}", entry.name, entry.version);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
