#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::return_self_not_must_use)]

//! dalkey core: the install pipeline of an npm-protocol package manager.
//!
//! The pipeline runs manifest -> resolver -> fetcher -> linker, bound
//! together by a deterministic lockfile:
//!
//! - [`version`] parses versions and npm-style ranges and picks maxima.
//! - [`registry`] talks to the registry over HTTP with retry and fallback.
//! - [`cache`] keeps packuments on disk under a TTL.
//! - [`resolve`] walks the dependency graph in parallel into a flat set.
//! - [`tarball`] unpacks gzipped ustar archives.
//! - [`fetch`] downloads, verifies integrity, and fills the global store.
//! - [`store`] is the content-addressable home of extracted packages.
//! - [`link`] materializes the hoisted `modules/` tree via hardlinks.
//! - [`lockfile`] serializes the flat set and enforces frozen installs.
//! - [`install`] orchestrates the whole run.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod install;
pub mod link;
pub mod lockfile;
pub mod manifest;
pub mod packument;
pub mod paths;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod tarball;
pub mod version;

pub use config::InstallConfig;
pub use error::{codes as pkg_codes, PkgError};
pub use install::{install, InstallReport};
pub use lockfile::{Lockfile, LockfileManager, LOCKFILE_NAME};
pub use manifest::Manifest;
pub use resolve::{Resolution, ResolvedPackage, Resolver};
pub use store::PackageStore;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
