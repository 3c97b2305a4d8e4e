//! `dalkey install` command implementation.

use dalkey_core::InstallConfig;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing::debug;

/// Arguments collected from the CLI for an install run.
pub struct InstallArgs {
    pub cwd: PathBuf,
    pub frozen: bool,
    pub production: bool,
    pub offline: bool,
    pub prefer_offline: bool,
    pub auto_install_peers: bool,
    pub strict_peer_dependencies: bool,
    pub registry: Option<String>,
    pub token: Option<String>,
    pub concurrency: Option<usize>,
}

pub fn run(args: InstallArgs) -> Result<()> {
    let mut config = InstallConfig::new();
    config.frozen = args.frozen;
    config.production = args.production;
    config.offline = args.offline;
    config.prefer_offline = args.prefer_offline;
    config.auto_install_peers = args.auto_install_peers;
    config.strict_peer_dependencies = args.strict_peer_dependencies;
    if let Some(registry) = args.registry {
        config = config.with_registry(registry);
    }
    if let Some(token) = args.token {
        config = config.with_token(token);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }

    debug!(cwd = %args.cwd.display(), frozen = config.frozen, "starting install");

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let result = runtime.block_on(dalkey_core::install(&args.cwd, &config));

    match result {
        Ok(report) => {
            println!("dalkey install");
            println!(
                "  packages: {} total, {} cached, {} downloaded",
                report.total, report.from_cache, report.downloaded
            );
            println!(
                "  linked: {} ({} binaries)",
                report.linked, report.binaries_installed
            );
            if report.frozen {
                println!("  (from lockfile)");
            }
            for warning in &report.warnings {
                eprintln!("  ! {warning}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
