#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dalkey")]
#[command(author, version, about = "A fast npm-registry package manager", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install dependencies from the manifest
    Install {
        /// Fail unless the lockfile exists and is up to date
        #[arg(long)]
        frozen: bool,

        /// Skip devDependencies
        #[arg(long)]
        production: bool,

        /// Never touch the network
        #[arg(long)]
        offline: bool,

        /// Use cached metadata without revalidating
        #[arg(long)]
        prefer_offline: bool,

        /// Resolve peer dependencies like regular dependencies
        #[arg(long)]
        auto_install_peers: bool,

        /// Fail on unresolvable peer dependencies
        #[arg(long)]
        strict_peer_dependencies: bool,

        /// Registry base URL
        #[arg(long, value_name = "URL")]
        registry: Option<String>,

        /// Bearer token for registry requests
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,

        /// Maximum concurrent tarball fetches
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Manage the metadata and tarball caches
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Inspect the global package store
    Store {
        #[command(subcommand)]
        action: StoreCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// Remove oldest metadata entries until the cache fits its budget
    Prune {
        /// Cache size budget in megabytes
        #[arg(long, default_value_t = 256)]
        max_mb: u64,
    },
    /// Remove every cached metadata entry
    Clear,
}

#[derive(clap::Subcommand, Debug)]
enum StoreCommands {
    /// List extracted packages in the store
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    match cli.command {
        Commands::Install {
            frozen,
            production,
            offline,
            prefer_offline,
            auto_install_peers,
            strict_peer_dependencies,
            registry,
            token,
            concurrency,
        } => commands::install::run(commands::install::InstallArgs {
            cwd,
            frozen,
            production,
            offline,
            prefer_offline,
            auto_install_peers,
            strict_peer_dependencies,
            registry,
            token,
            concurrency,
        }),
        Commands::Cache { action } => match action {
            CacheCommands::Prune { max_mb } => commands::cache::prune(max_mb * 1024 * 1024),
            CacheCommands::Clear => commands::cache::clear(),
        },
        Commands::Store { action } => match action {
            StoreCommands::List => commands::store::list(),
        },
    }
}
