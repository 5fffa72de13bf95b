//! replisync CLI
//!
//! Command-line tools for replicated sets stored on disk.
//!
//! # Commands
//!
//! - `add` - Add elements to a local set
//! - `merge` - Merge a snapshot file into a local set
//! - `items` - Print the elements of a local set
//! - `sync` - Pull, resolve and push a set against a remote directory
//! - `inspect` - List stored sets
//!
//! Every command runs through the sync engine, so local writes follow the
//! same persistence path as a full sync.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use replisync_protocol::ResolutionStrategy;
use replisync_server::PushPolicy;
use replisync_storage::SnapshotEncoding;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// replisync command-line tools.
#[derive(Parser)]
#[command(name = "replisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the local sets
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// On-disk encoding of snapshots
    #[arg(global = true, short, long, value_enum, default_value = "json")]
    encoding: Encoding,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add elements to a local set
    Add {
        /// Set id
        set: String,

        /// Elements to add
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Merge the elements of a snapshot file into a local set
    Merge {
        /// Set id
        set: String,

        /// JSON snapshot file (`{"id": ..., "items": [...]}`)
        #[arg(short, long)]
        from: PathBuf,
    },

    /// Print the elements of a local set
    Items {
        /// Set id
        set: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Pull, resolve and push a set against a remote directory
    Sync {
        /// Set id
        set: String,

        /// Directory holding the remote sets
        #[arg(short, long)]
        remote: PathBuf,

        /// Resolution strategy (client-wins, server-wins, merge)
        #[arg(short, long, default_value = "merge")]
        strategy: String,

        /// How the remote applies pushes
        #[arg(long, value_enum, default_value = "replace")]
        push_policy: Policy,

        /// Attempts per phase before giving up
        #[arg(long, default_value = "3")]
        attempts: u32,
    },

    /// List stored sets
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Json,
    Cbor,
}

impl From<Encoding> for SnapshotEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => SnapshotEncoding::Json,
            Encoding::Cbor => SnapshotEncoding::Cbor,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Replace,
    Merge,
}

impl From<Policy> for PushPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Replace => PushPolicy::Replace,
            Policy::Merge => PushPolicy::Merge,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let encoding = SnapshotEncoding::from(cli.encoding);
    match cli.command {
        Commands::Add { set, items } => {
            let path = cli.path.ok_or("Set directory required for add")?;
            let store = commands::local_store(&path, encoding);
            commands::add::run(store, &set, items).await?;
        }
        Commands::Merge { set, from } => {
            let path = cli.path.ok_or("Set directory required for merge")?;
            let store = commands::local_store(&path, encoding);
            commands::merge::run(store, &set, &from).await?;
        }
        Commands::Items { set, format } => {
            let path = cli.path.ok_or("Set directory required for items")?;
            let store = commands::local_store(&path, encoding);
            commands::items::run(store, &set, &format).await?;
        }
        Commands::Sync {
            set,
            remote,
            strategy,
            push_policy,
            attempts,
        } => {
            let path = cli.path.ok_or("Set directory required for sync")?;
            let options = commands::sync::SyncOptions {
                strategy,
                push_policy: push_policy.into(),
                attempts,
            };
            let store = commands::local_store(&path, encoding);
            let remote = commands::local_store(&remote, encoding);
            commands::sync::run(store, remote, &set, &options).await?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Set directory required for inspect")?;
            let store = commands::local_store(&path, encoding);
            commands::inspect::run(&store, &format).await?;
        }
        Commands::Version => {
            println!("replisync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "strategies: {}, {}, {}",
                ResolutionStrategy::ClientWins,
                ResolutionStrategy::ServerWins,
                ResolutionStrategy::Merge
            );
        }
    }

    Ok(())
}
