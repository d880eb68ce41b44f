use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ack, diff, events, init, log, snapshot, status, FilterArgs, StoreArgs};

#[derive(Parser)]
#[command(name = "collwatch")]
#[command(version, about = "Track and acknowledge changes in a versioned collection store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the .collwatch directory with a default config and store
    Init {
        /// Workspace directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Record a directory tree as the new head snapshot
    Snapshot {
        /// Directory to record (defaults to the workspace root)
        dir: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// List changes since the last acknowledge
    Status {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show line diffs of pending changes
    Diff {
        /// Only show changes at or below this path
        path: Option<String>,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show calendar events before and after each pending change
    Events {
        /// Print deltas as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Acknowledge pending changes so they are not reported again
    Ack {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show bookmark history
    Log {
        /// Number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        #[command(flatten)]
        store: StoreArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            init::run(path)?;
        }
        Commands::Snapshot { dir, store } => {
            snapshot::run(dir, store)?;
        }
        Commands::Status { store, filters } => {
            status::run(store, filters)?;
        }
        Commands::Diff {
            path,
            store,
            filters,
        } => {
            diff::run(path, store, filters)?;
        }
        Commands::Events {
            json,
            store,
            filters,
        } => {
            events::run(json, store, filters)?;
        }
        Commands::Ack {
            yes,
            store,
            filters,
        } => {
            ack::run(yes, store, filters)?;
        }
        Commands::Log { limit, store } => {
            log::run(limit, store)?;
        }
    }

    Ok(())
}
