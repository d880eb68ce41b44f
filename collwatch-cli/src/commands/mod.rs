pub mod ack;
pub mod diff;
pub mod events;
pub mod init;
pub mod log;
pub mod snapshot;
pub mod status;

use anyhow::{Context, Result};
use clap::Args;
use collwatch_core::{
    BookmarkTracker, ChangeKind, Config, DiffSession, Error, SqliteStore, HEAD,
};
use colored::{ColoredString, Colorize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Workspace root holding .collwatch (defaults to current directory)
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Database path
    #[arg(short, long)]
    pub db: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only report changes under collection-root/<SCOPE> (repeatable)
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<String>,

    /// Only report paths ending in SUFFIX (repeatable)
    #[arg(long = "suffix", value_name = "SUFFIX")]
    pub suffixes: Vec<String>,

    /// Fail instead of bootstrapping when the bookmark does not exist
    #[arg(long)]
    pub strict: bool,
}

/// Config and store location for one invocation, with flags applied.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub db_path: PathBuf,
}

impl Workspace {
    pub fn load(args: &StoreArgs) -> Result<Self> {
        let config = Config::discover(&args.root)
            .with_context(|| format!("Failed to read config in {}", args.root.display()))?;
        let db_path = args
            .db
            .clone()
            .unwrap_or_else(|| config.db_path(&args.root));

        Ok(Self {
            root: args.root.clone(),
            config,
            db_path,
        })
    }

    /// Flags replace the configured scopes and suffixes rather than adding to them.
    pub fn with_filters(mut self, filters: &FilterArgs) -> Self {
        if !filters.scopes.is_empty() {
            self.config.tracker.scopes = filters.scopes.clone();
        }
        if !filters.suffixes.is_empty() {
            self.config.tracker.suffixes = filters.suffixes.clone();
        }
        if filters.strict {
            self.config.tracker.strict = true;
        }
        self
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        if !self.db_path.exists() {
            anyhow::bail!(
                "No collwatch store found at {}. Run 'collwatch init' first.",
                self.db_path.display()
            );
        }

        let store = SqliteStore::open(&self.db_path)
            .with_context(|| format!("Failed to open store {}", self.db_path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn tracker(&self) -> Result<BookmarkTracker> {
        let store = self.open_store()?;
        Ok(BookmarkTracker::new(store, &self.config.tracker.bookmark)
            .with_resolution(self.config.resolution()))
    }

    /// Pins the current (bookmark, head) pair and computes its changes.
    pub fn session(&self) -> Result<DiffSession> {
        let tracker = self.tracker()?;
        let pair = match tracker.pin() {
            Err(Error::RefNotFound(name)) if name == HEAD => {
                anyhow::bail!("No snapshot recorded yet. Run 'collwatch snapshot' first.")
            }
            Err(Error::RefNotFound(name)) => {
                anyhow::bail!(
                    "Bookmark '{}' does not exist. Run without --strict to create it.",
                    name
                )
            }
            result => result?,
        };

        Ok(DiffSession::new(tracker, pair, self.config.filter_set())?)
    }
}

pub fn kind_icon(kind: ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::Added => "+".green(),
        ChangeKind::Modified => "~".yellow(),
        ChangeKind::Deleted => "-".red(),
    }
}

pub fn kind_label(kind: ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::Added => "NEW".green(),
        ChangeKind::Modified => "MOD".yellow(),
        ChangeKind::Deleted => "DEL".red(),
    }
}
