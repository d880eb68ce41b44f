use crate::bookmark::{BaseResolution, DEFAULT_BOOKMARK};
use crate::error::Result;
use crate::extractor::COLLECTION_ROOT;
use crate::filter::{FilterSet, PathFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_DIR: &str = ".collwatch";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DB_FILE: &str = "collwatch.db";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Relative paths resolve against the workspace root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub bookmark: String,
    pub collection_root: String,
    pub strict: bool,
    pub scopes: Vec<String>,
    pub suffixes: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bookmark: DEFAULT_BOOKMARK.to_string(),
            collection_root: COLLECTION_ROOT.to_string(),
            strict: false,
            scopes: Vec::new(),
            suffixes: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Reads `<root>/.collwatch/config.toml`, or defaults when it is absent.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = Self::path_in(root);
        if path.exists() {
            debug!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let path = Self::path_in(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.to_toml()?)?;
        Ok(path)
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        match &self.store.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(CONFIG_DIR).join(DEFAULT_DB_FILE),
        }
    }

    pub fn resolution(&self) -> BaseResolution {
        if self.tracker.strict {
            BaseResolution::Strict
        } else {
            BaseResolution::Bootstrap
        }
    }

    /// Scopes OR-combined under the collection root, each suffix ANDed on.
    pub fn filter_set(&self) -> FilterSet {
        let mut filters = FilterSet::new(&self.tracker.collection_root);
        for scope in &self.tracker.scopes {
            filters.add_scope(scope.as_str());
        }
        let suffixes = self.tracker.suffixes.iter().map(PathFilter::suffix);
        if let Some(suffixes) = PathFilter::any_of(suffixes) {
            filters.add_filter(suffixes);
        }
        filters
    }
}
