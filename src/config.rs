use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::osm_source::DEFAULT_CLASSIFICATION_KEY;

pub const DEFAULT_GRAPH_DB: &str = "graph.db";

/// Runtime settings for a load. Every field has a default, so a config file only needs
/// the values it overrides; command-line flags are applied on top.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub osm_file: Option<PathBuf>,
    pub store: StoreConfig,
    pub batch: BatchConfig,
    /// Tag key a way must carry to be loaded as a road.
    pub road_classification_key: String,
    /// Records buffered between the reader task and the writer.
    pub queue_capacity: usize,
    pub spatial_index: bool,
    pub show_progress: bool,
    pub progress: ProgressConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            osm_file: None,
            store: StoreConfig::default(),
            batch: BatchConfig::default(),
            road_classification_key: DEFAULT_CLASSIFICATION_KEY.to_string(),
            queue_capacity: 1024,
            spatial_index: true,
            show_progress: true,
            progress: ProgressConfig::default(),
        }
    }
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LoadError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| LoadError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn require_osm_file(&self) -> Result<&Path, LoadError> {
        self.osm_file
            .as_deref()
            .ok_or_else(|| LoadError::Config("no OSM file given (use --osm-file)".to_string()))
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.road_classification_key.is_empty() {
            return Err(LoadError::Config(
                "road_classification_key must not be empty".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(LoadError::Config("queue_capacity must be at least 1".to_string()));
        }
        // one connection for the writer transaction, at least one for point lookups
        if self.store.max_connections < 2 {
            return Err(LoadError::Config(
                "store.max_connections must be at least 2".to_string(),
            ));
        }
        if self.batch.commit_threshold == 0 {
            return Err(LoadError::Config(
                "batch.commit_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file, or a directory that receives `graph.db`.
    pub graph_db: PathBuf,
    /// Any sea-orm connection URL. Takes precedence over `graph_db`.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            graph_db: PathBuf::from(DEFAULT_GRAPH_DB),
            database_url: None,
            max_connections: 4,
        }
    }
}

impl StoreConfig {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            graph_db: path.into(),
            ..Default::default()
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        if self.graph_db.is_dir() {
            self.graph_db.join(DEFAULT_GRAPH_DB)
        } else {
            self.graph_db.clone()
        }
    }

    pub fn connection_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}?mode=rwc", self.sqlite_path().display()),
        }
    }
}

/// Commit pacing for the graph writer, in cost units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    pub commit_threshold: u64,
    pub node_cost: u64,
    pub edge_cost: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            commit_threshold: 5000,
            node_cost: 1,
            edge_cost: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub point_interval: u64,
    pub road_interval: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            point_interval: 5000,
            road_interval: 500,
        }
    }
}
