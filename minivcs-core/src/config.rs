//! Engine configuration
//!
//! Stored as pretty-printed JSON. A missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commit::HeadUpdate;
use crate::document_store::DocumentStore;
use crate::memory_store::MemoryStore;
use crate::sqlite_store::SqliteStore;
use crate::storage::{self, Storage};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// graph.json per repository plus flat-file objects
    #[default]
    Document,
    /// One SQLite database per repository
    Sqlite,
    /// Process memory only
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(BackendKind::Document),
            "sqlite" => Ok(BackendKind::Sqlite),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!(
                "unknown backend '{other}' (expected document, sqlite or memory)"
            )),
        }
    }
}

/// When a pulled commit may move the target's HEAD
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullHeadPolicy {
    /// Same rule as push: advance onto direct children of the tip
    #[default]
    FastForward,
    /// Only the first commit pulled into an empty target sets HEAD
    InitialOnly,
}

impl PullHeadPolicy {
    pub fn head_update(self) -> HeadUpdate {
        match self {
            PullHeadPolicy::FastForward => HeadUpdate::FastForward,
            PullHeadPolicy::InitialOnly => HeadUpdate::IfUnset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory holding one subdirectory per repository
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub pull_head_policy: PullHeadPolicy,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./repositories")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
            pull_head_policy: PullHeadPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from `path`, or the defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write config to `path` atomically
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).map_err(io)?;
        fs::rename(&tmp_path, path).map_err(io)?;
        Ok(())
    }

    /// Build the configured backend
    pub fn open_storage(&self) -> storage::Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self.backend {
            BackendKind::Document => Arc::new(DocumentStore::open(&self.data_dir)?),
            BackendKind::Sqlite => Arc::new(SqliteStore::open(&self.data_dir)?),
            BackendKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(storage)
    }
}
