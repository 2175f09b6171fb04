//! Node config store.
//!
//! Holds the configuration pushed by the orchestrator and the capability set
//! derived from it. Both are replaced together on every update, so readers
//! always observe a consistent pair.

use crate::capabilities::{CapabilitySet, module_path_value};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

/// One immutable view of the node config.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub config: Map<String, Value>,
    pub capabilities: CapabilitySet,
}

impl ConfigSnapshot {
    /// Directories named by the configured module path.
    ///
    /// A string names one directory and an array names one per string
    /// entry. Anything else names none.
    pub fn module_roots(&self) -> Vec<PathBuf> {
        match module_path_value(&self.config) {
            Some(Value::String(path)) => vec![PathBuf::from(path)],
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<ConfigSnapshot>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored config and recomputes the capability set.
    ///
    /// Anything other than a JSON object is stored as an empty config.
    pub async fn set(&self, config: Value) -> CapabilitySet {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let capabilities = CapabilitySet::from_config(&config);

        *self.current.write().await = ConfigSnapshot {
            config,
            capabilities,
        };

        info!(
            module_access = capabilities.module_access,
            raw_bytes_access = capabilities.raw_bytes_access,
            "node config replaced"
        );
        capabilities
    }

    pub async fn snapshot(&self) -> ConfigSnapshot {
        self.current.read().await.clone()
    }

    pub async fn capabilities(&self) -> CapabilitySet {
        self.current.read().await.capabilities
    }
}
