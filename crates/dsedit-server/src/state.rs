//! Shared application state for the Axum server.

use std::path::PathBuf;
use std::sync::Arc;

use dsedit_core::storage::DatasetStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DatasetStore>,
}

impl AppState {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(DatasetStore::in_memory()))
    }
}

/// Configuration for the item service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Persist datasets as JSON here; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}
