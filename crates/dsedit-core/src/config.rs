//! Session configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage;

/// Configuration for one dataset editing session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the item service (e.g. "http://127.0.0.1:8000")
    pub api_url: String,
    /// Rows per page (default: 100)
    pub page_size: usize,
    /// Autosave debounce in milliseconds (default: 1000)
    pub autosave_delay_ms: u64,
    /// How long a fetched page is reused before refetching (default: 30000)
    pub stale_time_ms: u64,
    /// Start sessions with draft mode on
    pub draft_mode: bool,
    /// Save editor changes automatically outside draft mode
    pub autosave: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_string(),
            page_size: 100,
            autosave_delay_ms: 1000,
            stale_time_ms: 30_000,
            draft_mode: false,
            autosave: true,
        }
    }
}

impl SessionConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        storage::load_yaml(path)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_autosave_delay_ms(mut self, ms: u64) -> Self {
        self.autosave_delay_ms = ms;
        self
    }

    pub fn with_stale_time_ms(mut self, ms: u64) -> Self {
        self.stale_time_ms = ms;
        self
    }

    pub fn with_draft_mode(mut self, enabled: bool) -> Self {
        self.draft_mode = enabled;
        self
    }

    pub fn with_autosave(mut self, enabled: bool) -> Self {
        self.autosave = enabled;
        self
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}
