//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of this node (facility server), used in logs.
    pub node_id: String,
    /// Root records examined per export page.
    pub push_page_size: usize,
    /// Sync interval for automatic sync.
    pub sync_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            push_page_size: 100,
            sync_interval: None,
        }
    }

    /// Sets the export page size. Zero is treated as one.
    pub fn with_push_page_size(mut self, size: usize) -> Self {
        self.push_page_size = size.max(1);
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("local")
    }
}
