//! Store configuration.

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the commit log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
