//! Test nodes: a store, its hooks and a sync manager wired together.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tidesync_engine::{
    install_dirty_marker, LinkRecordHook, ModelRegistry, SyncConfig, SyncCycleReport,
    SyncManager, SyncTransport, MARKED_FOR_PUSH,
};
use tidesync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tidesync_store::{ApplyOptions, Fields, Record, Store, StoreConfig};

/// A facility node for tests.
pub struct TestNode<T: SyncTransport> {
    /// The node's sync manager.
    pub manager: Arc<SyncManager<T>>,
    facility_id: String,
    registry: Arc<ModelRegistry>,
    memory: Option<InMemoryBackend>,
    /// Kept alive so the log file is not removed.
    _temp_dir: Option<TempDir>,
}

impl<T: SyncTransport> TestNode<T> {
    /// Creates a node backed by memory.
    pub fn memory(facility_id: &str, registry: Arc<ModelRegistry>, transport: T) -> Self {
        let backend = InMemoryBackend::new();
        let store = open_store(&registry, Box::new(backend.clone()));
        Self::assemble(facility_id, registry, store, transport, Some(backend), None)
    }

    /// Creates a node whose commit log lives in a temporary directory.
    pub fn file(facility_id: &str, registry: Arc<ModelRegistry>, transport: T) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open_with_create_dirs(&temp_dir.path().join("tidesync.log"))
            .expect("Failed to create log backend");
        let store = open_store(&registry, Box::new(backend));
        Self::assemble(facility_id, registry, store, transport, None, Some(temp_dir))
    }

    fn assemble(
        facility_id: &str,
        registry: Arc<ModelRegistry>,
        store: Store,
        transport: T,
        memory: Option<InMemoryBackend>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        install_dirty_marker(&store, &registry);
        let manager = SyncManager::new(
            SyncConfig::new(facility_id).with_push_page_size(25),
            Arc::clone(&registry),
            Arc::new(store),
            transport,
        );
        Self {
            manager: Arc::new(manager),
            facility_id: facility_id.to_string(),
            registry,
            memory,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a `PatientFacility` link for every locally created patient.
    #[must_use]
    pub fn with_patient_links(self) -> Self {
        self.store()
            .register_hook(Arc::new(LinkRecordHook::patient_facility(&self.facility_id)));
        self
    }

    /// Simulates a process restart: the store is reopened from its log.
    ///
    /// Only memory nodes can restart; hooks are reinstalled, stats reset.
    pub fn restart(self) -> Self
    where
        T: Clone,
    {
        let backend = self.memory.clone().expect("Only memory nodes can restart");
        let transport = self.manager.transport().clone();
        let registry = Arc::clone(&self.registry);
        let facility_id = self.facility_id.clone();
        drop(self);

        let store = open_store(&registry, Box::new(backend.clone()));
        Self::assemble(&facility_id, registry, store, transport, Some(backend), None)
    }

    /// Returns the node's store.
    pub fn store(&self) -> &Store {
        self.manager.store()
    }

    /// Returns the node's registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Facility this node serves.
    pub fn facility_id(&self) -> &str {
        &self.facility_id
    }

    /// Path of the log file, if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join("tidesync.log"))
    }

    /// Creates a record as a local user would, running hooks.
    pub fn create(&self, table: &str, record: Record) {
        self.store()
            .create(table, record, ApplyOptions::with_hooks())
            .expect("Failed to create record");
    }

    /// Updates a record as a local user would, running hooks.
    pub fn update(&self, table: &str, id: &str, patch: Fields) -> Record {
        self.store()
            .update(table, id, patch, ApplyOptions::with_hooks())
            .expect("Failed to update record")
    }

    /// Reads a record.
    pub fn get(&self, table: &str, id: &str) -> Option<Record> {
        self.store().get(table, id).expect("Failed to read record")
    }

    /// Reads a record's dirty flag.
    pub fn flag(&self, table: &str, id: &str) -> Option<bool> {
        self.get(table, id).and_then(|r| r.get_bool(MARKED_FOR_PUSH))
    }

    /// Runs one cycle.
    pub fn sync(&self) -> SyncCycleReport {
        self.manager.run_sync().expect("Sync cycle aborted")
    }
}

impl<T: SyncTransport> std::ops::Deref for TestNode<T> {
    type Target = SyncManager<T>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

fn open_store(registry: &ModelRegistry, backend: Box<dyn StorageBackend>) -> Store {
    Store::open_with_backend(
        registry.table_schemas(),
        backend,
        StoreConfig::default().sync_on_commit(false),
    )
    .expect("Failed to open store")
}

/// Builds a patch from field/value pairs.
pub fn patch<V>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> Fields
where
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(field, value)| (field.to_string(), value.into()))
        .collect()
}
