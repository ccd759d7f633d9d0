//! The record store.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::hook::{ApplyOptions, WriteHook};
use crate::log::{self, CommitEntry, WriteSet};
use crate::query::Query;
use crate::record::{Fields, Record};
use crate::schema::{Catalog, TableSchema};
use crate::transaction::{Committed, HookList, Transaction};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tidesync_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Serialized writer state: the log and the next commit sequence.
struct Writer {
    backend: Box<dyn StorageBackend>,
    next_sequence: u64,
}

/// A transactional record store with immediate foreign-key enforcement.
///
/// Tables are declared up front through [`TableSchema`]s. Every committed
/// transaction is appended to the commit log before it becomes visible, and
/// the log is replayed when the store is reopened.
///
/// Transactions are serialized: only one runs at a time. Readers outside a
/// transaction see the last committed state.
///
/// # Example
///
/// ```rust,ignore
/// use tidesync_store::{ApplyOptions, Record, Store, TableSchema};
///
/// let store = Store::open_in_memory(vec![
///     TableSchema::new("Program"),
///     TableSchema::new("Survey").foreign_key("program_id", "Program"),
/// ])?;
///
/// store.transaction(|txn| {
///     txn.create("Program", Record::new("p1"), ApplyOptions::with_hooks())?;
///     txn.create(
///         "Survey",
///         Record::new("s1").with("program_id", "p1"),
///         ApplyOptions::with_hooks(),
///     )
/// })?;
/// ```
pub struct Store {
    catalog: Catalog,
    data: RwLock<Committed>,
    writer: Mutex<Writer>,
    hooks: RwLock<HookList>,
    config: StoreConfig,
}

impl Store {
    /// Opens a store backed by memory only.
    pub fn open_in_memory(schemas: impl IntoIterator<Item = TableSchema>) -> StoreResult<Self> {
        Self::open_with_backend(
            schemas,
            Box::new(InMemoryBackend::new()),
            StoreConfig::default(),
        )
    }

    /// Opens (or creates) a store whose commit log lives at `path`.
    ///
    /// The file is locked exclusively while the store is open.
    pub fn open(
        path: impl AsRef<Path>,
        schemas: impl IntoIterator<Item = TableSchema>,
    ) -> StoreResult<Self> {
        Self::open_with_config(path, schemas, StoreConfig::default())
    }

    /// Opens a file-backed store with custom configuration.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        schemas: impl IntoIterator<Item = TableSchema>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path.as_ref())?;
        Self::open_with_backend(schemas, Box::new(backend), config)
    }

    /// Opens a store over an arbitrary backend, replaying its commit log.
    ///
    /// A torn frame at the end of the log is truncated away.
    pub fn open_with_backend(
        schemas: impl IntoIterator<Item = TableSchema>,
        mut backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let catalog = Catalog::new(schemas)?;

        let bytes = backend.read_all()?;
        let replay = log::replay(&bytes)?;
        let size = backend.size()?;
        if replay.valid_len < size {
            tracing::warn!(
                valid = replay.valid_len,
                size,
                "truncating torn commit log tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut data = Committed::new(&catalog);
        let mut next_sequence = 1;
        for entry in &replay.entries {
            for write in &entry.writes {
                catalog.table(&write.table)?;
                data.apply(&write.table, write.id.clone(), write.record.clone());
            }
            next_sequence = entry.sequence + 1;
        }

        tracing::debug!(
            commits = replay.entries.len(),
            tables = data.rows.len(),
            "opened record store"
        );

        Ok(Self {
            catalog,
            data: RwLock::new(data),
            writer: Mutex::new(Writer {
                backend,
                next_sequence,
            }),
            hooks: RwLock::new(Arc::new(Vec::new())),
            config,
        })
    }

    /// Registers a write hook. It applies to transactions started afterwards.
    pub fn register_hook(&self, hook: Arc<dyn WriteHook>) {
        let mut hooks = self.hooks.write();
        let mut list: Vec<_> = hooks.iter().cloned().collect();
        list.push(hook);
        *hooks = Arc::new(list);
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the names of all tables.
    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names().map(str::to_string).collect()
    }

    /// Returns the schema of a table.
    pub fn table_schema(&self, table: &str) -> StoreResult<&TableSchema> {
        self.catalog.table(table)
    }

    /// Sequence number of the last committed transaction (0 if none).
    pub fn commit_sequence(&self) -> u64 {
        self.writer.lock().next_sequence - 1
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, every staged write is logged and then
    /// made visible at once. If it returns `Err`, nothing is written.
    ///
    /// The closure must not open another transaction on the same store.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut writer = self.writer.lock();
        let hooks = self.hooks.read().clone();

        let (value, writes) = {
            let base = self.data.read();
            let mut txn = Transaction::new(&self.catalog, &base, hooks);
            let value = f(&mut txn)?;
            (value, txn.into_writes())
        };

        self.commit(&mut writer, writes)?;
        Ok(value)
    }

    fn commit(&self, writer: &mut Writer, writes: WriteSet) -> StoreResult<()> {
        if writes.values().all(|rows| rows.is_empty()) {
            return Ok(());
        }

        let sequence = writer.next_sequence;
        let frame = CommitEntry::from_writes(sequence, &writes).encode_frame()?;
        writer.backend.append(&frame)?;
        if self.config.sync_on_commit {
            writer.backend.sync()?;
        }
        writer.next_sequence += 1;

        let mut data = self.data.write();
        for (table, rows) in writes {
            for (id, record) in rows {
                data.apply(&table, id, record);
            }
        }

        tracing::trace!(sequence, "committed transaction");
        Ok(())
    }

    /// Fetches a committed record.
    pub fn get(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        self.catalog.table(table)?;
        Ok(self
            .data
            .read()
            .rows
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    /// Runs a query against committed records.
    pub fn find_all(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        let base = self.data.read();
        let txn = Transaction::new(&self.catalog, &base, Arc::new(Vec::new()));
        txn.find_all(table, query)
    }

    /// Counts the committed records of a table.
    pub fn count(&self, table: &str) -> StoreResult<usize> {
        self.catalog.table(table)?;
        Ok(self.data.read().rows.get(table).map_or(0, |rows| rows.len()))
    }

    /// Inserts a record in its own transaction.
    pub fn create(&self, table: &str, record: Record, options: ApplyOptions) -> StoreResult<()> {
        self.transaction(|txn| txn.create(table, record, options))
    }

    /// Inserts many records in one transaction without running hooks.
    pub fn bulk_create(&self, table: &str, records: Vec<Record>) -> StoreResult<()> {
        self.transaction(|txn| txn.bulk_create(table, records))
    }

    /// Updates a record in its own transaction.
    pub fn update(
        &self,
        table: &str,
        id: &str,
        patch: Fields,
        options: ApplyOptions,
    ) -> StoreResult<Record> {
        self.transaction(|txn| txn.update(table, id, patch, options))
    }

    /// Deletes a record in its own transaction.
    pub fn destroy(&self, table: &str, id: &str) -> StoreResult<bool> {
        self.transaction(|txn| txn.destroy(table, id))
    }

    /// Deletes matching records in one transaction.
    pub fn destroy_where(&self, table: &str, query: &Query) -> StoreResult<usize> {
        self.transaction(|txn| txn.destroy_where(table, query))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("tables", &self.catalog.table_names().count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
