//! Transactions over the record store.

use crate::error::{StoreError, StoreResult};
use crate::hook::{ApplyOptions, WriteEvent, WriteHook, WriteKind};
use crate::id::RecordId;
use crate::index::ReferenceIndex;
use crate::log::WriteSet;
use crate::query::Query;
use crate::record::{Fields, Record};
use crate::schema::Catalog;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Committed rows: table -> key -> record.
pub(crate) type TableData = BTreeMap<String, BTreeMap<RecordId, Record>>;

/// Committed rows plus the foreign-key index kept in step with them.
#[derive(Debug)]
pub(crate) struct Committed {
    pub(crate) rows: TableData,
    pub(crate) refs: ReferenceIndex,
}

impl Committed {
    pub(crate) fn new(catalog: &Catalog) -> Self {
        Self {
            rows: catalog
                .table_names()
                .map(|name| (name.to_string(), BTreeMap::new()))
                .collect(),
            refs: ReferenceIndex::new(catalog),
        }
    }

    /// Applies one committed write to the rows and the index.
    pub(crate) fn apply(&mut self, table: &str, id: RecordId, record: Option<Record>) {
        let rows = self.rows.entry(table.to_string()).or_default();
        if let Some(old) = rows.remove(&id) {
            self.refs.remove(table, &old);
        }
        if let Some(record) = record {
            self.refs.insert(table, &record);
            rows.insert(id, record);
        }
    }
}

type Rows<'r> = Box<dyn Iterator<Item = (&'r RecordId, &'r Record)> + 'r>;

/// Hooks registered on a store, snapshotted per transaction.
pub(crate) type HookList = Arc<Vec<Arc<dyn WriteHook>>>;

/// How deep hook-triggered writes may nest before the transaction fails.
pub const MAX_HOOK_DEPTH: usize = 8;

/// An open transaction.
///
/// Writes are staged in an overlay on top of the committed rows; reads see
/// the overlay first. Foreign keys are checked immediately on every write,
/// so the order of writes inside a transaction matters exactly as it would
/// with non-deferred constraints in a relational database: parents must be
/// created before children and children deleted before parents.
///
/// Dropping a transaction without committing discards every staged write.
pub struct Transaction<'a> {
    catalog: &'a Catalog,
    base: &'a Committed,
    writes: WriteSet,
    hooks: HookList,
    hook_depth: usize,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(catalog: &'a Catalog, base: &'a Committed, hooks: HookList) -> Self {
        Self {
            catalog,
            base,
            writes: WriteSet::new(),
            hooks,
            hook_depth: 0,
        }
    }

    pub(crate) fn into_writes(self) -> WriteSet {
        self.writes
    }

    /// Returns true if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.values().all(BTreeMap::is_empty)
    }

    /// Fetches a record by primary key.
    pub fn get(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        self.catalog.table(table)?;
        Ok(self.lookup(table, id).cloned())
    }

    /// Returns true if the record exists.
    pub fn exists(&self, table: &str, id: &str) -> StoreResult<bool> {
        self.catalog.table(table)?;
        Ok(self.lookup(table, id).is_some())
    }

    /// Runs a query, returning matches in primary-key order.
    ///
    /// A condition on a foreign-key field is answered from the reference
    /// index; anything else scans the table from the `after` key on.
    pub fn find_all(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        self.catalog.table(table)?;

        let lower = match query.after_key() {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let limit = query.limit_value().unwrap_or(usize::MAX);
        let committed = self.committed_matches(table, query, &lower);

        let pending = match self.writes.get(table) {
            Some(pending) if !pending.is_empty() => pending,
            _ => return Ok(committed.take(limit).map(|(_, r)| r.clone()).collect()),
        };

        let mut merged: BTreeMap<&RecordId, &Record> = committed.collect();
        for (id, write) in pending.range((lower, Bound::Unbounded)) {
            match write {
                Some(record) if query.matches(record) => {
                    merged.insert(id, record);
                }
                _ => {
                    merged.remove(id);
                }
            }
        }
        Ok(merged.into_values().take(limit).cloned().collect())
    }

    fn committed_matches<'s>(
        &'s self,
        table: &str,
        query: &'s Query,
        lower: &Bound<RecordId>,
    ) -> Rows<'s> {
        let Some(rows) = self.base.rows.get(table) else {
            return Box::new(std::iter::empty());
        };
        match self.base.refs.candidates(table, query) {
            Some(keys) => Box::new(
                keys.range((lower.clone(), Bound::Unbounded))
                    .filter_map(move |id| rows.get_key_value(id))
                    .filter(move |(_, record)| query.matches(record)),
            ),
            None => Box::new(
                rows.range((lower.clone(), Bound::Unbounded))
                    .filter(move |(_, record)| query.matches(record)),
            ),
        }
    }

    /// Counts the records of a table.
    pub fn count(&self, table: &str) -> StoreResult<usize> {
        Ok(self.find_all(table, &Query::all())?.len())
    }

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the key exists,
    /// [`StoreError::ForeignKeyViolation`] if a reference dangles, or any
    /// error raised by a hook.
    pub fn create(
        &mut self,
        table: &str,
        record: Record,
        options: ApplyOptions,
    ) -> StoreResult<()> {
        self.catalog.table(table)?;
        if self.lookup(table, record.id().as_str()).is_some() {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                id: record.id().to_string(),
            });
        }
        self.check_foreign_keys(table, &record)?;

        let observed = (!options.skip_hooks).then(|| record.clone());
        self.stage(table, record.id().clone(), Some(record));
        if let Some(record) = observed {
            self.run_hooks(table, WriteKind::Create, &record)?;
        }
        Ok(())
    }

    /// Inserts many records. Hooks never run for bulk writes.
    pub fn bulk_create(&mut self, table: &str, records: Vec<Record>) -> StoreResult<()> {
        for record in records {
            self.create(table, record, ApplyOptions::bulk())?;
        }
        Ok(())
    }

    /// Merges `patch` into an existing record and returns the result.
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordNotFound`] if the record is missing,
    /// [`StoreError::ForeignKeyViolation`] if a reference dangles, or any
    /// error raised by a hook.
    pub fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: Fields,
        options: ApplyOptions,
    ) -> StoreResult<Record> {
        self.catalog.table(table)?;
        let mut record =
            self.lookup(table, id)
                .cloned()
                .ok_or_else(|| StoreError::RecordNotFound {
                    table: table.to_string(),
                    id: id.to_string(),
                })?;
        record.merge(patch);
        self.check_foreign_keys(table, &record)?;

        let observed = (!options.skip_hooks).then(|| record.clone());
        self.stage(table, record.id().clone(), Some(record.clone()));
        if let Some(observed) = observed {
            self.run_hooks(table, WriteKind::Update, &observed)?;
        }
        Ok(self.lookup(table, id).cloned().unwrap_or(record))
    }

    /// Deletes a record. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::RestrictViolation`] if another record still references
    /// it. A record referencing only itself does not block its own deletion.
    pub fn destroy(&mut self, table: &str, id: &str) -> StoreResult<bool> {
        self.catalog.table(table)?;
        if self.lookup(table, id).is_none() {
            return Ok(false);
        }

        let catalog = self.catalog;
        for inbound in catalog.inbound(table) {
            let referencing =
                self.find_all(&inbound.table, &Query::all().where_eq(inbound.field.clone(), id))?;
            let blocked = referencing
                .iter()
                .any(|child| !(inbound.table == table && child.id().as_str() == id));
            if blocked {
                return Err(StoreError::RestrictViolation {
                    table: table.to_string(),
                    id: id.to_string(),
                    child_table: inbound.table.clone(),
                    child_field: inbound.field.clone(),
                });
            }
        }

        self.stage(table, RecordId::from(id), None);
        Ok(true)
    }

    /// Deletes every record matching `query`. Returns how many were deleted.
    pub fn destroy_where(&mut self, table: &str, query: &Query) -> StoreResult<usize> {
        let doomed = self.find_all(table, query)?;
        let mut deleted = 0;
        for record in doomed {
            if self.destroy(table, record.id().as_str())? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn lookup(&self, table: &str, id: &str) -> Option<&Record> {
        if let Some(pending) = self.writes.get(table).and_then(|rows| rows.get(id)) {
            return pending.as_ref();
        }
        self.base.rows.get(table).and_then(|rows| rows.get(id))
    }

    fn stage(&mut self, table: &str, id: RecordId, record: Option<Record>) {
        self.writes
            .entry(table.to_string())
            .or_default()
            .insert(id, record);
    }

    fn check_foreign_keys(&self, table: &str, record: &Record) -> StoreResult<()> {
        let schema = self.catalog.table(table)?;
        for fk in &schema.foreign_keys {
            let value = match record.get(&fk.field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(value)) => value,
                Some(other) => {
                    return Err(StoreError::invalid_record(
                        table,
                        format!("{} must hold a string key, got {other}", fk.field),
                    ))
                }
            };

            let points_at_itself = fk.references == table && value == record.id().as_str();
            if !points_at_itself && self.lookup(&fk.references, value).is_none() {
                return Err(StoreError::ForeignKeyViolation {
                    table: table.to_string(),
                    field: fk.field.clone(),
                    references: fk.references.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    fn run_hooks(&mut self, table: &str, kind: WriteKind, record: &Record) -> StoreResult<()> {
        if self.hooks.is_empty() {
            return Ok(());
        }
        if self.hook_depth >= MAX_HOOK_DEPTH {
            return Err(StoreError::HookDepthExceeded {
                limit: MAX_HOOK_DEPTH,
            });
        }

        let hooks = Arc::clone(&self.hooks);
        let event = WriteEvent {
            table,
            kind,
            record,
        };
        self.hook_depth += 1;
        let result = hooks
            .iter()
            .try_for_each(|hook| hook.after_write(self, &event));
        self.hook_depth -= 1;
        result
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("writes", &self.writes.values().map(BTreeMap::len).sum::<usize>())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
