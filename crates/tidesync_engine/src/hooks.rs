//! Write hooks that keep dirty flags and link records in step with local edits.

use crate::model::{SyncRole, MARKED_FOR_PUSH};
use crate::registry::ModelRegistry;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tidesync_store::{
    ApplyOptions, Fields, Query, Record, RecordId, Store, StoreResult, Transaction, WriteEvent,
    WriteHook, WriteKind,
};

/// One hop from a record to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathStep {
    field: String,
    target: String,
}

/// Flags the aggregate root of every locally written record for push.
///
/// For each model the shortest belongs-to path to a root is computed once.
/// On a hooked create or update the path is walked inside the writing
/// transaction and the root's `marked_for_push` is set. Self-references are
/// never followed. Writes made with [`ApplyOptions::bulk`] never get here.
pub struct DirtyMarker {
    paths: HashMap<String, Option<Vec<PathStep>>>,
    roles: HashMap<String, SyncRole>,
    warned: Mutex<HashSet<String>>,
}

impl DirtyMarker {
    /// Precomputes root paths for every registered model.
    pub fn new(registry: &ModelRegistry) -> Self {
        let mut paths = HashMap::new();
        let mut roles = HashMap::new();
        for model in registry.in_creation_order() {
            roles.insert(model.name().to_string(), model.sync_role());
            paths.insert(model.name().to_string(), root_path(registry, model.name()));
        }
        Self {
            paths,
            roles,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the models crossed on the way to the root, root last.
    ///
    /// `None` if the model has no root; empty for roots themselves.
    pub fn path_to_root(&self, model: &str) -> Option<Vec<&str>> {
        self.paths
            .get(model)?
            .as_ref()
            .map(|steps| steps.iter().map(|s| s.target.as_str()).collect())
    }

    fn warn_orphan(&self, model: &str) {
        if self.warned.lock().insert(model.to_string()) {
            tracing::warn!(model, "nested model has no path to a sync root; edits are not pushed");
        }
    }
}

fn root_path(registry: &ModelRegistry, start: &str) -> Option<Vec<PathStep>> {
    let mut queue = VecDeque::from([(start.to_string(), Vec::<PathStep>::new())]);
    let mut seen = HashSet::from([start.to_string()]);

    while let Some((name, path)) = queue.pop_front() {
        let model = registry.model(&name)?;
        if model.sync_role() == SyncRole::Root {
            return Some(path);
        }
        for edge in model.belongs_to() {
            if edge.target == name || !seen.insert(edge.target.clone()) {
                continue;
            }
            let mut next = path.clone();
            next.push(PathStep {
                field: edge.field.clone(),
                target: edge.target.clone(),
            });
            queue.push_back((edge.target.clone(), next));
        }
    }
    None
}

impl WriteHook for DirtyMarker {
    fn after_write(&self, txn: &mut Transaction<'_>, event: &WriteEvent<'_>) -> StoreResult<()> {
        let Some(path) = self.paths.get(event.table) else {
            return Ok(());
        };
        let Some(path) = path else {
            if self.roles.get(event.table) == Some(&SyncRole::Nested) {
                self.warn_orphan(event.table);
            }
            return Ok(());
        };

        let mut table = event.table;
        let mut current = event.record.clone();
        for step in path {
            let Some(parent_id) = current.get_str(&step.field).map(str::to_string) else {
                return Ok(());
            };
            let Some(parent) = txn.get(&step.target, &parent_id)? else {
                return Ok(());
            };
            table = &step.target;
            current = parent;
        }

        if current.get_bool(MARKED_FOR_PUSH) != Some(true) {
            let mut patch = Fields::new();
            patch.insert(MARKED_FOR_PUSH.to_string(), Value::Bool(true));
            txn.update(table, current.id().as_str(), patch, ApplyOptions::bulk())?;
            tracing::trace!(root = table, id = %current.id(), "marked for push");
        }
        Ok(())
    }
}

/// Creates a link record whenever a source record is created locally.
///
/// With the defaults, creating a `Patient` creates a `PatientFacility`
/// `{ patient_id, facility_id }` for this node's facility, flagged for push,
/// unless that pair already exists. Bulk creation never creates links.
#[derive(Debug, Clone)]
pub struct LinkRecordHook {
    source: String,
    link: String,
    source_field: String,
    facility_field: String,
    facility_id: String,
}

impl LinkRecordHook {
    /// Links `source` records to `facility_id` through `link` records.
    pub fn new(
        source: impl Into<String>,
        link: impl Into<String>,
        source_field: impl Into<String>,
        facility_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            link: link.into(),
            source_field: source_field.into(),
            facility_field: "facility_id".to_string(),
            facility_id: facility_id.into(),
        }
    }

    /// The standard patient-to-facility link.
    pub fn patient_facility(facility_id: impl Into<String>) -> Self {
        Self::new("Patient", "PatientFacility", "patient_id", facility_id)
    }

    /// Overrides the link field holding the facility id.
    pub fn with_facility_field(mut self, field: impl Into<String>) -> Self {
        self.facility_field = field.into();
        self
    }
}

impl WriteHook for LinkRecordHook {
    fn after_write(&self, txn: &mut Transaction<'_>, event: &WriteEvent<'_>) -> StoreResult<()> {
        if event.kind != WriteKind::Create || event.table != self.source {
            return Ok(());
        }

        let source_id = event.record.id().as_str();
        let existing = txn.find_all(
            &self.link,
            &Query::all()
                .where_eq(self.source_field.clone(), source_id)
                .where_eq(self.facility_field.clone(), self.facility_id.as_str())
                .limit(1),
        )?;
        if !existing.is_empty() {
            return Ok(());
        }

        let link = Record::new(RecordId::new())
            .with(self.source_field.clone(), source_id)
            .with(self.facility_field.clone(), self.facility_id.as_str())
            .with(MARKED_FOR_PUSH, true);
        tracing::debug!(link = %self.link, source = source_id, "creating link record");
        txn.create(&self.link, link, ApplyOptions::bulk())
    }
}

/// Registers a [`DirtyMarker`] for `registry` on `store`.
pub fn install_dirty_marker(store: &Store, registry: &ModelRegistry) -> Arc<DirtyMarker> {
    let marker = Arc::new(DirtyMarker::new(registry));
    store.register_hook(marker.clone());
    marker
}
