//! Export: turning dirty aggregate roots into outgoing sync records.

use crate::error::{SyncError, SyncResult};
use crate::model::{AssociationKind, MARKED_FOR_PUSH};
use crate::plan::{ExportPlan, PlanNode, SyncPlan};
use crate::registry::ModelRegistry;
use crate::source::RecordSource;
use serde_json::Value;
use tidesync_protocol::SyncRecord;
use tidesync_store::{Fields, Query, Record, RecordId};

/// One page of roots to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPage {
    /// Maximum roots to return.
    pub limit: usize,
    /// Only roots whose key sorts strictly after this one.
    pub after: Option<RecordId>,
}

impl ExportPage {
    /// First page of `limit` roots.
    pub fn first(limit: usize) -> Self {
        Self { limit, after: None }
    }

    /// The page following `last`.
    #[must_use]
    pub fn next(&self, last: RecordId) -> Self {
        Self {
            limit: self.limit,
            after: Some(last),
        }
    }
}

/// Plans the nested export of a root model.
///
/// # Errors
///
/// [`SyncError::NotSyncRoot`] unless `model` is a root.
pub fn create_export_plan(registry: &ModelRegistry, model: &str) -> SyncResult<ExportPlan> {
    if !registry.get(model)?.sync_role().is_root() {
        return Err(SyncError::not_sync_root(model));
    }
    SyncPlan::build(registry, model)
}

/// Loads one page of roots, in key order, with their associations nested.
///
/// Every root is returned whatever its dirty flag; the flag stays in the
/// data so the caller can select dirty roots and must be stripped with
/// [`strip_local_state`] before transmission.
pub fn execute_export_plan(
    source: &impl RecordSource,
    registry: &ModelRegistry,
    plan: &ExportPlan,
    page: &ExportPage,
) -> SyncResult<Vec<SyncRecord>> {
    let roots = source.query(
        &plan.model,
        &Query::all()
            .after_opt(page.after.clone())
            .limit(page.limit),
    )?;

    let records = roots
        .iter()
        .map(|root| export_record(source, registry, plan, root))
        .collect::<SyncResult<Vec<_>>>()?;

    tracing::debug!(
        model = %plan.model,
        after = ?page.after,
        exported = records.len(),
        "export page"
    );
    Ok(records)
}

/// Exports a single root.
pub fn export_record(
    source: &impl RecordSource,
    registry: &ModelRegistry,
    plan: &ExportPlan,
    root: &Record,
) -> SyncResult<SyncRecord> {
    let data = export_node(source, registry, &plan.model, &plan.children, root, true)?;
    Ok(SyncRecord::new(Value::Object(data)))
}

fn export_node(
    source: &impl RecordSource,
    registry: &ModelRegistry,
    model: &str,
    children: &[PlanNode],
    record: &Record,
    is_top: bool,
) -> SyncResult<Fields> {
    let mut data = match record.to_value() {
        Value::Object(map) => map,
        _ => Fields::new(),
    };
    let flag = data.remove(MARKED_FOR_PUSH);
    registry.get(model)?.sanitize_for_push(&mut data);
    if is_top {
        if let Some(flag) = flag {
            data.insert(MARKED_FOR_PUSH.to_string(), flag);
        }
    }

    for node in children {
        let rows = source.query(
            &node.model,
            &Query::all().where_eq(node.foreign_key.clone(), record.id().as_str()),
        )?;
        let nested = rows
            .iter()
            .map(|child| {
                export_node(source, registry, &node.model, &node.children, child, false)
                    .map(Value::Object)
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let value = match node.kind {
            AssociationKind::Many => Value::Array(nested),
            AssociationKind::One => nested.into_iter().next().unwrap_or(Value::Null),
        };
        data.insert(node.association.clone(), value);
    }

    Ok(data)
}

/// Returns true if an exported record carries a set dirty flag.
pub fn is_dirty(record: &SyncRecord) -> bool {
    record
        .data
        .get(MARKED_FOR_PUSH)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Removes node-local state from an exported record.
pub fn strip_local_state(mut record: SyncRecord) -> SyncRecord {
    if let Value::Object(data) = &mut record.data {
        data.remove(MARKED_FOR_PUSH);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDefinition;
    use serde_json::json;
    use tidesync_store::{ApplyOptions, Store};

    fn registry() -> ModelRegistry {
        ModelRegistry::from_definitions(vec![
            ModelDefinition::pull_only("Program"),
            ModelDefinition::root("Encounter")
                .local_only("printed_at")
                .has_many("notes", "Note", "encounter_id")
                .has_one("discharge", "Discharge", "encounter_id"),
            ModelDefinition::nested("Note")
                .belongs_to("encounter_id", "Encounter")
                .has_many("items", "NoteItem", "note_id"),
            ModelDefinition::nested("NoteItem").belongs_to("note_id", "Note"),
            ModelDefinition::nested("Discharge").belongs_to("encounter_id", "Encounter"),
        ])
        .unwrap()
    }

    fn seeded() -> (ModelRegistry, Store) {
        let registry = registry();
        let store = Store::open_in_memory(registry.table_schemas()).unwrap();
        store
            .transaction(|txn| {
                for (id, dirty) in [("e1", true), ("e2", false), ("e3", true)] {
                    txn.create(
                        "Encounter",
                        Record::new(id)
                            .with(MARKED_FOR_PUSH, dirty)
                            .with("printed_at", "local"),
                        ApplyOptions::bulk(),
                    )?;
                }
                txn.create(
                    "Note",
                    Record::new("n2").with("encounter_id", "e1").with("content", "b"),
                    ApplyOptions::bulk(),
                )?;
                txn.create(
                    "Note",
                    Record::new("n1").with("encounter_id", "e1").with("content", "a"),
                    ApplyOptions::bulk(),
                )?;
                txn.create(
                    "NoteItem",
                    Record::new("i1").with("note_id", "n1"),
                    ApplyOptions::bulk(),
                )?;
                txn.create(
                    "Discharge",
                    Record::new("d1").with("encounter_id", "e1"),
                    ApplyOptions::bulk(),
                )
            })
            .unwrap();
        (registry, store)
    }

    #[test]
    fn only_roots_can_be_exported() {
        let registry = registry();
        assert!(create_export_plan(&registry, "Encounter").is_ok());
        assert!(matches!(
            create_export_plan(&registry, "Program"),
            Err(SyncError::NotSyncRoot { .. })
        ));
        assert!(matches!(
            create_export_plan(&registry, "Note"),
            Err(SyncError::NotSyncRoot { .. })
        ));
    }

    #[test]
    fn nests_children_in_key_order() {
        let (registry, store) = seeded();
        let plan = create_export_plan(&registry, "Encounter").unwrap();
        let records = execute_export_plan(&store, &registry, &plan, &ExportPage::first(1)).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].data,
            json!({
                "id": "e1",
                "marked_for_push": true,
                "notes": [
                    { "id": "n1", "encounter_id": "e1", "content": "a",
                      "items": [{ "id": "i1", "note_id": "n1" }] },
                    { "id": "n2", "encounter_id": "e1", "content": "b", "items": [] }
                ],
                "discharge": { "id": "d1", "encounter_id": "e1" }
            })
        );
    }

    #[test]
    fn pages_by_key() {
        let (registry, store) = seeded();
        let plan = create_export_plan(&registry, "Encounter").unwrap();

        let first = ExportPage::first(2);
        let page = execute_export_plan(&store, &registry, &plan, &first).unwrap();
        let ids: Vec<_> = page.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, ["e1", "e2"]);

        let next = first.next(RecordId::from("e2"));
        let page = execute_export_plan(&store, &registry, &plan, &next).unwrap();
        let ids: Vec<_> = page.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, ["e3"]);
        assert_eq!(page[0].data["discharge"], Value::Null);
        assert_eq!(page[0].data["notes"], json!([]));
    }

    #[test]
    fn dirty_selection_and_stripping() {
        let (registry, store) = seeded();
        let plan = create_export_plan(&registry, "Encounter").unwrap();
        let page = execute_export_plan(&store, &registry, &plan, &ExportPage::first(10)).unwrap();

        let dirty: Vec<_> = page.into_iter().filter(is_dirty).map(strip_local_state).collect();
        assert_eq!(dirty.len(), 2);
        assert!(dirty.iter().all(|r| r.data.get(MARKED_FOR_PUSH).is_none()));
        assert!(!dirty[0].is_deleted);
    }
}
