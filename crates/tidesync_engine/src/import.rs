//! Import: applying incoming sync records to the local store.

use crate::error::{SyncError, SyncResult};
use crate::model::{SyncRole, MARKED_FOR_PUSH};
use crate::plan::{ImportPlan, PlanNode, SyncPlan};
use crate::registry::ModelRegistry;
use serde_json::Value;
use std::ops::AddAssign;
use tidesync_protocol::{is_nested_tombstone, SyncRecord, IS_DELETED_KEY};
use tidesync_store::{ApplyOptions, Fields, Query, Record, Transaction, ID_FIELD};

/// Counts of what an import changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Records inserted.
    pub created: u64,
    /// Records overwritten.
    pub updated: u64,
    /// Records deleted, nested children included.
    pub deleted: u64,
}

impl ImportStats {
    /// Total records touched.
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for ImportStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Plans the import of a model and its nested associations.
///
/// Nested models get a plan too, so they can be applied standalone.
pub fn create_import_plan(registry: &ModelRegistry, model: &str) -> SyncResult<ImportPlan> {
    SyncPlan::build(registry, model)
}

/// Applies one incoming record inside the caller's transaction.
///
/// Writes never run hooks, so imported rows are not queued for push again.
/// A root created here starts clean; an updated root keeps its local dirty
/// flag, and any flag in the payload is ignored.
///
/// A tombstone deletes the root's local descendants child-first, then the
/// root. Local children missing from the payload are left alone.
pub fn execute_import_plan(
    txn: &mut Transaction<'_>,
    registry: &ModelRegistry,
    plan: &ImportPlan,
    record: &SyncRecord,
) -> SyncResult<ImportStats> {
    let data = record
        .fields()
        .ok_or_else(|| SyncError::invalid_record(&plan.model, "data is not an object"))?;
    let id = record_id(&plan.model, data)?;

    let mut stats = ImportStats::default();
    if record.is_deleted {
        stats.deleted += delete_tree(txn, &plan.model, &plan.children, id)?;
    } else {
        upsert_tree(txn, registry, &plan.model, &plan.children, data, None, &mut stats)?;
    }
    Ok(stats)
}

fn record_id<'a>(model: &str, data: &'a Fields) -> SyncResult<&'a str> {
    data.get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::invalid_record(model, "missing string id"))
}

fn upsert_tree(
    txn: &mut Transaction<'_>,
    registry: &ModelRegistry,
    model: &str,
    children: &[PlanNode],
    data: &Fields,
    parent: Option<(&str, &str)>,
    stats: &mut ImportStats,
) -> SyncResult<()> {
    let definition = registry.get(model)?;
    let id = record_id(model, data)?;

    let mut fields: Fields = data
        .iter()
        .filter(|(key, _)| {
            key.as_str() != IS_DELETED_KEY
                && key.as_str() != MARKED_FOR_PUSH
                && !children.iter().any(|node| &node.association == *key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some((foreign_key, parent_id)) = parent {
        fields.insert(foreign_key.to_string(), Value::String(parent_id.to_string()));
    }
    definition.sanitize_for_import(&mut fields);

    if txn.exists(model, id)? {
        txn.update(model, id, fields, ApplyOptions::bulk())?;
        stats.updated += 1;
    } else {
        if definition.sync_role() == SyncRole::Root {
            fields.insert(MARKED_FOR_PUSH.to_string(), Value::Bool(false));
        }
        txn.create(model, Record::from_fields(id, fields), ApplyOptions::bulk())?;
        stats.created += 1;
    }

    for node in children {
        let nested: Vec<&Value> = match data.get(&node.association) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value @ Value::Object(_)) => vec![value],
            Some(_) => {
                return Err(SyncError::invalid_record(
                    model,
                    format!("{} must be an array, object or null", node.association),
                ))
            }
        };

        for child in nested {
            let Value::Object(child_data) = child else {
                return Err(SyncError::invalid_record(
                    &node.model,
                    "nested child is not an object",
                ));
            };
            if is_nested_tombstone(child) {
                let child_id = record_id(&node.model, child_data)?;
                stats.deleted += delete_tree(txn, &node.model, &node.children, child_id)?;
            } else {
                upsert_tree(
                    txn,
                    registry,
                    &node.model,
                    &node.children,
                    child_data,
                    Some((node.foreign_key.as_str(), id)),
                    stats,
                )?;
            }
        }
    }

    Ok(())
}

/// Deletes a record and, first, every descendant reachable through the plan.
///
/// Returns how many rows were deleted; an absent record deletes nothing.
fn delete_tree(
    txn: &mut Transaction<'_>,
    model: &str,
    children: &[PlanNode],
    id: &str,
) -> SyncResult<u64> {
    if !txn.exists(model, id)? {
        return Ok(0);
    }

    let mut deleted = 0;
    for node in children.iter().rev() {
        let rows = txn.find_all(
            &node.model,
            &Query::all().where_eq(node.foreign_key.clone(), id),
        )?;
        for row in rows {
            deleted += delete_tree(txn, &node.model, &node.children, row.id().as_str())?;
        }
    }

    if txn.destroy(model, id)? {
        deleted += 1;
    }
    Ok(deleted)
}
