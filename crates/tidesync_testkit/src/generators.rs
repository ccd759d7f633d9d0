//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};
use tidesync_engine::ModelDefinition;
use tidesync_protocol::SyncRecord;

/// Strategy for record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{4,12}").expect("Invalid regex")
}

/// A random acyclic schema of pull-only models, registered in shuffled
/// order. Model `Mi` may only point at `Mj` with `j < i`.
pub fn dag_schema_strategy(max_models: usize) -> impl Strategy<Value = Vec<ModelDefinition>> {
    (1..=max_models.max(1))
        .prop_flat_map(|count| {
            let edges = (0..count)
                .map(|i| prop::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            (Just(count), edges)
        })
        .prop_map(|(count, edges)| {
            (0..count)
                .map(|i| {
                    let mut definition = ModelDefinition::pull_only(format!("M{i}"));
                    let mut targets = edges[i].clone();
                    targets.sort_unstable();
                    targets.dedup();
                    for target in targets.into_iter().filter(|&t| t < i) {
                        definition = definition
                            .belongs_to(format!("m{target}_id"), format!("M{target}"));
                    }
                    definition
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

/// A page of reference rows, some of them tombstones, with unique ids.
pub fn reference_page_strategy() -> impl Strategy<Value = Vec<SyncRecord>> {
    prop::collection::btree_map(record_id_strategy(), (any::<bool>(), "[a-z ]{0,16}"), 1..20)
        .prop_map(|rows| {
            rows.into_iter()
                .map(|(id, (deleted, name))| {
                    if deleted {
                        SyncRecord::tombstone(id)
                    } else {
                        SyncRecord::new(json!({ "id": id, "type": "village", "name": name }))
                    }
                })
                .collect()
        })
}

/// A page of encounters for `patient_id`, each with nested notes.
///
/// Ids are unique across the whole page, encounters and notes alike.
pub fn encounter_page_strategy(patient_id: &str) -> impl Strategy<Value = Vec<SyncRecord>> {
    let patient_id = patient_id.to_string();
    prop::collection::vec(
        (any::<u8>(), prop::collection::vec("[a-z ]{0,12}", 0..4)),
        1..8,
    )
    .prop_map(move |encounters| {
        encounters
            .into_iter()
            .enumerate()
            .map(|(i, (reason, notes))| {
                let notes: Vec<Value> = notes
                    .into_iter()
                    .enumerate()
                    .map(|(j, content)| {
                        json!({ "id": format!("e{i}-n{j}"), "content": content, "items": [] })
                    })
                    .collect();
                SyncRecord::new(json!({
                    "id": format!("e{i}"),
                    "patient_id": patient_id,
                    "reason": reason,
                    "notes": notes,
                    "vaccines": [],
                }))
            })
            .collect()
    })
}
