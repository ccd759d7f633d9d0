//! Fixture schemas and record builders.
//!
//! The clinic schema mirrors a small facility deployment: reference data
//! pulled from central, patients and their facility links, encounters with
//! nested notes and vaccinations.

use serde_json::{json, Value};
use std::sync::Arc;
use tidesync_engine::{ModelDefinition, ModelRegistry};
use tidesync_protocol::SyncRecord;

/// Channel carrying generic reference data.
pub const REFERENCE_CHANNEL: &str = "reference";

/// Definitions of the clinic schema, in no particular order.
pub fn clinic_definitions() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition::root("Encounter")
            .belongs_to("patient_id", "Patient")
            .has_many("notes", "Note", "encounter_id")
            .has_many("vaccines", "AdministeredVaccine", "encounter_id")
            .local_only("printed_at"),
        ModelDefinition::nested("Note")
            .belongs_to("encounter_id", "Encounter")
            .has_many("items", "NoteItem", "note_id"),
        ModelDefinition::nested("NoteItem").belongs_to("note_id", "Note"),
        ModelDefinition::nested("AdministeredVaccine").belongs_to("encounter_id", "Encounter"),
        ModelDefinition::root("PatientFacility").belongs_to("patient_id", "Patient"),
        ModelDefinition::root("Patient").belongs_to_soft("merged_into_id", "Patient"),
        ModelDefinition::pull_only("Survey").belongs_to("program_id", "Program"),
        ModelDefinition::pull_only("Program"),
        ModelDefinition::pull_only("ReferenceData").with_channel(REFERENCE_CHANNEL),
    ]
}

/// The clinic schema as a registry.
pub fn clinic_registry() -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::from_definitions(clinic_definitions()).expect("clinic schema is valid"),
    )
}

/// The two-model program/survey schema.
pub fn survey_registry() -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::from_definitions(vec![
            ModelDefinition::pull_only("Program"),
            ModelDefinition::pull_only("Survey").belongs_to("program_id", "Program"),
        ])
        .expect("survey schema is valid"),
    )
}

/// A reference data row as central sends it.
pub fn reference_record(id: &str, name: &str) -> SyncRecord {
    SyncRecord::new(json!({ "id": id, "type": "village", "name": name }))
}

/// An encounter payload with the given notes nested.
pub fn encounter_record(id: &str, patient_id: &str, notes: Vec<Value>) -> SyncRecord {
    SyncRecord::new(json!({
        "id": id,
        "patient_id": patient_id,
        "notes": notes,
        "vaccines": [],
    }))
}

/// A nested note payload.
pub fn note_value(id: &str, content: &str) -> Value {
    json!({ "id": id, "content": content, "items": [] })
}

/// A patient payload.
pub fn patient_record(id: &str, name: &str) -> SyncRecord {
    SyncRecord::new(json!({ "id": id, "display_name": name }))
}
