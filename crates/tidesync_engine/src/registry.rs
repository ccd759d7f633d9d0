//! Registry of syncable models.

use crate::error::{SchemaError, SyncError, SyncResult};
use crate::graph::DependencyGraph;
use crate::model::{ModelDefinition, SyncRole, SyncableModel};
use std::collections::HashMap;
use std::sync::Arc;
use tidesync_store::TableSchema;

/// Reserved table holding one cursor row per channel.
pub const SYNC_METADATA_TABLE: &str = "sync_metadata";

/// Reserved table holding tombstones whose deletion is deferred.
pub const PENDING_DELETIONS_TABLE: &str = "sync_pending_deletions";

/// All models a node syncs, validated and ordered.
///
/// Built once at startup; schema problems surface here as [`SchemaError`]s
/// rather than during a sync cycle.
pub struct ModelRegistry {
    models: Vec<Arc<dyn SyncableModel>>,
    by_name: HashMap<String, usize>,
    by_channel: HashMap<String, usize>,
    graph: DependencyGraph,
}

impl ModelRegistry {
    /// Validates `models` and builds their dependency graph.
    pub fn new(models: Vec<Arc<dyn SyncableModel>>) -> Result<Self, SchemaError> {
        let mut by_name = HashMap::new();
        let mut by_channel: HashMap<String, usize> = HashMap::new();

        for (index, model) in models.iter().enumerate() {
            let name = model.name();
            if name == SYNC_METADATA_TABLE || name == PENDING_DELETIONS_TABLE {
                return Err(SchemaError::ReservedName {
                    name: name.to_string(),
                });
            }
            if by_name.insert(name.to_string(), index).is_some() {
                return Err(SchemaError::DuplicateModel {
                    name: name.to_string(),
                });
            }

            if model.sync_role().has_channel() {
                let channel = match model.channel() {
                    Some(channel) if !channel.is_empty() => channel,
                    _ => {
                        return Err(SchemaError::MissingChannel {
                            model: name.to_string(),
                        })
                    }
                };
                if let Some(&first) = by_channel.get(channel) {
                    return Err(SchemaError::DuplicateChannel {
                        channel: channel.to_string(),
                        first: models[first].name().to_string(),
                        second: name.to_string(),
                    });
                }
                by_channel.insert(channel.to_string(), index);
            }
        }

        let graph = DependencyGraph::from_models(&models)?;

        let registry = Self {
            models,
            by_name,
            by_channel,
            graph,
        };
        registry.validate_associations()?;
        Ok(registry)
    }

    /// Builds a registry from declarative definitions.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ModelDefinition>,
    ) -> Result<Self, SchemaError> {
        Self::new(
            definitions
                .into_iter()
                .map(|d| Arc::new(d) as Arc<dyn SyncableModel>)
                .collect(),
        )
    }

    fn validate_associations(&self) -> Result<(), SchemaError> {
        for model in &self.models {
            for association in model.associations() {
                let invalid = |message: &str| SchemaError::InvalidAssociation {
                    model: model.name().to_string(),
                    association: association.name.clone(),
                    message: message.to_string(),
                };

                let target = self.model(&association.target).ok_or_else(|| {
                    SchemaError::UnknownDependency {
                        model: model.name().to_string(),
                        target: association.target.clone(),
                    }
                })?;
                let points_back = target.belongs_to().iter().any(|edge| {
                    edge.field == association.foreign_key && edge.target == model.name()
                });
                if !points_back {
                    return Err(invalid(&format!(
                        "{}.{} is not a belongs-to edge onto {}",
                        association.target,
                        association.foreign_key,
                        model.name()
                    )));
                }
                if model.belongs_to().iter().any(|e| e.field == association.name)
                    || association.name == tidesync_store::ID_FIELD
                {
                    return Err(invalid("name collides with a field"));
                }
            }
        }
        Ok(())
    }

    /// Looks up a model by name.
    pub fn model(&self, name: &str) -> Option<&dyn SyncableModel> {
        self.by_name.get(name).map(|&i| self.models[i].as_ref())
    }

    /// Looks up a model by name, failing with [`SyncError::UnknownModel`].
    pub fn get(&self, name: &str) -> SyncResult<&dyn SyncableModel> {
        self.model(name)
            .ok_or_else(|| SyncError::UnknownModel(name.to_string()))
    }

    /// Looks up the model syncing on `channel`.
    pub fn by_channel(&self, channel: &str) -> Option<&dyn SyncableModel> {
        self.by_channel
            .get(channel)
            .map(|&i| self.models[i].as_ref())
    }

    /// Dependency graph of the registered models.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Models in creation order.
    pub fn in_creation_order(&self) -> impl Iterator<Item = &dyn SyncableModel> + '_ {
        self.graph
            .creation_order()
            .iter()
            .filter_map(|name| self.model(name))
    }

    /// Models with their own channel, in creation order.
    pub fn channel_models(&self) -> impl Iterator<Item = &dyn SyncableModel> + '_ {
        self.in_creation_order()
            .filter(|m| m.sync_role().has_channel())
    }

    /// Aggregate roots, in creation order.
    pub fn roots(&self) -> impl Iterator<Item = &dyn SyncableModel> + '_ {
        self.in_creation_order()
            .filter(|m| m.sync_role() == SyncRole::Root)
    }

    /// Store tables for every model plus the reserved sync tables.
    ///
    /// Soft edges are foreign keys too; only ordering ignores them.
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        let mut schemas: Vec<TableSchema> = self
            .models
            .iter()
            .map(|model| {
                model
                    .belongs_to()
                    .iter()
                    .fold(TableSchema::new(model.name()), |schema, edge| {
                        schema.foreign_key(edge.field.clone(), edge.target.clone())
                    })
            })
            .collect();
        schemas.push(TableSchema::new(SYNC_METADATA_TABLE));
        schemas.push(TableSchema::new(PENDING_DELETIONS_TABLE));
        schemas
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.graph.creation_order())
            .field("channels", &self.by_channel.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clinic() -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::pull_only("Survey").belongs_to("program_id", "Program"),
            ModelDefinition::pull_only("Program"),
            ModelDefinition::root("Encounter").has_many("notes", "Note", "encounter_id"),
            ModelDefinition::nested("Note").belongs_to("encounter_id", "Encounter"),
        ]
    }

    #[test]
    fn orders_and_classifies_models() {
        let registry = ModelRegistry::from_definitions(clinic()).unwrap();

        let order: Vec<_> = registry.in_creation_order().map(|m| m.name()).collect();
        assert_eq!(order, ["Program", "Survey", "Encounter", "Note"]);

        let channels: Vec<_> = registry.channel_models().map(|m| m.name()).collect();
        assert_eq!(channels, ["Program", "Survey", "Encounter"]);

        let roots: Vec<_> = registry.roots().map(|m| m.name()).collect();
        assert_eq!(roots, ["Encounter"]);

        assert_eq!(registry.by_channel("Encounter").unwrap().name(), "Encounter");
        assert!(registry.by_channel("Note").is_none());
    }

    #[test]
    fn unknown_model_lookup() {
        let registry = ModelRegistry::from_definitions(clinic()).unwrap();
        assert!(matches!(registry.get("Nope"), Err(SyncError::UnknownModel(_))));
    }

    #[test]
    fn duplicate_names_and_channels_are_rejected() {
        let err = ModelRegistry::from_definitions(vec![
            ModelDefinition::pull_only("Program"),
            ModelDefinition::root("Program"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateModel { .. }));

        let err = ModelRegistry::from_definitions(vec![
            ModelDefinition::pull_only("Program").with_channel("reference"),
            ModelDefinition::pull_only("ReferenceData").with_channel("reference"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateChannel { .. }));
    }

    #[test]
    fn empty_channel_and_reserved_names_are_rejected() {
        let err = ModelRegistry::from_definitions(vec![
            ModelDefinition::pull_only("Program").with_channel("")
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::MissingChannel { .. }));

        let err =
            ModelRegistry::from_definitions(vec![ModelDefinition::pull_only(SYNC_METADATA_TABLE)])
                .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn association_must_mirror_a_belongs_to_edge() {
        let err = ModelRegistry::from_definitions(vec![
            ModelDefinition::root("Encounter").has_many("notes", "Note", "encounter_id"),
            ModelDefinition::nested("Note"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAssociation { .. }));

        let err = ModelRegistry::from_definitions(vec![
            ModelDefinition::root("Encounter").has_many("notes", "Nope", "encounter_id"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownDependency { .. }));
    }

    #[test]
    fn table_schemas_include_reserved_tables() {
        let registry = ModelRegistry::from_definitions(clinic()).unwrap();
        let schemas = registry.table_schemas();
        let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&SYNC_METADATA_TABLE));
        assert!(names.contains(&PENDING_DELETIONS_TABLE));

        let survey = schemas.iter().find(|s| s.name == "Survey").unwrap();
        assert_eq!(survey.foreign_keys[0].field, "program_id");
        assert_eq!(survey.foreign_keys[0].references, "Program");
    }
}
