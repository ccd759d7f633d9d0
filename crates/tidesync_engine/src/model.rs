//! Model metadata: roles, belongs-to edges and nested associations.

use serde::{Deserialize, Serialize};
use tidesync_store::Fields;

/// Name of the dirty flag column carried by every [`SyncRole::Root`] model.
pub const MARKED_FOR_PUSH: &str = "marked_for_push";

/// How a model takes part in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    /// Pulled and pushed on its own channel; carries the dirty flag and
    /// nests its child associations.
    Root,
    /// Pulled on its own channel, never pushed.
    PullOnly,
    /// Only travels nested inside a root's payload.
    Nested,
}

impl SyncRole {
    /// Returns true if the model has a channel of its own.
    pub fn has_channel(self) -> bool {
        matches!(self, SyncRole::Root | SyncRole::PullOnly)
    }

    /// Returns true for aggregate roots.
    pub fn is_root(self) -> bool {
        self == SyncRole::Root
    }
}

/// Whether a belongs-to edge constrains creation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrdering {
    /// Parent must be created before the child.
    #[default]
    Hard,
    /// Still a foreign key, but ignored when ordering models.
    Soft,
}

/// A foreign-key reference onto a parent model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BelongsTo {
    /// Foreign-key field on the declaring model.
    pub field: String,
    /// Parent model.
    pub target: String,
    /// Ordering participation.
    #[serde(default)]
    pub ordering: EdgeOrdering,
}

impl BelongsTo {
    /// Creates a hard edge.
    pub fn new(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            ordering: EdgeOrdering::Hard,
        }
    }

    /// Turns the edge into a soft one.
    #[must_use]
    pub fn soft(mut self) -> Self {
        self.ordering = EdgeOrdering::Soft;
        self
    }

    /// Returns true if this edge participates in creation order.
    pub fn is_hard(&self) -> bool {
        self.ordering == EdgeOrdering::Hard
    }
}

/// Cardinality of an association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// Array of children.
    #[default]
    Many,
    /// A single child or null.
    One,
}

/// A child collection nested inside the declaring model's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Key of the nested value in the payload.
    pub name: String,
    /// Child model.
    pub target: String,
    /// Field on the child pointing back at the parent.
    pub foreign_key: String,
    /// Cardinality.
    #[serde(default)]
    pub kind: AssociationKind,
}

/// Static sync metadata of a record type.
///
/// Implement this for typed models or use [`ModelDefinition`], which can be
/// loaded from JSON.
pub trait SyncableModel: Send + Sync {
    /// Model (and table) name.
    fn name(&self) -> &str;

    /// Sync role.
    fn sync_role(&self) -> SyncRole;

    /// Channel used by standalone pulls and pushes. `None` for nested models.
    fn channel(&self) -> Option<&str>;

    /// Foreign-key references onto parent models.
    fn belongs_to(&self) -> &[BelongsTo];

    /// Child associations nested on export and import.
    fn associations(&self) -> &[Association];

    /// Adjusts outgoing data before it leaves the node.
    fn sanitize_for_push(&self, _data: &mut Fields) {}

    /// Adjusts incoming data before it is written locally.
    fn sanitize_for_import(&self, _data: &mut Fields) {}
}

/// Declarative [`SyncableModel`].
///
/// ```rust
/// use tidesync_engine::ModelDefinition;
///
/// let encounter = ModelDefinition::root("Encounter")
///     .belongs_to("patient_id", "Patient")
///     .has_many("notes", "Note", "encounter_id")
///     .local_only("printed_at");
/// assert_eq!(encounter.channel.as_deref(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Model name.
    pub name: String,
    /// Sync role.
    pub role: SyncRole,
    /// Channel override; defaults to the model name.
    #[serde(default)]
    pub channel: Option<String>,
    /// Belongs-to edges.
    #[serde(default)]
    pub belongs_to: Vec<BelongsTo>,
    /// Nested associations.
    #[serde(default)]
    pub associations: Vec<Association>,
    /// Fields that never leave the node and are never overwritten by pulls.
    #[serde(default)]
    pub local_only: Vec<String>,
}

impl ModelDefinition {
    /// Creates a definition with the given role.
    pub fn new(name: impl Into<String>, role: SyncRole) -> Self {
        Self {
            name: name.into(),
            role,
            channel: None,
            belongs_to: Vec::new(),
            associations: Vec::new(),
            local_only: Vec::new(),
        }
    }

    /// Creates an aggregate root.
    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, SyncRole::Root)
    }

    /// Creates a pull-only model.
    pub fn pull_only(name: impl Into<String>) -> Self {
        Self::new(name, SyncRole::PullOnly)
    }

    /// Creates a nested model.
    pub fn nested(name: impl Into<String>) -> Self {
        Self::new(name, SyncRole::Nested)
    }

    /// Overrides the channel name.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Adds a hard belongs-to edge.
    #[must_use]
    pub fn belongs_to(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.belongs_to.push(BelongsTo::new(field, target));
        self
    }

    /// Adds a soft belongs-to edge, ignored for ordering.
    #[must_use]
    pub fn belongs_to_soft(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.belongs_to.push(BelongsTo::new(field, target).soft());
        self
    }

    /// Adds a has-many association.
    #[must_use]
    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.associate(name, target, foreign_key, AssociationKind::Many)
    }

    /// Adds a has-one association.
    #[must_use]
    pub fn has_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.associate(name, target, foreign_key, AssociationKind::One)
    }

    /// Declares a field that stays on this node.
    #[must_use]
    pub fn local_only(mut self, field: impl Into<String>) -> Self {
        self.local_only.push(field.into());
        self
    }

    fn associate(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        kind: AssociationKind,
    ) -> Self {
        self.associations.push(Association {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            kind,
        });
        self
    }
}

impl SyncableModel for ModelDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync_role(&self) -> SyncRole {
        self.role
    }

    fn channel(&self) -> Option<&str> {
        if !self.role.has_channel() {
            return None;
        }
        Some(self.channel.as_deref().unwrap_or(&self.name))
    }

    fn belongs_to(&self) -> &[BelongsTo] {
        &self.belongs_to
    }

    fn associations(&self) -> &[Association] {
        &self.associations
    }

    fn sanitize_for_push(&self, data: &mut Fields) {
        for field in &self.local_only {
            data.remove(field);
        }
    }

    fn sanitize_for_import(&self, data: &mut Fields) {
        for field in &self.local_only {
            data.remove(field);
        }
    }
}
