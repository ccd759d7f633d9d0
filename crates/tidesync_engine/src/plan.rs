//! Association plans shared by export and import.

use crate::model::{AssociationKind, SyncRole};
use crate::registry::ModelRegistry;
use serde::Serialize;
use std::fmt;

/// One nested association in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanNode {
    /// Key of the nested value in the payload.
    pub association: String,
    /// Child model.
    pub model: String,
    /// Field on the child pointing at its parent.
    pub foreign_key: String,
    /// Cardinality.
    pub kind: AssociationKind,
    /// Grandchildren, in declaration order.
    pub children: Vec<PlanNode>,
}

/// The association tree of a model, resolved from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Model at the top of the tree.
    pub model: String,
    /// Its role.
    pub role: SyncRole,
    /// Its channel, if it has one.
    pub channel: Option<String>,
    /// Nested associations, in declaration order.
    pub children: Vec<PlanNode>,
}

/// Plan used to build outgoing records. Only roots have one.
pub type ExportPlan = SyncPlan;

/// Plan used to apply incoming records.
pub type ImportPlan = SyncPlan;

impl SyncPlan {
    pub(crate) fn build(registry: &ModelRegistry, model: &str) -> crate::SyncResult<Self> {
        let definition = registry.get(model)?;
        let mut path = vec![model.to_string()];
        Ok(Self {
            model: model.to_string(),
            role: definition.sync_role(),
            channel: definition.channel().map(str::to_string),
            children: children_of(registry, model, &mut path),
        })
    }

    /// Every model the plan touches, parent before child.
    pub fn models(&self) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [PlanNode], out: &mut Vec<&'a str>) {
            for node in nodes {
                out.push(&node.model);
                walk(&node.children, out);
            }
        }
        let mut out = vec![self.model.as_str()];
        walk(&self.children, &mut out);
        out
    }
}

fn children_of(registry: &ModelRegistry, model: &str, path: &mut Vec<String>) -> Vec<PlanNode> {
    let Some(definition) = registry.model(model) else {
        return Vec::new();
    };

    let mut nodes = Vec::new();
    for association in definition.associations() {
        if path.contains(&association.target) {
            tracing::warn!(
                model,
                association = %association.name,
                target = %association.target,
                "cyclic association dropped from sync plan"
            );
            continue;
        }

        path.push(association.target.clone());
        let children = children_of(registry, &association.target, path);
        path.pop();

        nodes.push(PlanNode {
            association: association.name.clone(),
            model: association.target.clone(),
            foreign_key: association.foreign_key.clone(),
            kind: association.kind,
            children,
        });
    }
    nodes
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_nodes(
            f: &mut fmt::Formatter<'_>,
            nodes: &[PlanNode],
            depth: usize,
        ) -> fmt::Result {
            for node in nodes {
                let shape = match node.kind {
                    AssociationKind::Many => "[]",
                    AssociationKind::One => "",
                };
                writeln!(
                    f,
                    "{:indent$}{}{} -> {} (by {})",
                    "",
                    node.association,
                    shape,
                    node.model,
                    node.foreign_key,
                    indent = depth * 2
                )?;
                write_nodes(f, &node.children, depth + 1)?;
            }
            Ok(())
        }

        match &self.channel {
            Some(channel) => writeln!(f, "{} ({:?}, channel {})", self.model, self.role, channel)?,
            None => writeln!(f, "{} ({:?})", self.model, self.role)?,
        }
        write_nodes(f, &self.children, 1)
    }
}
