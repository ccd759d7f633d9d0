//! Dependency graph over record types.
//!
//! Every hard belongs-to edge says "the target must exist before me". The
//! graph turns those edges into a creation order (parents first) and its
//! reverse, the deletion order.
//!
//! Cycles are broken rather than rejected: self-references and
//! [`EdgeOrdering::Soft`](crate::EdgeOrdering::Soft) edges never take part,
//! and a back edge found during the depth-first sort is dropped with a
//! warning.

use crate::error::SchemaError;
use crate::model::SyncableModel;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable creation order of a set of models.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    positions: HashMap<String, usize>,
    dependencies: HashMap<String, Vec<String>>,
    excluded: Vec<(String, String)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Builds the graph from model metadata, in registration order.
    ///
    /// # Errors
    ///
    /// [`SchemaError::UnknownDependency`] if an edge names a model that is
    /// not in `models`.
    pub fn from_models(models: &[Arc<dyn SyncableModel>]) -> Result<Self, SchemaError> {
        let names: Vec<&str> = models.iter().map(|m| m.name()).collect();

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for model in models {
            let mut deps = Vec::new();
            for edge in model.belongs_to() {
                if !names.contains(&edge.target.as_str()) {
                    return Err(SchemaError::UnknownDependency {
                        model: model.name().to_string(),
                        target: edge.target.clone(),
                    });
                }
                if edge.is_hard() && edge.target != model.name() && !deps.contains(&edge.target) {
                    deps.push(edge.target.clone());
                }
            }
            dependencies.insert(model.name().to_string(), deps);
        }

        let mut graph = Self {
            order: Vec::with_capacity(names.len()),
            positions: HashMap::new(),
            dependencies,
            excluded: Vec::new(),
        };

        let mut marks: HashMap<String, Mark> = names
            .iter()
            .map(|name| (name.to_string(), Mark::Unvisited))
            .collect();
        for name in &names {
            graph.visit(name, &mut marks);
        }

        for (from, to) in &graph.excluded {
            if let Some(deps) = graph.dependencies.get_mut(from) {
                deps.retain(|dep| dep != to);
            }
        }
        graph.positions = graph
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(graph)
    }

    fn visit(&mut self, name: &str, marks: &mut HashMap<String, Mark>) {
        if marks.get(name).copied() != Some(Mark::Unvisited) {
            return;
        }
        marks.insert(name.to_string(), Mark::Visiting);

        let deps = self.dependencies.get(name).cloned().unwrap_or_default();
        for dep in deps {
            match marks.get(&dep).copied() {
                Some(Mark::Visiting) => {
                    tracing::warn!(
                        model = name,
                        depends_on = %dep,
                        "dependency cycle: ignoring edge for ordering; mark it soft to silence this"
                    );
                    self.excluded.push((name.to_string(), dep));
                }
                Some(Mark::Unvisited) => self.visit(&dep, marks),
                _ => {}
            }
        }

        marks.insert(name.to_string(), Mark::Done);
        self.order.push(name.to_string());
    }

    /// Models ordered so every hard parent precedes its children.
    pub fn creation_order(&self) -> &[String] {
        &self.order
    }

    /// The exact reverse of [`creation_order`](Self::creation_order).
    pub fn deletion_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    /// Hard dependencies of a model that take part in ordering.
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.dependencies.get(name).map(Vec::as_slice)
    }

    /// Position of a model in the creation order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Edges dropped to break unannotated cycles, as `(model, dependency)`.
    pub fn excluded_edges(&self) -> &[(String, String)] {
        &self.excluded
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no models are registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Calls `visitor` once per model in creation order.
    ///
    /// Each call finishes before the next starts. The first error stops the
    /// traversal and is returned.
    pub fn run<E, F>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&str) -> Result<(), E>,
    {
        for name in &self.order {
            visitor(name)?;
        }
        Ok(())
    }
}
