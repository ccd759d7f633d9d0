//! Foreign-key index over committed rows.

use crate::id::RecordId;
use crate::query::Query;
use crate::record::Record;
use crate::schema::Catalog;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

static NO_KEYS: BTreeSet<RecordId> = BTreeSet::new();

/// Referenced key -> keys of the rows holding it, in primary-key order.
type Postings = HashMap<String, BTreeSet<RecordId>>;

/// Committed keys of every table grouped by the value of each of its
/// foreign-key fields.
///
/// Serves equality reads on a foreign-key field (children of a parent,
/// restrict checks on delete) without scanning the child table. Only
/// string values are indexed; null or missing references are not.
#[derive(Debug, Default)]
pub(crate) struct ReferenceIndex {
    tables: HashMap<String, Vec<(String, Postings)>>,
}

impl ReferenceIndex {
    /// Creates an empty index over every foreign key in the catalog.
    pub(crate) fn new(catalog: &Catalog) -> Self {
        let tables = catalog
            .schemas()
            .filter(|schema| !schema.foreign_keys.is_empty())
            .map(|schema| {
                let fields = schema
                    .foreign_keys
                    .iter()
                    .map(|fk| (fk.field.clone(), Postings::new()))
                    .collect();
                (schema.name.clone(), fields)
            })
            .collect();
        Self { tables }
    }

    pub(crate) fn insert(&mut self, table: &str, record: &Record) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, postings) in fields {
            if let Some(Value::String(value)) = record.get(field) {
                postings
                    .entry(value.clone())
                    .or_default()
                    .insert(record.id().clone());
            }
        }
    }

    pub(crate) fn remove(&mut self, table: &str, record: &Record) {
        let Some(fields) = self.tables.get_mut(table) else {
            return;
        };
        for (field, postings) in fields {
            if let Some(Value::String(value)) = record.get(field) {
                if let Some(keys) = postings.get_mut(value) {
                    keys.remove(record.id());
                    if keys.is_empty() {
                        postings.remove(value);
                    }
                }
            }
        }
    }

    /// Candidate keys for `query`, if it pins an indexed field to a key.
    ///
    /// `None` means the query needs a scan. The candidates still have to be
    /// checked against the query's other conditions.
    pub(crate) fn candidates(&self, table: &str, query: &Query) -> Option<&BTreeSet<RecordId>> {
        let fields = self.tables.get(table)?;
        query.equalities().find_map(|(field, expected)| {
            let value = expected.as_str()?;
            let (_, postings) = fields.iter().find(|(name, _)| name == field)?;
            Some(postings.get(value).unwrap_or(&NO_KEYS))
        })
    }

    /// Number of indexed rows holding `value` in `table.field`.
    #[cfg(test)]
    pub(crate) fn len_of(&self, table: &str, field: &str, value: &str) -> usize {
        self.candidates(table, &Query::all().where_eq(field, value))
            .map_or(0, BTreeSet::len)
    }
}
