//! Table definitions and the immutable catalog built from them.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A foreign-key field and the table it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Field holding the referenced primary key.
    pub field: String,
    /// Referenced table.
    pub references: String,
}

/// Definition of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Foreign keys, checked on every write and on delete.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Creates a table without foreign keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, field: impl Into<String>, references: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.into(),
            references: references.into(),
        });
        self
    }
}

/// A reference from a child table onto a parent table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboundReference {
    pub(crate) table: String,
    pub(crate) field: String,
}

/// All table definitions of a store, plus the reverse foreign-key index
/// used for restrict checks on delete.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    tables: BTreeMap<String, TableSchema>,
    inbound: BTreeMap<String, Vec<InboundReference>>,
}

impl Catalog {
    pub(crate) fn new(schemas: impl IntoIterator<Item = TableSchema>) -> StoreResult<Self> {
        let mut tables = BTreeMap::new();
        for schema in schemas {
            if tables.contains_key(&schema.name) {
                return Err(StoreError::invalid_schema(format!(
                    "table {} defined twice",
                    schema.name
                )));
            }
            tables.insert(schema.name.clone(), schema);
        }

        let mut inbound: BTreeMap<String, Vec<InboundReference>> = BTreeMap::new();
        for schema in tables.values() {
            for fk in &schema.foreign_keys {
                if !tables.contains_key(&fk.references) {
                    return Err(StoreError::invalid_schema(format!(
                        "{}.{} references unknown table {}",
                        schema.name, fk.field, fk.references
                    )));
                }
                inbound
                    .entry(fk.references.clone())
                    .or_default()
                    .push(InboundReference {
                        table: schema.name.clone(),
                        field: fk.field.clone(),
                    });
            }
        }

        Ok(Self { tables, inbound })
    }

    pub(crate) fn table(&self, name: &str) -> StoreResult<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::unknown_table(name))
    }

    pub(crate) fn inbound(&self, name: &str) -> &[InboundReference] {
        self.inbound.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub(crate) fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_inbound_index() {
        let catalog = Catalog::new([
            TableSchema::new("Program"),
            TableSchema::new("Survey").foreign_key("program_id", "Program"),
        ])
        .unwrap();

        let inbound = catalog.inbound("Program");
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].table, "Survey");
        assert_eq!(inbound[0].field, "program_id");
        assert!(catalog.inbound("Survey").is_empty());
    }

    #[test]
    fn rejects_dangling_reference() {
        let result =
            Catalog::new([TableSchema::new("Survey").foreign_key("program_id", "Program")]);
        assert!(matches!(result, Err(StoreError::InvalidSchema { .. })));
    }

    #[test]
    fn rejects_duplicate_table() {
        let result = Catalog::new([TableSchema::new("Program"), TableSchema::new("Program")]);
        assert!(result.is_err());
    }

    #[test]
    fn self_reference_is_allowed() {
        let catalog =
            Catalog::new([TableSchema::new("Patient").foreign_key("merged_into_id", "Patient")])
                .unwrap();
        assert_eq!(catalog.inbound("Patient").len(), 1);
    }
}
