//! Filtered, key-ordered reads.

use crate::id::RecordId;
use crate::record::{Record, ID_FIELD};
use serde_json::Value;

/// A read over one table.
///
/// Results are always ordered by primary key. `after` starts the scan
/// strictly after a key, which gives stable keyset pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<(String, Value)>,
    after: Option<RecordId>,
    limit: Option<usize>,
}

impl Query {
    /// Matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality condition. `"id"` compares against the primary key.
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Only returns records whose key sorts after `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<RecordId>) -> Self {
        self.after = Some(id.into());
        self
    }

    /// Same as [`Query::after`] but accepts an optional key.
    #[must_use]
    pub fn after_opt(mut self, id: Option<RecordId>) -> Self {
        self.after = id;
        self
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The pagination start key, if any.
    #[must_use]
    pub fn after_key(&self) -> Option<&RecordId> {
        self.after.as_ref()
    }

    /// The result cap, if any.
    #[must_use]
    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub(crate) fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(field, value)| (field.as_str(), value))
    }

    /// Returns true if the record satisfies the key bound and every condition.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(after) = &self.after {
            if record.id() <= after {
                return false;
            }
        }
        self.conditions.iter().all(|(field, expected)| {
            if field == ID_FIELD {
                expected.as_str() == Some(record.id().as_str())
            } else {
                record.get(field).unwrap_or(&Value::Null) == expected
            }
        })
    }
}
