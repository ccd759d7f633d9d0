//! Records and their field maps.

use crate::error::{StoreError, StoreResult};
use crate::id::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the primary-key field in the JSON form of a record.
pub const ID_FIELD: &str = "id";

/// Scalar fields of a record, keyed by field name.
pub type Fields = Map<String, Value>;

/// A row in a table: a primary key plus scalar fields.
///
/// The primary key is kept out of [`Fields`]; [`Record::to_value`] and
/// [`Record::from_value`] convert to and from the flat JSON object form
/// used on the wire, where the key lives under `"id"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    fields: Fields,
}

impl Record {
    /// Creates an empty record with the given primary key.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
        }
    }

    /// Creates a record from a primary key and a field map.
    ///
    /// An `"id"` entry inside `fields` is dropped.
    pub fn from_fields(id: impl Into<RecordId>, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Parses the flat JSON object form.
    ///
    /// # Errors
    ///
    /// Fails if `value` is not an object or lacks a string `"id"`.
    pub fn from_value(table: &str, value: Value) -> StoreResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::invalid_record(table, "expected a JSON object"));
        };
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            _ => return Err(StoreError::invalid_record(table, "missing string id")),
        };
        Ok(Self {
            id: RecordId::from(id),
            fields,
        })
    }

    /// Returns the flat JSON object form, with the key under `"id"`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Fields::with_capacity(self.fields.len() + 1);
        map.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Returns the primary key.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a field as a string, if it is one.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Returns a field as a bool, if it is one.
    #[must_use]
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    /// Sets a field. Setting `"id"` is ignored.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        if field != ID_FIELD {
            self.fields.insert(field, value.into());
        }
    }

    /// Removes a field and returns its old value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns the scalar fields.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Overwrites fields present in `patch`, keeping the rest.
    pub fn merge(&mut self, patch: Fields) {
        for (key, value) in patch {
            if key != ID_FIELD {
                self.fields.insert(key, value);
            }
        }
    }
}
