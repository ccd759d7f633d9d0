//! The unit of transfer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the primary key inside [`SyncRecord::data`].
pub const ID_KEY: &str = "id";

/// Key of the tombstone marker inside nested child objects.
pub const IS_DELETED_KEY: &str = "isDeleted";

/// One root record on the wire.
///
/// `data` is a JSON object holding the root's fields and, under each
/// association name, an array (has-many) or an object or null (has-one) of
/// nested child objects. Children may carry `"isDeleted": true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Root fields and nested associations.
    pub data: Value,
    /// Whether the root itself is a tombstone.
    #[serde(default)]
    pub is_deleted: bool,
}

impl SyncRecord {
    /// Creates a live record.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            is_deleted: false,
        }
    }

    /// Creates a tombstone for `id`.
    pub fn tombstone(id: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert(ID_KEY.to_string(), Value::String(id.into()));
        Self {
            data: Value::Object(data),
            is_deleted: true,
        }
    }

    /// Marks this record as deleted.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Returns the primary key, if `data` carries a string one.
    pub fn id(&self) -> Option<&str> {
        self.data.get(ID_KEY).and_then(Value::as_str)
    }

    /// Returns `data` as an object, if it is one.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.data.as_object()
    }
}

/// Returns true if a nested child object is marked `"isDeleted": true`.
pub fn is_nested_tombstone(child: &Value) -> bool {
    child
        .get(IS_DELETED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
