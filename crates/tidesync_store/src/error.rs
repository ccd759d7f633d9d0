//! Error types for the record store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidesync_storage::StorageError),

    /// The commit log could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The table is not part of the store's catalog.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the table.
        table: String,
    },

    /// The record does not exist.
    #[error("record {id} not found in {table}")]
    RecordNotFound {
        /// Table searched.
        table: String,
        /// Primary key that was not found.
        id: String,
    },

    /// A record with this primary key already exists.
    #[error("duplicate key {id} in {table}")]
    DuplicateKey {
        /// Table written to.
        table: String,
        /// Conflicting primary key.
        id: String,
    },

    /// A foreign key points at a record that does not exist.
    #[error("foreign key {table}.{field} = {value} references missing {references} record")]
    ForeignKeyViolation {
        /// Table holding the foreign key.
        table: String,
        /// Foreign-key field.
        field: String,
        /// Referenced table.
        references: String,
        /// The dangling value.
        value: String,
    },

    /// The record is still referenced by a child record.
    #[error("cannot delete {table} {id}: still referenced by {child_table}.{child_field}")]
    RestrictViolation {
        /// Table of the record being deleted.
        table: String,
        /// Primary key of the record being deleted.
        id: String,
        /// Table holding the reference.
        child_table: String,
        /// Field holding the reference.
        child_field: String,
    },

    /// The record shape is not acceptable for the table.
    #[error("invalid record for {table}: {message}")]
    InvalidRecord {
        /// Table written to.
        table: String,
        /// What was wrong.
        message: String,
    },

    /// A catalog definition is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Write hooks kept triggering each other.
    #[error("write hooks nested deeper than {limit} levels")]
    HookDepthExceeded {
        /// Nesting limit.
        limit: usize,
    },
}

impl StoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Returns true for foreign-key, restrict and uniqueness violations.
    ///
    /// These depend on data that may arrive later, so callers treat them as
    /// retryable.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::ForeignKeyViolation { .. }
                | StoreError::RestrictViolation { .. }
                | StoreError::DuplicateKey { .. }
        )
    }
}
