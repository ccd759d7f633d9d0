//! Error types for the sync engine.

use thiserror::Error;
use tidesync_protocol::ProtocolError;
use tidesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Problems with the static model metadata, detected at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A belongs-to edge or association names a model that is not registered.
    #[error("model {model} depends on unregistered model {target}")]
    UnknownDependency {
        /// Declaring model.
        model: String,
        /// Missing target.
        target: String,
    },

    /// Two models share a name.
    #[error("model {name} registered twice")]
    DuplicateModel {
        /// Model name.
        name: String,
    },

    /// Two models share a channel.
    #[error("channel {channel} used by both {first} and {second}")]
    DuplicateChannel {
        /// Channel name.
        channel: String,
        /// Model registered first.
        first: String,
        /// Model registered second.
        second: String,
    },

    /// A root or pull-only model has no usable channel.
    #[error("model {model} is synced standalone but has no channel")]
    MissingChannel {
        /// Model name.
        model: String,
    },

    /// A model uses a name reserved for sync metadata.
    #[error("{name} is reserved for sync metadata")]
    ReservedName {
        /// The reserved name.
        name: String,
    },

    /// An association does not match a belongs-to edge on its target.
    #[error("association {model}.{association}: {message}")]
    InvalidAssociation {
        /// Declaring model.
        model: String,
        /// Association name.
        association: String,
        /// What is wrong.
        message: String,
    },
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Model metadata error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// No model with this name or channel is registered.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The operation needs a model that syncs standalone.
    #[error("model {model} is not a sync root")]
    NotSyncRoot {
        /// Model name.
        model: String,
    },

    /// A received record has the wrong shape.
    #[error("invalid record for {model}: {message}")]
    InvalidRecord {
        /// Model the record was meant for.
        model: String,
        /// What is wrong.
        message: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Creates a not-a-sync-root error.
    pub fn not_sync_root(model: impl Into<String>) -> Self {
        Self::NotSyncRoot {
            model: model.into(),
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Constraint violations count as retryable: the missing parent may
    /// arrive with a later page or cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Store(err) => err.is_constraint_violation(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
