//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be parsed as the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// A message parsed but violates the protocol's shape rules.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
