//! CBOR encoding shared by every protocol message.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a message as CBOR.
pub fn to_cbor<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes).map_err(|e| ProtocolError::encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a message from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decode(e.to_string()))
}

/// Types with a CBOR wire form.
///
/// Implemented for every request and response so transports can treat them
/// uniformly.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Encodes to CBOR.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}
