//! # TideSync Protocol
//!
//! Wire types and CBOR codecs for the TideSync pull/push protocol.
//!
//! This crate provides:
//! - [`SyncRecord`]: one root record with its nested associations
//! - [`PullCursor`], [`PullPage`], [`PushReceipt`]: the transport contract
//! - [`PullRequest`], [`PushRequest`], [`ErrorResponse`]: HTTP bodies
//! - CBOR encoding/decoding through [`WireMessage`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod record;

pub use codec::{from_cbor, to_cbor, WireMessage};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ErrorResponse, PullCursor, PullPage, PullRequest, PushReceipt, PushRequest};
pub use record::{is_nested_tombstone, SyncRecord, ID_KEY, IS_DELETED_KEY};
