//! Pull and push messages.

use crate::codec::WireMessage;
use crate::record::SyncRecord;
use serde::{Deserialize, Serialize};

/// Where a pull resumes: everything changed after `since`, skipping the
/// first `offset` records of that change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCursor {
    /// Server timestamp of the last completed pull (0 for none).
    pub since: u64,
    /// Records of this change set already received.
    pub offset: u64,
}

impl PullCursor {
    /// Starts a change set at `since`.
    pub fn new(since: u64) -> Self {
        Self { since, offset: 0 }
    }

    /// Advances the offset past `received` records.
    #[must_use]
    pub fn advance(self, received: usize) -> Self {
        Self {
            since: self.since,
            offset: self.offset + received as u64,
        }
    }
}

/// One page of changes returned by a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    /// Changed records, tombstones included.
    pub records: Vec<SyncRecord>,
    /// Total size of the change set since `since`.
    pub count: u64,
    /// Server time the change set was computed at.
    pub requested_at: u64,
}

impl PullPage {
    /// Creates a page.
    pub fn new(records: Vec<SyncRecord>, count: u64, requested_at: u64) -> Self {
        Self {
            records,
            count,
            requested_at,
        }
    }

    /// Creates the empty page that ends a pull.
    pub fn empty(requested_at: u64) -> Self {
        Self::new(Vec::new(), 0, requested_at)
    }

    /// Returns true if the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Acknowledgement of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    /// Records the server accepted.
    pub accepted: u64,
    /// Server time the push was applied at.
    pub requested_at: u64,
}

impl PushReceipt {
    /// Creates a receipt.
    pub fn new(accepted: u64, requested_at: u64) -> Self {
        Self {
            accepted,
            requested_at,
        }
    }
}

/// Body of `POST /sync/{channel}/pull`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull position.
    pub cursor: PullCursor,
    /// Maximum records per page; the server picks when absent.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PullRequest {
    /// Creates a request.
    pub fn new(cursor: PullCursor) -> Self {
        Self {
            cursor,
            limit: None,
        }
    }

    /// Sets the page limit.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Body of `POST /sync/{channel}/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Records to store centrally.
    pub records: Vec<SyncRecord>,
}

impl PushRequest {
    /// Creates a request.
    pub fn new(records: Vec<SyncRecord>) -> Self {
        Self { records }
    }
}

/// Body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable cause.
    pub message: String,
    /// Whether the same request may succeed later.
    pub retryable: bool,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

impl WireMessage for PullRequest {}
impl WireMessage for PullPage {}
impl WireMessage for PushRequest {}
impl WireMessage for PushReceipt {}
impl WireMessage for ErrorResponse {}
