//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.).
//!
//! Endpoints, relative to the base URL:
//!
//! - `POST /sync/{channel}/pull` with a CBOR [`PullRequest`], answered by a
//!   [`PullPage`]
//! - `POST /sync/{channel}/push` with a CBOR [`PushRequest`], answered by a
//!   [`PushReceipt`]
//!
//! Non-2xx answers carry an [`ErrorResponse`].

use crate::error::{SyncError, SyncResult};
use crate::transport::{MemoryRemote, SyncTransport};
use parking_lot::RwLock;
use std::sync::Arc;
use tidesync_protocol::{
    ErrorResponse, PullCursor, PullPage, PullRequest, PushReceipt, PushRequest, SyncRecord,
    WireMessage,
};

/// Status and body of an HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 answer.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. `Err` means
/// no answer arrived at all (connection refused, timeout, ...).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a CBOR body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;
}

/// HTTP-based sync transport.
///
/// Uses CBOR encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    pull_limit: Option<u32>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            pull_limit: None,
            last_error: RwLock::new(None),
        }
    }

    /// Asks the server for at most `limit` records per pull page.
    pub fn with_pull_limit(mut self, limit: u32) -> Self {
        self.pull_limit = Some(limit);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn endpoint(&self, channel: &str, action: &str) -> String {
        format!("{}/sync/{}/{}", self.base_url, channel, action)
    }

    fn post_cbor<Req, Res>(&self, url: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage,
        Res: WireMessage,
    {
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let response = self.client.post(url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;

        if !response.is_success() {
            let err = match ErrorResponse::decode(&response.body) {
                Ok(body) => SyncError::Transport {
                    message: format!("{} ({})", body.message, response.status),
                    retryable: body.retryable,
                },
                Err(_) => SyncError::Transport {
                    message: format!("server answered {}", response.status),
                    retryable: response.status >= 500 || response.status == 429,
                },
            };
            *self.last_error.write() = Some(err.to_string());
            return Err(err);
        }

        *self.last_error.write() = None;
        Res::decode(&response.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage> {
        let mut request = PullRequest::new(cursor);
        if let Some(limit) = self.pull_limit {
            request = request.with_limit(limit);
        }
        self.post_cbor(&self.endpoint(channel, "pull"), &request)
    }

    fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt> {
        self.post_cbor(
            &self.endpoint(channel, "push"),
            &PushRequest::new(records.to_vec()),
        )
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request to `path` (e.g. `/sync/Program/pull`).
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead: every request and
/// response still goes through the CBOR codec.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }
}

fn error_response(status: u16, err: ErrorResponse) -> HttpResponse {
    HttpResponse {
        status,
        body: err.encode().unwrap_or_default(),
    }
}

fn respond<T: WireMessage>(result: SyncResult<T>) -> HttpResponse {
    match result.and_then(|value| value.encode().map_err(SyncError::from)) {
        Ok(body) => HttpResponse::ok(body),
        Err(err) => {
            let status = if err.is_retryable() { 503 } else { 422 };
            error_response(status, ErrorResponse::new(err.to_string(), err.is_retryable()))
        }
    }
}

impl LoopbackServer for MemoryRemote {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
        let route = path
            .strip_prefix("/sync/")
            .and_then(|rest| rest.rsplit_once('/'));
        let Some((channel, action)) = route else {
            return error_response(404, ErrorResponse::new(format!("no route {path}"), false));
        };

        match action {
            "pull" => match PullRequest::decode(body) {
                Ok(request) => respond(self.pull(channel, request.cursor)),
                Err(e) => error_response(400, ErrorResponse::new(e.to_string(), false)),
            },
            "push" => match PushRequest::decode(body) {
                Ok(request) => respond(self.push(channel, &request.records)),
                Err(e) => error_response(400, ErrorResponse::new(e.to_string(), false)),
            },
            _ => error_response(404, ErrorResponse::new(format!("no route {path}"), false)),
        }
    }
}
