//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tidesync_protocol::{PullCursor, PullPage, PushReceipt, SyncRecord};

/// A sync transport moves pages between a node and the central server.
///
/// Calls block until the server answers. Timeouts, retries and cancellation
/// belong to the implementation; any error it returns fails the current
/// page and leaves local cursors and dirty flags untouched.
pub trait SyncTransport: Send + Sync {
    /// Fetches the page of `channel` changes at `cursor`.
    fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage>;

    /// Sends records of `channel` to the server.
    fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage> {
        (**self).pull(channel, cursor)
    }

    fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt> {
        (**self).push(channel, records)
    }
}

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// A pull.
    Pull {
        /// Channel pulled.
        channel: String,
        /// Cursor sent.
        cursor: PullCursor,
    },
    /// A push.
    Push {
        /// Channel pushed.
        channel: String,
        /// Records sent.
        records: Vec<SyncRecord>,
    },
}

#[derive(Debug, Clone)]
enum Scripted<T> {
    Respond(T),
    Fail { message: String, retryable: bool },
}

impl<T> Scripted<T> {
    fn into_result(self) -> SyncResult<T> {
        match self {
            Scripted::Respond(value) => Ok(value),
            Scripted::Fail { message, retryable } => {
                Err(SyncError::Transport { message, retryable })
            }
        }
    }
}

/// A scripted transport for testing.
///
/// Pull pages and push outcomes are queued per channel and consumed in
/// order. An exhausted pull script answers with an empty page; an exhausted
/// push script accepts everything.
#[derive(Debug, Default)]
pub struct MockTransport {
    pulls: Mutex<HashMap<String, VecDeque<Scripted<PullPage>>>>,
    pushes: Mutex<HashMap<String, VecDeque<Scripted<PushReceipt>>>>,
    calls: Mutex<Vec<TransportCall>>,
    clock: Mutex<u64>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server time used for default answers.
    pub fn set_clock(&self, now: u64) {
        *self.clock.lock() = now;
    }

    /// Queues a pull page for `channel`.
    pub fn queue_pull(&self, channel: &str, page: PullPage) {
        self.pulls
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(Scripted::Respond(page));
    }

    /// Queues a pull failure for `channel`.
    pub fn fail_pull(&self, channel: &str, message: impl Into<String>, retryable: bool) {
        self.pulls
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(Scripted::Fail {
                message: message.into(),
                retryable,
            });
    }

    /// Queues a push receipt for `channel`.
    pub fn queue_push(&self, channel: &str, receipt: PushReceipt) {
        self.pushes
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(Scripted::Respond(receipt));
    }

    /// Queues a push rejection for `channel`.
    pub fn fail_push(&self, channel: &str, message: impl Into<String>, retryable: bool) {
        self.pushes
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(Scripted::Fail {
                message: message.into(),
                retryable,
            });
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Records pushed on `channel`, across all calls.
    pub fn pushed(&self, channel: &str) -> Vec<SyncRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Push {
                    channel: c,
                    records,
                } if c == channel => Some(records.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Cursors sent when pulling `channel`.
    pub fn pull_cursors(&self, channel: &str) -> Vec<PullCursor> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Pull { channel: c, cursor } if c == channel => Some(*cursor),
                _ => None,
            })
            .collect()
    }
}

impl SyncTransport for MockTransport {
    fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage> {
        self.calls.lock().push(TransportCall::Pull {
            channel: channel.to_string(),
            cursor,
        });
        let scripted = self
            .pulls
            .lock()
            .get_mut(channel)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(scripted) => scripted.into_result(),
            None => Ok(PullPage::empty(*self.clock.lock())),
        }
    }

    fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt> {
        self.calls.lock().push(TransportCall::Push {
            channel: channel.to_string(),
            records: records.to_vec(),
        });
        let scripted = self
            .pushes
            .lock()
            .get_mut(channel)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(scripted) => scripted.into_result(),
            None => Ok(PushReceipt::new(records.len() as u64, *self.clock.lock())),
        }
    }
}

#[derive(Debug, Clone)]
struct RemoteEntry {
    tick: u64,
    record: SyncRecord,
}

#[derive(Debug, Default)]
struct RemoteState {
    tick: u64,
    channels: HashMap<String, BTreeMap<String, RemoteEntry>>,
    offline: bool,
}

/// In-memory central authority.
///
/// Keeps the latest version of every record per channel, stamped with a
/// monotonically increasing tick. A push replaces records by id (last writer
/// wins) under a fresh tick; a pull returns records stamped after `since`,
/// in tick order, paged by offset.
///
/// A page's `requested_at` is the highest tick fully covered by the pages
/// up to and including it, so a node that stops after any page resumes
/// without skipping records of later pages.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    page_limit: usize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty remote serving pages of 100 records.
    pub fn new() -> Self {
        Self::with_page_limit(100)
    }

    /// Creates an empty remote with a custom page size. Zero is treated as one.
    pub fn with_page_limit(page_limit: usize) -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            page_limit: page_limit.max(1),
        }
    }

    /// Current server time.
    pub fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    /// Simulates an unreachable server: every call fails retryably.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Stores records as if another node had pushed them.
    pub fn seed(&self, channel: &str, records: Vec<SyncRecord>) -> SyncResult<u64> {
        let mut state = self.state.lock();
        Self::store(&mut state, channel, records)
    }

    /// Latest version of every record of `channel`, tombstones included.
    pub fn records(&self, channel: &str) -> Vec<SyncRecord> {
        self.state
            .lock()
            .channels
            .get(channel)
            .map(|rows| rows.values().map(|e| e.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Latest version of one record.
    pub fn record(&self, channel: &str, id: &str) -> Option<SyncRecord> {
        self.state
            .lock()
            .channels
            .get(channel)
            .and_then(|rows| rows.get(id))
            .map(|e| e.record.clone())
    }

    fn store(state: &mut RemoteState, channel: &str, records: Vec<SyncRecord>) -> SyncResult<u64> {
        let ids = records
            .iter()
            .map(|r| {
                r.id()
                    .map(str::to_string)
                    .ok_or_else(|| SyncError::transport_fatal("record without id rejected"))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        state.tick += 1;
        let tick = state.tick;
        let rows = state.channels.entry(channel.to_string()).or_default();
        for (id, record) in ids.into_iter().zip(records) {
            rows.insert(id, RemoteEntry { tick, record });
        }
        Ok(tick)
    }
}

impl SyncTransport for MemoryRemote {
    fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage> {
        let state = self.state.lock();
        if state.offline {
            return Err(SyncError::transport_retryable("central server unreachable"));
        }

        let mut changed: Vec<&RemoteEntry> = state
            .channels
            .get(channel)
            .map(|rows| rows.values().filter(|e| e.tick > cursor.since).collect())
            .unwrap_or_default();
        changed.sort_by(|a, b| {
            a.tick
                .cmp(&b.tick)
                .then_with(|| a.record.id().cmp(&b.record.id()))
        });

        let start = (cursor.offset as usize).min(changed.len());
        let end = (start + self.page_limit).min(changed.len());
        let records = changed[start..end]
            .iter()
            .map(|e| e.record.clone())
            .collect();

        // Highest tick whose records all sit at or before this page.
        let requested_at = match changed.get(end) {
            Some(next) => next.tick - 1,
            None => state.tick,
        };
        Ok(PullPage::new(records, changed.len() as u64, requested_at))
    }

    fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(SyncError::transport_retryable("central server unreachable"));
        }
        let tick = Self::store(&mut state, channel, records.to_vec())?;
        Ok(PushReceipt::new(records.len() as u64, tick))
    }
}
