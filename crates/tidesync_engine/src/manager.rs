//! The sync manager: pull, deferred deletion and push cycles per channel.

use crate::config::SyncConfig;
use crate::cursor::{
    advance_pull_cursor, advance_push_cursor, dequeue_deletion, pending_deletions,
    queue_deletion, read_cursor,
};
use crate::error::{SyncError, SyncResult};
use crate::export::{
    create_export_plan, execute_export_plan, export_record, is_dirty, strip_local_state,
    ExportPage,
};
use crate::import::{create_import_plan, execute_import_plan, ImportStats};
use crate::model::{SyncableModel, MARKED_FOR_PUSH};
use crate::registry::{ModelRegistry, PENDING_DELETIONS_TABLE};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_protocol::{PullCursor, SyncRecord};
use tidesync_store::{ApplyOptions, Fields, RecordId, Store};

/// What a channel is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not syncing.
    Idle,
    /// Waiting for a pull page.
    Pulling,
    /// Applying a pull page.
    Applying,
    /// Exporting dirty roots.
    Collecting,
    /// Waiting for a push to be acknowledged.
    Pushing,
    /// Clearing dirty flags after an acknowledged push.
    Confirming,
}

impl ChannelState {
    /// Returns true if the channel is in an active sync state.
    pub fn is_active(&self) -> bool {
        *self != ChannelState::Idle
    }
}

/// Phase of a cycle a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Pulling and applying pages.
    Pull,
    /// Applying deferred tombstones.
    Delete,
    /// Exporting and pushing.
    Push,
}

/// A channel that failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    /// Channel name.
    pub channel: String,
    /// Phase that failed.
    pub direction: SyncDirection,
    /// Error text.
    pub error: String,
    /// Whether the next cycle may succeed.
    pub retryable: bool,
}

/// Outcome of pulling one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Non-empty pages applied.
    pub pages: u64,
    /// Records received.
    pub records: u64,
    /// Tombstones queued for the deletion pass.
    pub deferred: u64,
    /// What the applied records changed.
    pub stats: ImportStats,
    /// Cursor after the pull, if one exists.
    pub last_synced: Option<u64>,
}

/// Outcome of pushing one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Push calls made.
    pub batches: u64,
    /// Records sent.
    pub pushed: u64,
    /// Roots whose dirty flag was cleared.
    pub confirmed: u64,
    /// Roots left dirty because they changed while in flight.
    pub changed_in_flight: u64,
}

/// Result of a full sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleReport {
    /// Records received across channels.
    pub pulled: u64,
    /// Rows deleted by the deferred deletion pass.
    pub deleted: u64,
    /// Records pushed across channels.
    pub pushed: u64,
    /// Channels that failed.
    pub failures: Vec<ChannelFailure>,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl SyncCycleReport {
    /// Returns true if every channel succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, channel: &str, direction: SyncDirection, err: &SyncError) {
        tracing::warn!(channel, ?direction, error = %err, "channel sync failed");
        self.failures.push(ChannelFailure {
            channel: channel.to_string(),
            direction,
            error: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of records pulled.
    pub records_pulled: u64,
    /// Total number of records pushed.
    pub records_pushed: u64,
    /// Total number of channel failures.
    pub channel_failures: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Drives sync for one node.
///
/// Every operation blocks on the transport and the store. At most one full
/// cycle runs at a time; [`SyncScheduler`](crate::SyncScheduler) is meant to
/// be its only caller in production.
pub struct SyncManager<T: SyncTransport> {
    config: SyncConfig,
    registry: Arc<ModelRegistry>,
    store: Arc<Store>,
    transport: T,
    states: RwLock<HashMap<String, ChannelState>>,
    stats: RwLock<SyncStats>,
    cycle: Mutex<()>,
}

/// Puts a channel back to idle however the operation ends.
struct StateGuard<'a> {
    states: &'a RwLock<HashMap<String, ChannelState>>,
    channel: &'a str,
}

impl<'a> StateGuard<'a> {
    fn enter(
        states: &'a RwLock<HashMap<String, ChannelState>>,
        channel: &'a str,
        state: ChannelState,
    ) -> Self {
        let guard = Self { states, channel };
        guard.set(state);
        guard
    }

    fn set(&self, state: ChannelState) {
        self.states.write().insert(self.channel.to_string(), state);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.set(ChannelState::Idle);
    }
}

impl<T: SyncTransport> SyncManager<T> {
    /// Creates a manager. Hooks are not installed here; see
    /// [`install_dirty_marker`](crate::install_dirty_marker).
    pub fn new(
        config: SyncConfig,
        registry: Arc<ModelRegistry>,
        store: Arc<Store>,
        transport: T,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            transport,
            states: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
            cycle: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the model registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Returns the local store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current state of a channel.
    pub fn channel_state(&self, channel: &str) -> ChannelState {
        self.states
            .read()
            .get(channel)
            .copied()
            .unwrap_or(ChannelState::Idle)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn channel_of<'m>(&self, model: &'m dyn SyncableModel) -> SyncResult<&'m str> {
        model
            .channel()
            .ok_or_else(|| SyncError::not_sync_root(model.name()))
    }

    /// Pulls every page of a model's channel and applies it.
    ///
    /// Each page is one transaction: its records (tombstones inline) and the
    /// cursor advance commit together or not at all. Page N+1 is only
    /// requested after page N committed. An empty page ends the pull.
    pub fn pull_and_import(&self, model: &str) -> SyncResult<PullSummary> {
        self.pull_channel(model, false)
    }

    fn pull_channel(&self, model_name: &str, defer_deletions: bool) -> SyncResult<PullSummary> {
        let model = self.registry.get(model_name)?;
        let channel = self.channel_of(model)?;
        let plan = create_import_plan(&self.registry, model_name)?;

        let state = StateGuard::enter(&self.states, channel, ChannelState::Pulling);
        let since = read_cursor(self.store.as_ref(), channel)?.map_or(0, |c| c.last_synced);
        let mut cursor = PullCursor::new(since);
        let mut summary = PullSummary::default();

        loop {
            state.set(ChannelState::Pulling);
            let page = self.transport.pull(channel, cursor)?;
            if page.is_empty() {
                break;
            }

            state.set(ChannelState::Applying);
            let (stats, deferred, synced) = self.store.transaction(|txn| {
                let mut stats = ImportStats::default();
                let mut deferred = 0;
                for record in &page.records {
                    if defer_deletions && record.is_deleted {
                        queue_deletion(txn, channel, model_name, record)?;
                        deferred += 1;
                    } else {
                        if let Some(id) = record.id() {
                            dequeue_deletion(txn, channel, id)?;
                        }
                        stats += execute_import_plan(txn, &self.registry, &plan, record)?;
                    }
                }
                let cursor = advance_pull_cursor(txn, channel, page.requested_at)?;
                Ok::<_, SyncError>((stats, deferred, cursor.last_synced))
            })?;

            tracing::debug!(
                channel,
                offset = cursor.offset,
                records = page.records.len(),
                total = page.count,
                requested_at = page.requested_at,
                "applied pull page"
            );

            summary.pages += 1;
            summary.records += page.records.len() as u64;
            summary.deferred += deferred;
            summary.stats += stats;
            summary.last_synced = Some(synced);
            cursor = cursor.advance(page.records.len());
        }

        if summary.last_synced.is_none() && since > 0 {
            summary.last_synced = Some(since);
        }
        tracing::info!(
            node = %self.config.node_id,
            channel,
            pages = summary.pages,
            created = summary.stats.created,
            updated = summary.stats.updated,
            deleted = summary.stats.deleted,
            deferred = summary.deferred,
            "pulled channel"
        );
        self.stats.write().records_pulled += summary.records;
        Ok(summary)
    }

    /// Pushes every dirty root of a model.
    ///
    /// Roots are exported page by page in key order and filtered to dirty
    /// ones. After a successful push, one transaction clears the flag of
    /// each pushed root still in the exact state that was sent and advances
    /// the push cursor. A failed push changes nothing, so the records are
    /// sent again next time.
    pub fn export_and_push(&self, model: &str) -> SyncResult<PushSummary> {
        let plan = create_export_plan(&self.registry, model)?;
        let channel = self.channel_of(self.registry.get(model)?)?;
        let limit = self.config.push_page_size.max(1);

        let state = StateGuard::enter(&self.states, channel, ChannelState::Collecting);
        let mut page = ExportPage::first(limit);
        let mut summary = PushSummary::default();

        loop {
            state.set(ChannelState::Collecting);
            let exported = execute_export_plan(self.store.as_ref(), &self.registry, &plan, &page)?;
            let fetched = exported.len();
            let last = exported
                .last()
                .and_then(SyncRecord::id)
                .map(RecordId::from);

            let outgoing: Vec<SyncRecord> = exported
                .into_iter()
                .filter(is_dirty)
                .map(strip_local_state)
                .collect();

            if !outgoing.is_empty() {
                state.set(ChannelState::Pushing);
                let receipt = self.transport.push(channel, &outgoing)?;

                state.set(ChannelState::Confirming);
                let (confirmed, changed) = self.store.transaction(|txn| {
                    let mut confirmed = 0;
                    let mut changed = 0;
                    for sent in &outgoing {
                        let Some(id) = sent.id() else { continue };
                        let Some(root) = txn.get(&plan.model, id)? else {
                            continue;
                        };
                        let current =
                            strip_local_state(export_record(&*txn, &self.registry, &plan, &root)?);
                        if current != *sent {
                            changed += 1;
                            continue;
                        }
                        let mut patch = Fields::new();
                        patch.insert(MARKED_FOR_PUSH.to_string(), Value::Bool(false));
                        txn.update(&plan.model, id, patch, ApplyOptions::bulk())?;
                        confirmed += 1;
                    }
                    advance_push_cursor(txn, channel, receipt.requested_at)?;
                    Ok::<_, SyncError>((confirmed, changed))
                })?;

                tracing::debug!(
                    channel,
                    pushed = outgoing.len(),
                    confirmed,
                    requested_at = receipt.requested_at,
                    "confirmed push batch"
                );
                summary.batches += 1;
                summary.pushed += outgoing.len() as u64;
                summary.confirmed += confirmed;
                summary.changed_in_flight += changed;
            }

            match last {
                Some(last) if fetched >= limit => page = page.next(last),
                _ => break,
            }
        }

        tracing::info!(
            node = %self.config.node_id,
            channel,
            pushed = summary.pushed,
            confirmed = summary.confirmed,
            "pushed channel"
        );
        self.stats.write().records_pushed += summary.pushed;
        Ok(summary)
    }

    /// Applies queued tombstones channel by channel, children before parents.
    ///
    /// Each channel's queue is applied in one transaction and removed with
    /// it. A channel that fails keeps its queue for the next attempt.
    pub fn apply_pending_deletions(&self) -> SyncResult<(u64, Vec<(String, SyncError)>)> {
        let mut deleted = 0;
        let mut failures = Vec::new();

        for name in self.registry.graph().deletion_order() {
            let Some(model) = self.registry.model(&name) else {
                continue;
            };
            let Some(channel) = model.channel() else {
                continue;
            };

            let queued = pending_deletions(self.store.as_ref(), channel)?;
            if queued.is_empty() {
                continue;
            }

            let result = self.store.transaction(|txn| {
                let mut stats = ImportStats::default();
                for (key, pending) in &queued {
                    let plan = create_import_plan(&self.registry, &pending.model)?;
                    stats += execute_import_plan(txn, &self.registry, &plan, &pending.record)?;
                    txn.destroy(PENDING_DELETIONS_TABLE, key)?;
                }
                Ok::<_, SyncError>(stats)
            });

            match result {
                Ok(stats) => {
                    tracing::debug!(channel, deleted = stats.deleted, "applied deferred deletions");
                    deleted += stats.deleted;
                }
                Err(err) => failures.push((channel.to_string(), err)),
            }
        }

        Ok((deleted, failures))
    }

    /// Runs one full cycle.
    ///
    /// 1. Pull every channel in creation order, deferring tombstones.
    /// 2. Apply deferred tombstones in deletion order.
    /// 3. Push every root in creation order, skipping channels whose pull
    ///    or deletion pass failed this cycle.
    ///
    /// Channel failures are collected in the report; only an unreadable
    /// store fails the cycle itself.
    pub fn run_sync(&self) -> SyncResult<SyncCycleReport> {
        let _cycle = self.cycle.lock();
        let start = Instant::now();
        let mut report = SyncCycleReport::default();
        let mut held_back = HashSet::new();

        let channel_models: Vec<String> = self
            .registry
            .channel_models()
            .map(|m| m.name().to_string())
            .collect();
        for name in &channel_models {
            match self.pull_channel(name, true) {
                Ok(summary) => report.pulled += summary.records,
                Err(err) => {
                    let channel = self.channel_name(name);
                    report.record_failure(&channel, SyncDirection::Pull, &err);
                    held_back.insert(channel);
                }
            }
        }

        let (deleted, failures) = self.apply_pending_deletions()?;
        report.deleted = deleted;
        for (channel, err) in failures {
            report.record_failure(&channel, SyncDirection::Delete, &err);
            held_back.insert(channel);
        }

        let roots: Vec<String> = self
            .registry
            .roots()
            .map(|m| m.name().to_string())
            .collect();
        for name in &roots {
            if held_back.contains(&self.channel_name(name)) {
                tracing::debug!(model = %name, "push held back by failed pull or deletion");
                continue;
            }
            match self.export_and_push(name) {
                Ok(summary) => report.pushed += summary.pushed,
                Err(err) => {
                    let channel = self.channel_name(name);
                    report.record_failure(&channel, SyncDirection::Push, &err);
                }
            }
        }

        report.duration = start.elapsed();
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.channel_failures += report.failures.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            if let Some(failure) = report.failures.last() {
                stats.last_error = Some(failure.error.clone());
            }
        }

        tracing::info!(
            node = %self.config.node_id,
            pulled = report.pulled,
            deleted = report.deleted,
            pushed = report.pushed,
            failures = report.failures.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "sync cycle finished"
        );
        Ok(report)
    }

    fn channel_name(&self, model: &str) -> String {
        self.registry
            .model(model)
            .and_then(|m| m.channel())
            .unwrap_or(model)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{pending_deletion_count, read_cursor};
    use crate::hooks::install_dirty_marker;
    use crate::model::ModelDefinition;
    use crate::transport::{MemoryRemote, MockTransport};
    use serde_json::json;
    use tidesync_protocol::{PullPage, PushReceipt};
    use tidesync_store::Record;

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::from_definitions(vec![
                ModelDefinition::pull_only("Program"),
                ModelDefinition::pull_only("Survey").belongs_to("program_id", "Program"),
                ModelDefinition::root("Encounter").has_many("notes", "Note", "encounter_id"),
                ModelDefinition::nested("Note").belongs_to("encounter_id", "Encounter"),
            ])
            .unwrap(),
        )
    }

    fn manager<T: SyncTransport>(transport: T) -> SyncManager<T> {
        let registry = registry();
        let store = Arc::new(Store::open_in_memory(registry.table_schemas()).unwrap());
        install_dirty_marker(&store, &registry);
        SyncManager::new(
            SyncConfig::new("test").with_push_page_size(2),
            registry,
            store,
            transport,
        )
    }

    fn record(data: serde_json::Value) -> SyncRecord {
        SyncRecord::new(data)
    }

    #[test]
    fn pull_applies_pages_and_advances_cursor() {
        let manager = manager(MockTransport::new());
        let transport = manager.transport();
        transport.queue_pull(
            "Program",
            PullPage::new(
                vec![record(json!({ "id": "p1" })), record(json!({ "id": "p2" }))],
                3,
                50,
            ),
        );
        transport.queue_pull("Program", PullPage::new(vec![record(json!({ "id": "p3" }))], 3, 50));
        transport.queue_pull("Program", PullPage::empty(60));

        let summary = manager.pull_and_import("Program").unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.stats.created, 3);
        assert_eq!(summary.last_synced, Some(50));
        assert_eq!(
            transport.pull_cursors("Program"),
            vec![
                PullCursor::new(0),
                PullCursor { since: 0, offset: 2 },
                PullCursor { since: 0, offset: 3 }
            ]
        );
        assert_eq!(manager.store().count("Program").unwrap(), 3);
        assert_eq!(manager.channel_state("Program"), ChannelState::Idle);

        manager.pull_and_import("Program").unwrap();
        assert_eq!(transport.pull_cursors("Program")[3], PullCursor::new(50));
    }

    #[test]
    fn failed_page_keeps_cursor_at_last_commit() {
        let manager = manager(MockTransport::new());
        let transport = manager.transport();
        transport.queue_pull("Survey", PullPage::new(vec![record(json!({ "id": "s0" }))], 2, 10));
        transport.queue_pull(
            "Survey",
            PullPage::new(vec![record(json!({ "id": "s1", "program_id": "p9" }))], 2, 20),
        );

        let err = manager.pull_and_import("Survey").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(manager.channel_state("Survey"), ChannelState::Idle);

        let cursor = read_cursor(manager.store(), "Survey").unwrap().unwrap();
        assert_eq!(cursor.last_synced, 10);
        assert!(manager.store().get("Survey", "s0").unwrap().is_some());
        assert!(manager.store().get("Survey", "s1").unwrap().is_none());

        manager.store().bulk_create("Program", vec![Record::new("p9")]).unwrap();
        transport.queue_pull(
            "Survey",
            PullPage::new(vec![record(json!({ "id": "s1", "program_id": "p9" }))], 1, 20),
        );
        manager.pull_and_import("Survey").unwrap();
        assert_eq!(transport.pull_cursors("Survey")[2], PullCursor::new(10));
        assert!(manager.store().get("Survey", "s1").unwrap().is_some());
        assert_eq!(read_cursor(manager.store(), "Survey").unwrap().unwrap().last_synced, 20);
    }

    #[test]
    fn record_behind_a_failed_page_arrives_once_its_parent_does() {
        let remote = Arc::new(MemoryRemote::with_page_limit(1));
        remote.seed("Program", vec![record(json!({ "id": "p1" }))]).unwrap();
        remote
            .seed("Survey", vec![record(json!({ "id": "s1", "program_id": "p1" }))])
            .unwrap();
        remote
            .seed("Survey", vec![record(json!({ "id": "s2", "program_id": "p9" }))])
            .unwrap();
        let manager = manager(Arc::clone(&remote));

        let report = manager.run_sync().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel, "Survey");
        assert_eq!(report.failures[0].direction, SyncDirection::Pull);
        assert!(manager.store().get("Survey", "s1").unwrap().is_some());

        remote.seed("Program", vec![record(json!({ "id": "p9" }))]).unwrap();
        let report = manager.run_sync().unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(manager.store().get("Survey", "s2").unwrap().is_some());
    }

    #[test]
    fn transport_failure_leaves_no_cursor() {
        let manager = manager(MockTransport::new());
        manager.transport().fail_pull("Program", "timeout", true);

        assert!(manager.pull_and_import("Program").unwrap_err().is_retryable());
        assert!(read_cursor(manager.store(), "Program").unwrap().is_none());
    }

    #[test]
    fn nested_models_have_no_channel() {
        let manager = manager(MockTransport::new());
        assert!(matches!(
            manager.pull_and_import("Note"),
            Err(SyncError::NotSyncRoot { .. })
        ));
        assert!(matches!(
            manager.export_and_push("Program"),
            Err(SyncError::NotSyncRoot { .. })
        ));
        assert!(matches!(
            manager.pull_and_import("Nope"),
            Err(SyncError::UnknownModel(_))
        ));
    }

    fn dirty_encounters(manager: &SyncManager<impl SyncTransport>, ids: &[&str]) {
        for id in ids {
            manager
                .store()
                .create("Encounter", Record::new(*id), ApplyOptions::with_hooks())
                .unwrap();
        }
    }

    fn flag(manager: &SyncManager<impl SyncTransport>, id: &str) -> Option<bool> {
        manager
            .store()
            .get("Encounter", id)
            .unwrap()
            .unwrap()
            .get_bool(MARKED_FOR_PUSH)
    }

    #[test]
    fn push_sends_dirty_roots_in_pages_and_clears_flags() {
        let manager = manager(MockTransport::new());
        dirty_encounters(&manager, &["e1", "e2", "e3"]);
        manager
            .store()
            .create(
                "Encounter",
                Record::new("e0").with(MARKED_FOR_PUSH, false),
                ApplyOptions::bulk(),
            )
            .unwrap();
        manager.transport().set_clock(77);

        let summary = manager.export_and_push("Encounter").unwrap();
        assert_eq!(summary.pushed, 3);
        assert_eq!(summary.confirmed, 3);
        assert_eq!(summary.batches, 2);

        let pushed = manager.transport().pushed("Encounter");
        assert!(pushed.iter().all(|r| r.data.get(MARKED_FOR_PUSH).is_none()));
        assert_eq!(pushed[0].data, json!({ "id": "e1", "notes": [] }));
        for id in ["e1", "e2", "e3"] {
            assert_eq!(flag(&manager, id), Some(false));
        }

        let cursor = read_cursor(manager.store(), "Encounter").unwrap().unwrap();
        assert_eq!(cursor.last_pushed, 77);
        assert_eq!(cursor.last_synced, 0);

        manager.export_and_push("Encounter").unwrap();
        assert_eq!(manager.transport().pushed("Encounter").len(), 3);
    }

    #[test]
    fn rejected_push_keeps_flags_and_cursor() {
        let manager = manager(MockTransport::new());
        dirty_encounters(&manager, &["e1"]);
        manager.transport().fail_push("Encounter", "503", true);

        let err = manager.export_and_push("Encounter").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(flag(&manager, "e1"), Some(true));
        assert!(read_cursor(manager.store(), "Encounter").unwrap().is_none());
        assert_eq!(manager.channel_state("Encounter"), ChannelState::Idle);

        manager.export_and_push("Encounter").unwrap();
        assert_eq!(flag(&manager, "e1"), Some(false));
    }

    struct EditingTransport {
        inner: MockTransport,
        store: Mutex<Option<Arc<Store>>>,
    }

    impl SyncTransport for EditingTransport {
        fn pull(&self, channel: &str, cursor: PullCursor) -> SyncResult<PullPage> {
            self.inner.pull(channel, cursor)
        }

        fn push(&self, channel: &str, records: &[SyncRecord]) -> SyncResult<PushReceipt> {
            if let Some(store) = self.store.lock().as_ref() {
                store
                    .create(
                        "Note",
                        Record::new("late").with("encounter_id", "e1"),
                        ApplyOptions::with_hooks(),
                    )
                    .map_err(SyncError::from)?;
            }
            self.inner.push(channel, records)
        }
    }

    #[test]
    fn root_changed_during_push_stays_dirty() {
        let registry = registry();
        let store = Arc::new(Store::open_in_memory(registry.table_schemas()).unwrap());
        install_dirty_marker(&store, &registry);
        let transport = EditingTransport {
            inner: MockTransport::new(),
            store: Mutex::new(Some(Arc::clone(&store))),
        };
        let manager = SyncManager::new(SyncConfig::new("test"), registry, store, transport);
        dirty_encounters(&manager, &["e1"]);

        let summary = manager.export_and_push("Encounter").unwrap();
        assert_eq!(summary.confirmed, 0);
        assert_eq!(summary.changed_in_flight, 1);
        assert_eq!(flag(&manager, "e1"), Some(true));
    }

    #[test]
    fn run_sync_defers_tombstones_until_all_channels_pulled() {
        let manager = manager(MockTransport::new());
        let store = manager.store();
        store.bulk_create("Program", vec![Record::new("p1")]).unwrap();
        store
            .bulk_create("Survey", vec![Record::new("s1").with("program_id", "p1")])
            .unwrap();

        let transport = manager.transport();
        transport.queue_pull("Program", PullPage::new(vec![SyncRecord::tombstone("p1")], 1, 20));
        transport.queue_pull("Survey", PullPage::new(vec![SyncRecord::tombstone("s1")], 1, 21));

        let report = manager.run_sync().unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.deleted, 2);
        assert!(store.get("Program", "p1").unwrap().is_none());
        assert!(store.get("Survey", "s1").unwrap().is_none());
        assert_eq!(pending_deletion_count(store).unwrap(), 0);
        assert_eq!(manager.stats().cycles_completed, 1);
    }

    #[test]
    fn failed_deletion_pass_keeps_queue() {
        let manager = manager(MockTransport::new());
        let store = manager.store();
        store.bulk_create("Program", vec![Record::new("p1")]).unwrap();
        store
            .bulk_create("Survey", vec![Record::new("s1").with("program_id", "p1")])
            .unwrap();
        manager
            .transport()
            .queue_pull("Program", PullPage::new(vec![SyncRecord::tombstone("p1")], 1, 20));

        let report = manager.run_sync().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].direction, SyncDirection::Delete);
        assert!(report.failures[0].retryable);
        assert_eq!(pending_deletion_count(store).unwrap(), 1);
        assert_eq!(read_cursor(store, "Program").unwrap().unwrap().last_synced, 20);

        manager
            .transport()
            .queue_pull("Survey", PullPage::new(vec![SyncRecord::tombstone("s1")], 1, 30));
        let report = manager.run_sync().unwrap();
        assert!(report.is_clean());
        assert!(store.get("Program", "p1").unwrap().is_none());
    }

    #[test]
    fn live_version_supersedes_a_queued_tombstone() {
        let manager = manager(MockTransport::new());
        let store = manager.store();
        store.bulk_create("Program", vec![Record::new("p1")]).unwrap();
        store
            .bulk_create("Survey", vec![Record::new("s1").with("program_id", "p1")])
            .unwrap();
        manager
            .transport()
            .queue_pull("Program", PullPage::new(vec![SyncRecord::tombstone("p1")], 1, 20));
        manager.run_sync().unwrap();
        assert_eq!(pending_deletion_count(store).unwrap(), 1);

        manager.transport().queue_pull(
            "Program",
            PullPage::new(vec![record(json!({ "id": "p1", "name": "restored" }))], 1, 30),
        );
        let report = manager.run_sync().unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(pending_deletion_count(store).unwrap(), 0);
        let program = store.get("Program", "p1").unwrap().unwrap();
        assert_eq!(program.get_str("name"), Some("restored"));
    }

    #[test]
    fn failed_deletion_pass_holds_back_the_channel_push() {
        let registry = Arc::new(
            ModelRegistry::from_definitions(vec![
                ModelDefinition::root("Encounter"),
                ModelDefinition::root("Vitals").belongs_to("encounter_id", "Encounter"),
            ])
            .unwrap(),
        );
        let store = Arc::new(Store::open_in_memory(registry.table_schemas()).unwrap());
        install_dirty_marker(&store, &registry);
        let manager =
            SyncManager::new(SyncConfig::new("test"), registry, store, MockTransport::new());

        dirty_encounters(&manager, &["e1"]);
        manager
            .store()
            .bulk_create("Vitals", vec![Record::new("v1").with("encounter_id", "e1")])
            .unwrap();
        manager
            .transport()
            .queue_pull("Encounter", PullPage::new(vec![SyncRecord::tombstone("e1")], 1, 5));

        let report = manager.run_sync().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel, "Encounter");
        assert_eq!(report.failures[0].direction, SyncDirection::Delete);
        assert!(manager.transport().pushed("Encounter").is_empty());
        assert_eq!(flag(&manager, "e1"), Some(true));
        assert_eq!(pending_deletion_count(manager.store()).unwrap(), 1);
    }

    #[test]
    fn channel_failure_does_not_stop_the_cycle() {
        let manager = manager(MockTransport::new());
        dirty_encounters(&manager, &["e1"]);
        manager.transport().fail_pull("Program", "timeout", true);
        manager
            .transport()
            .queue_pull("Survey", PullPage::new(vec![record(json!({ "id": "s1" }))], 1, 5));

        let report = manager.run_sync().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel, "Program");
        assert_eq!(report.pulled, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(manager.stats().channel_failures, 1);
        assert!(manager.stats().last_error.unwrap().contains("timeout"));
    }

    #[test]
    fn encounter_pull_failure_skips_its_push() {
        let manager = manager(MockTransport::new());
        dirty_encounters(&manager, &["e1"]);
        manager.transport().fail_pull("Encounter", "timeout", true);

        let report = manager.run_sync().unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(flag(&manager, "e1"), Some(true));
    }

    #[test]
    fn two_nodes_converge_through_a_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let a = manager(Arc::clone(&remote));
        let b = manager(Arc::clone(&remote));

        a.store()
            .transaction(|txn| {
                txn.create("Encounter", Record::new("e1"), ApplyOptions::with_hooks())?;
                txn.create(
                    "Note",
                    Record::new("n1").with("encounter_id", "e1").with("content", "hi"),
                    ApplyOptions::with_hooks(),
                )
            })
            .unwrap();

        a.run_sync().unwrap();
        b.run_sync().unwrap();

        let note = b.store().get("Note", "n1").unwrap().unwrap();
        assert_eq!(note.get_str("content"), Some("hi"));
        assert_eq!(flag(&b, "e1"), Some(false));
        assert_eq!(flag(&a, "e1"), Some(false));

        let report = b.run_sync().unwrap();
        assert_eq!(report.pushed, 0);
    }
}
