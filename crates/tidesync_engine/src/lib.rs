//! # TideSync Engine
//!
//! Bidirectional sync between a facility's local store and a central
//! authority.
//!
//! This crate provides:
//! - Model registry and dependency graph (creation/deletion order)
//! - Dirty-marking hooks that flag the aggregate root of a local edit
//! - Export plans: dirty roots with their associations nested
//! - Import plans: nested payloads upserted parent-first, tombstones
//!   applied child-first
//! - Per-channel cursors persisted in the store
//! - Sync manager and a tokio scheduler
//! - Transport abstraction with a mock, an in-memory remote and CBOR over
//!   HTTP
//!
//! ## Architecture
//!
//! A cycle is **pull, then delete, then push**:
//! 1. Pull every channel in creation order, one transaction per page
//! 2. Apply deferred tombstones in deletion order
//! 3. Push dirty roots and clear their flags once acknowledged
//!
//! ## Key Invariants
//!
//! - A page and its cursor advance commit together
//! - Imported rows never mark anything for push
//! - A failed push leaves every flag and cursor as it was
//! - Cursors never move backwards
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tidesync_engine::{
//!     install_dirty_marker, MemoryRemote, ModelDefinition, ModelRegistry, SyncConfig,
//!     SyncManager,
//! };
//! use tidesync_store::{ApplyOptions, Record, Store};
//!
//! let registry = Arc::new(ModelRegistry::from_definitions(vec![
//!     ModelDefinition::root("Encounter").has_many("notes", "Note", "encounter_id"),
//!     ModelDefinition::nested("Note").belongs_to("encounter_id", "Encounter"),
//! ])?);
//! let store = Arc::new(Store::open_in_memory(registry.table_schemas())?);
//! install_dirty_marker(&store, &registry);
//!
//! store.create("Encounter", Record::new("e1"), ApplyOptions::with_hooks())?;
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let manager = SyncManager::new(SyncConfig::new("facility-a"), registry, store, remote.clone());
//! let report = manager.run_sync()?;
//! assert_eq!(report.pushed, 1);
//! assert!(remote.record("Encounter", "e1").is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod error;
mod export;
mod graph;
mod hooks;
mod http;
mod import;
mod manager;
mod model;
mod plan;
mod registry;
mod scheduler;
mod source;
mod transport;

pub use config::SyncConfig;
pub use cursor::{
    advance_pull_cursor, advance_push_cursor, dequeue_deletion, list_cursors,
    pending_deletion_count, pending_deletions, queue_deletion, read_cursor, PendingDeletion,
    SyncCursor,
};
pub use error::{SchemaError, SyncError, SyncResult};
pub use export::{
    create_export_plan, execute_export_plan, export_record, is_dirty, strip_local_state,
    ExportPage,
};
pub use graph::DependencyGraph;
pub use hooks::{install_dirty_marker, DirtyMarker, LinkRecordHook};
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use import::{create_import_plan, execute_import_plan, ImportStats};
pub use manager::{
    ChannelFailure, ChannelState, PullSummary, PushSummary, SyncCycleReport, SyncDirection,
    SyncManager, SyncStats,
};
pub use model::{
    Association, AssociationKind, BelongsTo, EdgeOrdering, ModelDefinition, SyncRole,
    SyncableModel, MARKED_FOR_PUSH,
};
pub use plan::{ExportPlan, ImportPlan, PlanNode, SyncPlan};
pub use registry::{ModelRegistry, PENDING_DELETIONS_TABLE, SYNC_METADATA_TABLE};
pub use scheduler::SyncScheduler;
pub use source::RecordSource;
pub use transport::{MemoryRemote, MockTransport, SyncTransport, TransportCall};
