//! # TideSync Store
//!
//! The local relational record store a TideSync node syncs from and into.
//!
//! This crate provides:
//! - Records with opaque string primary keys and JSON field values
//! - Table schemas with foreign keys, checked **immediately** on every write
//!   (inserts need their parents, deletes are restricted while children exist)
//! - Closure-based transactions with read-your-writes and all-or-nothing commit
//! - Write hooks, suppressed per write through [`ApplyOptions`]
//! - Keyset-paginated queries ordered by primary key, served from a
//!   foreign-key index when they pin a reference
//! - A CRC-checked commit log replayed on open
//!
//! ## Example
//!
//! ```rust
//! use tidesync_store::{ApplyOptions, Query, Record, Store, TableSchema};
//!
//! let store = Store::open_in_memory(vec![
//!     TableSchema::new("Program"),
//!     TableSchema::new("Survey").foreign_key("program_id", "Program"),
//! ])
//! .unwrap();
//!
//! store
//!     .transaction(|txn| {
//!         txn.create("Program", Record::new("p1"), ApplyOptions::bulk())?;
//!         txn.create(
//!             "Survey",
//!             Record::new("s1").with("program_id", "p1"),
//!             ApplyOptions::bulk(),
//!         )
//!     })
//!     .unwrap();
//!
//! let surveys = store
//!     .find_all("Survey", &Query::all().where_eq("program_id", "p1"))
//!     .unwrap();
//! assert_eq!(surveys.len(), 1);
//! assert!(store.destroy("Program", "p1").is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod hook;
mod id;
mod index;
mod log;
mod query;
mod record;
mod schema;
mod store;
mod transaction;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use hook::{ApplyOptions, WriteEvent, WriteHook, WriteKind};
pub use id::RecordId;
pub use query::Query;
pub use record::{Fields, Record, ID_FIELD};
pub use schema::{ForeignKey, TableSchema};
pub use store::Store;
pub use transaction::{Transaction, MAX_HOOK_DEPTH};
