//! # TideSync Storage
//!
//! Append-only byte stores backing the TideSync record store.
//!
//! Backends are **opaque**: they never interpret what they hold. The record
//! store frames its commit log on top of them and replays it on open.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral nodes. Clones share the
//!   same buffer, so a test can "reopen" a store without touching disk.
//! - [`FileBackend`] - Persistent log file guarded by an exclusive lock.
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"commit").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
