//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// The record store writes one framed commit per `append` and reads the
/// whole log back once, on open. Backends must be `Send + Sync` so a store
/// can be shared between the sync manager and application threads.
pub trait StorageBackend: Send + Sync {
    /// Reads every byte currently stored.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends bytes at the end and returns the offset they start at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Forces appended bytes to durable storage.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the number of bytes stored.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size` bytes.
    ///
    /// Used to cut off a torn trailing commit found during replay.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
