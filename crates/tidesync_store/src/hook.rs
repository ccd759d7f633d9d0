//! Write hooks and the options that suppress them.

use crate::error::StoreResult;
use crate::record::Record;
use crate::transaction::Transaction;

/// Kind of write that fired a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// A record was inserted.
    Create,
    /// An existing record was modified.
    Update,
}

/// Description of a committed-in-transaction write, handed to hooks.
#[derive(Debug, Clone, Copy)]
pub struct WriteEvent<'a> {
    /// Table written to.
    pub table: &'a str,
    /// Kind of write.
    pub kind: WriteKind,
    /// The record as written.
    pub record: &'a Record,
}

/// Options threaded through every write.
///
/// There is no store-wide switch for hooks: each call says whether its
/// write should be observed. Importers pass [`ApplyOptions::bulk`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Do not run write hooks for this write.
    pub skip_hooks: bool,
}

impl ApplyOptions {
    /// Normal application write: hooks run.
    #[must_use]
    pub const fn with_hooks() -> Self {
        Self { skip_hooks: false }
    }

    /// Bulk/no-hook write.
    #[must_use]
    pub const fn bulk() -> Self {
        Self { skip_hooks: true }
    }
}

/// Observer invoked after each hooked create or update.
///
/// Hooks run inside the writing transaction and may write through it. A
/// hook error aborts the whole transaction. Writes a hook makes with hooks
/// enabled fire hooks again, up to a fixed nesting depth.
pub trait WriteHook: Send + Sync {
    /// Called after the write described by `event` has been staged.
    fn after_write(&self, txn: &mut Transaction<'_>, event: &WriteEvent<'_>) -> StoreResult<()>;
}
