//! Read access shared by committed state and open transactions.

use tidesync_store::{Query, Record, Store, StoreResult, Transaction};

/// Something records can be read from: a [`Store`] (committed state) or a
/// [`Transaction`] (committed state plus its own writes).
pub trait RecordSource {
    /// Fetches a record by primary key.
    fn fetch(&self, table: &str, id: &str) -> StoreResult<Option<Record>>;

    /// Runs a key-ordered query.
    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>>;
}

impl RecordSource for Store {
    fn fetch(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        self.get(table, id)
    }

    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        self.find_all(table, query)
    }
}

impl RecordSource for Transaction<'_> {
    fn fetch(&self, table: &str, id: &str) -> StoreResult<Option<Record>> {
        self.get(table, id)
    }

    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        self.find_all(table, query)
    }
}
