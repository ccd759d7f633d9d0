//! Persisted per-channel sync cursors and the deferred deletion queue.
//!
//! Both live in reserved store tables so they commit atomically with the
//! data they describe.

use crate::error::{SyncError, SyncResult};
use crate::registry::{PENDING_DELETIONS_TABLE, SYNC_METADATA_TABLE};
use crate::source::RecordSource;
use serde::Serialize;
use serde_json::Value;
use tidesync_protocol::SyncRecord;
use tidesync_store::{ApplyOptions, Fields, Query, Record, Transaction};

const CHANNEL: &str = "channel";
const LAST_SYNCED: &str = "last_synced";
const LAST_PUSHED: &str = "last_pushed";
const MODEL: &str = "model";
const RECORD: &str = "record";

/// Progress of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCursor {
    /// Channel name.
    pub channel: String,
    /// Server time of the last applied pull page.
    pub last_synced: u64,
    /// Server time of the last confirmed push.
    pub last_pushed: u64,
}

impl SyncCursor {
    fn from_record(record: &Record) -> Self {
        let number = |field: &str| record.get(field).and_then(Value::as_u64).unwrap_or(0);
        Self {
            channel: record
                .get_str(CHANNEL)
                .unwrap_or(record.id().as_str())
                .to_string(),
            last_synced: number(LAST_SYNCED),
            last_pushed: number(LAST_PUSHED),
        }
    }
}

/// Reads a channel's cursor. `None` until its first pull page is applied.
pub fn read_cursor(source: &impl RecordSource, channel: &str) -> SyncResult<Option<SyncCursor>> {
    Ok(source
        .fetch(SYNC_METADATA_TABLE, channel)?
        .map(|record| SyncCursor::from_record(&record)))
}

/// Lists every cursor, ordered by channel.
pub fn list_cursors(source: &impl RecordSource) -> SyncResult<Vec<SyncCursor>> {
    Ok(source
        .query(SYNC_METADATA_TABLE, &Query::all())?
        .iter()
        .map(SyncCursor::from_record)
        .collect())
}

/// Raises `last_synced` to `requested_at`. Never moves it backwards.
pub fn advance_pull_cursor(
    txn: &mut Transaction<'_>,
    channel: &str,
    requested_at: u64,
) -> SyncResult<SyncCursor> {
    advance(txn, channel, LAST_SYNCED, requested_at)
}

/// Raises `last_pushed` to `requested_at`. Never moves it backwards.
pub fn advance_push_cursor(
    txn: &mut Transaction<'_>,
    channel: &str,
    requested_at: u64,
) -> SyncResult<SyncCursor> {
    advance(txn, channel, LAST_PUSHED, requested_at)
}

fn advance(
    txn: &mut Transaction<'_>,
    channel: &str,
    field: &str,
    requested_at: u64,
) -> SyncResult<SyncCursor> {
    match txn.get(SYNC_METADATA_TABLE, channel)? {
        Some(existing) => {
            let current = existing.get(field).and_then(Value::as_u64).unwrap_or(0);
            if requested_at <= current {
                return Ok(SyncCursor::from_record(&existing));
            }
            let mut patch = Fields::new();
            patch.insert(field.to_string(), Value::from(requested_at));
            let updated = txn.update(SYNC_METADATA_TABLE, channel, patch, ApplyOptions::bulk())?;
            Ok(SyncCursor::from_record(&updated))
        }
        None => {
            let record = Record::new(channel)
                .with(CHANNEL, channel)
                .with(LAST_SYNCED, 0u64)
                .with(LAST_PUSHED, 0u64)
                .with(field, requested_at);
            txn.create(SYNC_METADATA_TABLE, record.clone(), ApplyOptions::bulk())?;
            Ok(SyncCursor::from_record(&record))
        }
    }
}

/// A tombstone waiting for the deletion pass of a sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDeletion {
    /// Channel it arrived on.
    pub channel: String,
    /// Model it deletes.
    pub model: String,
    /// The tombstone as received.
    pub record: SyncRecord,
}

/// Queues a tombstone. Queuing the same record twice keeps one entry.
pub fn queue_deletion(
    txn: &mut Transaction<'_>,
    channel: &str,
    model: &str,
    record: &SyncRecord,
) -> SyncResult<()> {
    let id = record
        .id()
        .ok_or_else(|| SyncError::invalid_record(model, "missing string id"))?;
    let key = format!("{channel}/{id}");
    let payload =
        serde_json::to_value(record).map_err(|e| SyncError::Protocol(e.to_string()))?;

    if txn.exists(PENDING_DELETIONS_TABLE, &key)? {
        return Ok(());
    }
    txn.create(
        PENDING_DELETIONS_TABLE,
        Record::new(key)
            .with(CHANNEL, channel)
            .with(MODEL, model)
            .with(RECORD, payload),
        ApplyOptions::bulk(),
    )?;
    Ok(())
}

/// Drops a queued tombstone, if any. Called when a newer live version of the
/// record is applied, so the deletion pass cannot undo it.
pub fn dequeue_deletion(txn: &mut Transaction<'_>, channel: &str, id: &str) -> SyncResult<bool> {
    Ok(txn.destroy(PENDING_DELETIONS_TABLE, &format!("{channel}/{id}"))?)
}

/// Lists queued tombstones of a channel, with their queue keys.
pub fn pending_deletions(
    source: &impl RecordSource,
    channel: &str,
) -> SyncResult<Vec<(String, PendingDeletion)>> {
    source
        .query(PENDING_DELETIONS_TABLE, &Query::all().where_eq(CHANNEL, channel))?
        .into_iter()
        .map(|row| -> SyncResult<(String, PendingDeletion)> {
            let record: SyncRecord = row
                .get(RECORD)
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| SyncError::Protocol(e.to_string()))?
                .ok_or_else(|| {
                    SyncError::Protocol(format!("queued deletion {} is empty", row.id()))
                })?;
            let pending = PendingDeletion {
                channel: channel.to_string(),
                model: row.get_str(MODEL).unwrap_or_default().to_string(),
                record,
            };
            Ok((row.id().to_string(), pending))
        })
        .collect()
}

/// Total number of queued tombstones.
pub fn pending_deletion_count(source: &impl RecordSource) -> SyncResult<usize> {
    Ok(source.query(PENDING_DELETIONS_TABLE, &Query::all())?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDefinition;
    use crate::registry::ModelRegistry;
    use proptest::prelude::*;
    use tidesync_store::Store;

    fn store() -> Store {
        let registry =
            ModelRegistry::from_definitions(vec![ModelDefinition::pull_only("Program")]).unwrap();
        Store::open_in_memory(registry.table_schemas()).unwrap()
    }

    #[test]
    fn cursor_is_created_on_first_advance() {
        let store = store();
        assert_eq!(read_cursor(&store, "Program").unwrap(), None);

        store
            .transaction(|txn| advance_pull_cursor(txn, "Program", 1234))
            .unwrap();
        let cursor = read_cursor(&store, "Program").unwrap().unwrap();
        assert_eq!(
            cursor,
            SyncCursor {
                channel: "Program".into(),
                last_synced: 1234,
                last_pushed: 0
            }
        );
    }

    #[test]
    fn cursors_never_move_backwards() {
        let store = store();
        store
            .transaction(|txn| {
                advance_pull_cursor(txn, "Program", 50)?;
                advance_pull_cursor(txn, "Program", 40)?;
                advance_push_cursor(txn, "Program", 7)?;
                advance_push_cursor(txn, "Program", 3)
            })
            .unwrap();

        let cursor = read_cursor(&store, "Program").unwrap().unwrap();
        assert_eq!(cursor.last_synced, 50);
        assert_eq!(cursor.last_pushed, 7);
        assert_eq!(list_cursors(&store).unwrap(), vec![cursor]);
    }

    #[test]
    fn deletion_queue_dedupes_per_record() {
        let store = store();
        store
            .transaction(|txn| {
                let tombstone = SyncRecord::tombstone("p1");
                queue_deletion(txn, "Program", "Program", &tombstone)?;
                queue_deletion(txn, "Program", "Program", &tombstone)?;
                queue_deletion(txn, "Program", "Program", &SyncRecord::tombstone("p2"))
            })
            .unwrap();

        let queued = pending_deletions(&store, "Program").unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].0, "Program/p1");
        assert_eq!(queued[0].1.record, SyncRecord::tombstone("p1"));
        assert_eq!(queued[1].1.model, "Program");
        assert_eq!(pending_deletion_count(&store).unwrap(), 2);
        assert!(pending_deletions(&store, "Survey").unwrap().is_empty());
    }

    #[test]
    fn dequeue_drops_only_the_named_record() {
        let store = store();
        let dropped = store
            .transaction(|txn| {
                queue_deletion(txn, "Program", "Program", &SyncRecord::tombstone("p1"))?;
                queue_deletion(txn, "Program", "Program", &SyncRecord::tombstone("p2"))?;
                let first = dequeue_deletion(txn, "Program", "p1")?;
                let again = dequeue_deletion(txn, "Program", "p1")?;
                Ok::<_, SyncError>((first, again))
            })
            .unwrap();

        assert_eq!(dropped, (true, false));
        let queued = pending_deletions(&store, "Program").unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, "Program/p2");
    }

    #[test]
    fn tombstone_without_id_is_invalid() {
        let store = store();
        let err = store
            .transaction(|txn| {
                queue_deletion(
                    txn,
                    "Program",
                    "Program",
                    &SyncRecord::new(serde_json::json!({})).deleted(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord { .. }));
    }

    proptest! {
        #[test]
        fn last_synced_is_the_running_maximum(
            stamps in prop::collection::vec(0u64..10_000, 1..20)
        ) {
            let store = store();
            let mut seen = Vec::new();
            for stamp in &stamps {
                store
                    .transaction(|txn| advance_pull_cursor(txn, "Program", *stamp))
                    .unwrap();
                seen.push(read_cursor(&store, "Program").unwrap().unwrap().last_synced);
            }

            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(*seen.last().unwrap(), *stamps.iter().max().unwrap());
        }
    }
}
