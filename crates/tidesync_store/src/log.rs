//! Commit log framing and replay.
//!
//! Every committed transaction becomes one frame:
//!
//! ```text
//! | magic "TSLG" | payload len (u32 LE) | crc32 (u32 LE) | CBOR payload |
//! ```
//!
//! The payload is a [`CommitEntry`] holding the final state of every record
//! the transaction touched (`None` for deletions).

use crate::error::{StoreError, StoreResult};
use crate::id::RecordId;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes opening every frame.
pub(crate) const LOG_MAGIC: [u8; 4] = *b"TSLG";

const HEADER_LEN: usize = 12;

/// Staged writes of one transaction: table -> key -> new state.
pub(crate) type WriteSet = BTreeMap<String, BTreeMap<RecordId, Option<Record>>>;

/// One committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CommitEntry {
    pub(crate) sequence: u64,
    pub(crate) writes: Vec<LoggedWrite>,
}

/// Final state of one record after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LoggedWrite {
    pub(crate) table: String,
    pub(crate) id: RecordId,
    pub(crate) record: Option<Record>,
}

impl CommitEntry {
    pub(crate) fn from_writes(sequence: u64, writes: &WriteSet) -> Self {
        let writes = writes
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter().map(move |(id, record)| LoggedWrite {
                    table: table.clone(),
                    id: id.clone(),
                    record: record.clone(),
                })
            })
            .collect();
        Self { sequence, writes }
    }

    pub(crate) fn encode_frame(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| StoreError::codec(e.to_string()))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::codec("commit larger than 4 GiB"))?;
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Result of scanning a log.
#[derive(Debug)]
pub(crate) struct Replay {
    pub(crate) entries: Vec<CommitEntry>,
    /// Length of the intact prefix. Anything after it is a torn write.
    pub(crate) valid_len: u64,
}

/// Scans a whole log.
///
/// A frame cut short at the very end (crash during append) ends the scan
/// and is reported through `valid_len`. Damage anywhere else is an error.
pub(crate) fn replay(bytes: &[u8]) -> StoreResult<Replay> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < HEADER_LEN {
            break;
        }
        if remaining[..4] != LOG_MAGIC {
            return Err(StoreError::Storage(
                tidesync_storage::StorageError::corrupted(format!(
                    "bad frame magic at offset {offset}"
                )),
            ));
        }

        let len = u32::from_le_bytes([remaining[4], remaining[5], remaining[6], remaining[7]])
            as usize;
        let expected_crc =
            u32::from_le_bytes([remaining[8], remaining[9], remaining[10], remaining[11]]);
        let end = HEADER_LEN + len;
        if remaining.len() < end {
            break;
        }

        let payload = &remaining[HEADER_LEN..end];
        if crc32(payload) != expected_crc {
            if offset + end == bytes.len() {
                break;
            }
            return Err(StoreError::Storage(
                tidesync_storage::StorageError::corrupted(format!(
                    "checksum mismatch at offset {offset}"
                )),
            ));
        }

        let entry: CommitEntry =
            ciborium::from_reader(payload).map_err(|e| StoreError::codec(e.to_string()))?;
        entries.push(entry);
        offset += end;
    }

    Ok(Replay {
        entries,
        valid_len: offset as u64,
    })
}

/// CRC32 (IEEE polynomial).
fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
