//! Log replay.
//!
//! Segments are scanned in id order. Operations are buffered per
//! transaction and applied only once the matching `Commit` record is seen,
//! so a frame cut short by a crash never becomes visible.

use crate::dtable::TableIndex;
use crate::error::{StorageError, StorageResult};
use crate::record::{decode_at, Decoded, LogRecord};
use crate::segment::SegmentSet;
use crate::txn::Applied;
use crate::types::{RecordPointer, TableId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// State rebuilt from the log.
#[derive(Debug, Default)]
pub(crate) struct Recovered {
    pub(crate) indexes: HashMap<TableId, TableIndex>,
    pub(crate) next_txid: u64,
    pub(crate) committed: u64,
    pub(crate) discarded: u64,
}

impl Recovered {
    fn apply(&mut self, op: Applied) {
        match op {
            Applied::Put {
                table,
                key,
                pointer,
            } => {
                self.indexes.entry(table).or_default().insert(key, pointer);
            }
            Applied::Delete { table, key } => {
                if let Some(index) = self.indexes.get_mut(&table) {
                    index.remove(&key);
                }
            }
            Applied::Truncate { table } => {
                self.indexes.insert(table, TableIndex::new());
            }
        }
    }
}

/// Replays every segment and rebuilds the table indexes.
///
/// A torn record at the tail of the active segment is cut off. A torn
/// record anywhere else, or any checksum or format error, is fatal.
pub(crate) fn replay(segments: &SegmentSet, buffer_size: usize) -> StorageResult<Recovered> {
    let mut state = Recovered {
        next_txid: 1,
        ..Recovered::default()
    };
    let active_id = segments.active_id();

    for segment in segments.all() {
        let id = segment.id();
        let data = segment.read_all(buffer_size)?;
        let mut pending: HashMap<u64, Vec<Applied>> = HashMap::new();
        let mut pos = 0usize;

        while pos < data.len() {
            let (record, len) = match decode_at(&data, pos, id)? {
                Decoded::Record(record, len) => (record, len),
                Decoded::Truncated => {
                    if id != active_id {
                        return Err(StorageError::corrupted(format!(
                            "sealed segment {id} ends mid-record at offset {pos}"
                        )));
                    }
                    warn!(
                        segment = id,
                        offset = pos,
                        dropped = data.len() - pos,
                        "truncating torn log tail"
                    );
                    segment.truncate(pos as u64)?;
                    break;
                }
            };

            state.next_txid = state.next_txid.max(record.txid() + 1);
            match record {
                LogRecord::Begin { txid } => {
                    pending.insert(txid, Vec::new());
                }
                LogRecord::Put {
                    txid,
                    table,
                    key,
                    value,
                } => {
                    let pointer = RecordPointer {
                        segment: id,
                        offset: (pos + LogRecord::put_value_offset(key.len())) as u64,
                        len: value.len() as u32,
                    };
                    let op = Applied::Put {
                        table,
                        key,
                        pointer,
                    };
                    stage(&mut pending, txid, id, op)?;
                }
                LogRecord::Delete { txid, table, key } => {
                    stage(&mut pending, txid, id, Applied::Delete { table, key })?;
                }
                LogRecord::Truncate { txid, table } => {
                    stage(&mut pending, txid, id, Applied::Truncate { table })?;
                }
                LogRecord::Commit { txid } => {
                    let ops = pending.remove(&txid).ok_or_else(|| {
                        StorageError::corrupted(format!(
                            "commit without begin for txid {txid} in segment {id}"
                        ))
                    })?;
                    for op in ops {
                        state.apply(op);
                    }
                    state.committed += 1;
                }
            }

            pos += len;
        }

        if !pending.is_empty() {
            debug!(
                segment = id,
                transactions = pending.len(),
                "discarding uncommitted transactions"
            );
            state.discarded += pending.len() as u64;
        }
    }

    info!(
        committed = state.committed,
        discarded = state.discarded,
        tables = state.indexes.len(),
        "log replay complete"
    );
    Ok(state)
}

fn stage(
    pending: &mut HashMap<u64, Vec<Applied>>,
    txid: u64,
    segment: u64,
    op: Applied,
) -> StorageResult<()> {
    pending
        .get_mut(&txid)
        .ok_or_else(|| {
            StorageError::corrupted(format!(
                "record for txid {txid} outside its frame in segment {segment}"
            ))
        })?
        .push(op);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use crate::txn::Txn;
    use tempfile::tempdir;

    const T1: TableId = TableId::new(1);

    fn open(dir: &std::path::Path) -> SegmentSet {
        SegmentSet::open(dir, 1 << 20, Durability::NoSync).unwrap()
    }

    #[test]
    fn committed_transactions_are_replayed() {
        let dir = tempdir().unwrap();
        {
            let segments = open(dir.path());
            let mut txn = Txn::begin(1).unwrap();
            txn.put(T1, b"a", b"1").unwrap();
            txn.put(T1, b"b", b"2").unwrap();
            txn.commit(&segments).unwrap();

            let mut txn = Txn::begin(2).unwrap();
            txn.delete(T1, b"a").unwrap();
            txn.commit(&segments).unwrap();
        }

        let segments = open(dir.path());
        let state = replay(&segments, 4096).unwrap();
        let index = &state.indexes[&T1];
        assert_eq!(index.len(), 1);
        assert_eq!(segments.read(index[b"b".as_slice()]).unwrap(), b"2");
        assert_eq!(state.next_txid, 3);
        assert_eq!(state.committed, 2);
    }

    #[test]
    fn frame_without_commit_is_ignored() {
        let dir = tempdir().unwrap();
        {
            let segments = open(dir.path());
            let mut frame = Vec::new();
            LogRecord::Begin { txid: 7 }.encode_into(&mut frame).unwrap();
            LogRecord::Put {
                txid: 7,
                table: T1,
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            }
            .encode_into(&mut frame)
            .unwrap();
            segments.append(&frame).unwrap();
        }

        let segments = open(dir.path());
        let state = replay(&segments, 4096).unwrap();
        assert!(state.indexes.get(&T1).map_or(true, |i| i.is_empty()));
        assert_eq!(state.discarded, 1);
        assert_eq!(state.next_txid, 8);
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let dir = tempdir().unwrap();
        let good_len;
        {
            let segments = open(dir.path());
            let mut txn = Txn::begin(1).unwrap();
            txn.put(T1, b"a", b"1").unwrap();
            txn.commit(&segments).unwrap();
            good_len = segments.all()[0].size();

            let mut frame = Vec::new();
            LogRecord::Begin { txid: 2 }.encode_into(&mut frame).unwrap();
            segments.append(&frame[..frame.len() - 3]).unwrap();
        }

        let segments = open(dir.path());
        let state = replay(&segments, 4096).unwrap();
        assert_eq!(state.indexes[&T1].len(), 1);
        assert_eq!(segments.all()[0].size(), good_len);
    }

    #[test]
    fn truncate_record_clears_table() {
        let dir = tempdir().unwrap();
        {
            let segments = open(dir.path());
            let mut txn = Txn::begin(1).unwrap();
            txn.put(T1, b"a", b"1").unwrap();
            txn.commit(&segments).unwrap();
            let mut txn = Txn::begin(2).unwrap();
            txn.truncate(T1).unwrap();
            txn.commit(&segments).unwrap();
            let mut txn = Txn::begin(3).unwrap();
            txn.put(T1, b"b", b"2").unwrap();
            txn.commit(&segments).unwrap();
        }

        let segments = open(dir.path());
        let state = replay(&segments, 4096).unwrap();
        let keys: Vec<_> = state.indexes[&T1].keys().cloned().collect();
        assert_eq!(keys, vec![b"b".to_vec()]);
    }

    #[test]
    fn corrupted_record_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let segments = open(dir.path());
            let mut txn = Txn::begin(1).unwrap();
            txn.put(T1, b"a", b"value").unwrap();
            txn.commit(&segments).unwrap();
        }

        let path = dir.path().join(crate::segment::segment_file_name(1));
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 8;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let segments = open(dir.path());
        assert!(replay(&segments, 4096).is_err());
    }
}
