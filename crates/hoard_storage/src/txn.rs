//! Transaction frames.
//!
//! A transaction is buffered in memory as one contiguous frame
//! (`Begin`, operations, `Commit`) and written to the log with a single
//! append. Nothing reaches the log before commit, so aborting is just
//! dropping the buffer.

use crate::error::StorageResult;
use crate::record::LogRecord;
use crate::segment::SegmentSet;
use crate::types::{RecordPointer, TableId};
use tracing::debug;

/// A committed operation, resolved against its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Applied {
    Put {
        table: TableId,
        key: Vec<u8>,
        pointer: RecordPointer,
    },
    Delete {
        table: TableId,
        key: Vec<u8>,
    },
    Truncate {
        table: TableId,
    },
}

impl Applied {
    pub(crate) fn table(&self) -> TableId {
        match self {
            Self::Put { table, .. } | Self::Delete { table, .. } | Self::Truncate { table } => {
                *table
            }
        }
    }
}

enum Pending {
    Put {
        table: TableId,
        key: Vec<u8>,
        value_offset: usize,
        len: u32,
    },
    Delete {
        table: TableId,
        key: Vec<u8>,
    },
    Truncate {
        table: TableId,
    },
}

/// An open transaction.
pub(crate) struct Txn {
    txid: u64,
    frame: Vec<u8>,
    pending: Vec<Pending>,
}

impl Txn {
    /// Begins transaction `txid`.
    pub(crate) fn begin(txid: u64) -> StorageResult<Self> {
        let mut frame = Vec::new();
        LogRecord::Begin { txid }.encode_into(&mut frame)?;
        Ok(Self {
            txid,
            frame,
            pending: Vec::new(),
        })
    }

    /// Stages a put. An empty value is staged as a delete.
    pub(crate) fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()> {
        if value.is_empty() {
            return self.delete(table, key);
        }

        let record = LogRecord::Put {
            txid: self.txid,
            table,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        let start = record.encode_into(&mut self.frame)?;
        self.pending.push(Pending::Put {
            table,
            key: key.to_vec(),
            value_offset: start + LogRecord::put_value_offset(key.len()),
            // encode_into already rejected values over 4 GiB
            len: value.len() as u32,
        });
        Ok(())
    }

    /// Stages a delete.
    pub(crate) fn delete(&mut self, table: TableId, key: &[u8]) -> StorageResult<()> {
        LogRecord::Delete {
            txid: self.txid,
            table,
            key: key.to_vec(),
        }
        .encode_into(&mut self.frame)?;
        self.pending.push(Pending::Delete {
            table,
            key: key.to_vec(),
        });
        Ok(())
    }

    /// Stages a truncate of `table`.
    pub(crate) fn truncate(&mut self, table: TableId) -> StorageResult<()> {
        LogRecord::Truncate {
            txid: self.txid,
            table,
        }
        .encode_into(&mut self.frame)?;
        self.pending.push(Pending::Truncate { table });
        Ok(())
    }

    /// Writes the frame to the log.
    ///
    /// On success the returned operations are durable (per the configured
    /// durability) and must be applied to the in-memory indexes. On failure
    /// nothing was committed.
    pub(crate) fn commit(mut self, segments: &SegmentSet) -> StorageResult<Vec<Applied>> {
        LogRecord::Commit { txid: self.txid }.encode_into(&mut self.frame)?;
        let (segment, base) = segments.append(&self.frame)?;
        debug!(
            txid = self.txid,
            segment,
            ops = self.pending.len(),
            bytes = self.frame.len(),
            "transaction committed"
        );

        Ok(self
            .pending
            .into_iter()
            .map(|op| match op {
                Pending::Put {
                    table,
                    key,
                    value_offset,
                    len,
                } => Applied::Put {
                    table,
                    key,
                    pointer: RecordPointer {
                        segment,
                        offset: base + value_offset as u64,
                        len,
                    },
                },
                Pending::Delete { table, key } => Applied::Delete { table, key },
                Pending::Truncate { table } => Applied::Truncate { table },
            })
            .collect())
    }

    /// Discards the transaction.
    pub(crate) fn abort(self) {
        debug!(txid = self.txid, ops = self.pending.len(), "transaction aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use tempfile::tempdir;

    #[test]
    fn committed_pointers_resolve_to_values() {
        let dir = tempdir().unwrap();
        let segments = SegmentSet::open(dir.path(), 1 << 20, Durability::NoSync).unwrap();
        // Shift the frame away from offset zero.
        segments.append(b"padding").unwrap();

        let mut txn = Txn::begin(1).unwrap();
        txn.put(TableId::new(1), b"a", b"first").unwrap();
        txn.put(TableId::new(2), b"bb", b"second").unwrap();
        let applied = txn.commit(&segments).unwrap();

        let values: Vec<Vec<u8>> = applied
            .iter()
            .map(|op| match op {
                Applied::Put { pointer, .. } => segments.read(*pointer).unwrap(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn empty_value_is_staged_as_delete() {
        let dir = tempdir().unwrap();
        let segments = SegmentSet::open(dir.path(), 1 << 20, Durability::NoSync).unwrap();

        let mut txn = Txn::begin(3).unwrap();
        txn.put(TableId::new(1), b"k", b"").unwrap();
        let applied = txn.commit(&segments).unwrap();
        assert_eq!(
            applied,
            vec![Applied::Delete {
                table: TableId::new(1),
                key: b"k".to_vec()
            }]
        );
    }

    #[test]
    fn abort_writes_nothing() {
        let dir = tempdir().unwrap();
        let segments = SegmentSet::open(dir.path(), 1 << 20, Durability::NoSync).unwrap();

        let mut txn = Txn::begin(4).unwrap();
        txn.put(TableId::new(1), b"k", b"v").unwrap();
        txn.abort();

        assert!(segments.all().iter().all(|s| s.size() == 0));
    }
}
