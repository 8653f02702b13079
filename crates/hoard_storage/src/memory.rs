//! In-memory storage for testing.

use crate::error::{StorageError, StorageResult};
use crate::storage::{Batch, Storage};
use crate::types::TableId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type MemTable = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// A [`Storage`] that keeps everything in memory.
///
/// It follows the same locking rules as the on-disk store and can be told
/// to fail batches, which is how cache-layer tests exercise write failures.
///
/// # Example
///
/// ```rust
/// use hoard_storage::{MemoryStorage, Storage, TableId};
///
/// let table = TableId::new(1);
/// let storage = MemoryStorage::with_tables([table]);
/// storage.put(table, b"k", b"v").unwrap();
/// assert_eq!(storage.get(table, b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<BTreeMap<TableId, MemTable>>,
    fail_writes: AtomicBool,
    batches: AtomicU64,
}

impl MemoryStorage {
    /// Creates an empty storage with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage with the given tables registered.
    #[must_use]
    pub fn with_tables(ids: impl IntoIterator<Item = TableId>) -> Self {
        let storage = Self::new();
        for id in ids {
            storage.add_table(id);
        }
        storage
    }

    /// Registers a table. Registering twice is a no-op.
    pub fn add_table(&self, id: TableId) {
        self.tables.write().entry(id).or_default();
    }

    /// Makes every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Returns how many batches have been committed.
    #[must_use]
    pub fn committed_batches(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }

    /// Returns the number of keys in a table.
    #[must_use]
    pub fn len(&self, table: TableId) -> usize {
        self.table(table).map_or(0, |t| t.read().len())
    }

    fn table(&self, id: TableId) -> StorageResult<MemTable> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownTable { table: id })
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            Err(StorageError::transaction_aborted("writes disabled"))
        } else {
            Ok(())
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.table(table)?.read_recursive().get(key).cloned())
    }

    fn put(&self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let handle = self.table(table)?;
        let mut data = handle.write();
        self.check_writable()?;
        if value.is_empty() {
            data.remove(key);
        } else {
            data.insert(key.to_vec(), value.to_vec());
        }
        Ok(())
    }

    fn delete(&self, table: TableId, key: &[u8]) -> StorageResult<bool> {
        let handle = self.table(table)?;
        let mut data = handle.write();
        self.check_writable()?;
        Ok(data.remove(key).is_some())
    }

    fn batch_put(&self, batch: &Batch) -> StorageResult<()> {
        let handles = batch
            .keys()
            .map(|&id| self.table(id))
            .collect::<StorageResult<Vec<_>>>()?;
        let mut guards: Vec<_> = handles.iter().map(|h| h.write()).collect();
        self.check_writable()?;

        for (data, entries) in guards.iter_mut().zip(batch.values()) {
            for (key, value) in entries {
                if value.is_empty() {
                    data.remove(key);
                } else {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        self.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn walk(
        &self,
        table: TableId,
        start: &[u8],
        visitor: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        let handle = self.table(table)?;
        let data = handle.read_recursive();
        for (key, value) in data.range(start.to_vec()..) {
            if !visitor(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn truncate_table(&self, table: TableId) -> StorageResult<()> {
        let handle = self.table(table)?;
        let mut data = handle.write();
        self.check_writable()
            .map_err(|e| StorageError::truncate_failed(table, e.to_string()))?;
        data.clear();
        Ok(())
    }

    fn checkpoint(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: TableId = TableId::new(1);
    const B: TableId = TableId::new(2);

    #[test]
    fn failed_batch_changes_nothing() {
        let storage = MemoryStorage::with_tables([A, B]);
        storage.put(A, b"k", b"old").unwrap();

        storage.set_fail_writes(true);
        let mut batch = Batch::new();
        batch.insert(A, vec![(b"k".to_vec(), b"new".to_vec())]);
        batch.insert(B, vec![(b"x".to_vec(), b"y".to_vec())]);
        assert!(storage.batch_put(&batch).is_err());

        assert_eq!(storage.get(A, b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(storage.len(B), 0);
        assert_eq!(storage.committed_batches(), 0);

        storage.set_fail_writes(false);
        storage.batch_put(&batch).unwrap();
        assert_eq!(storage.get(A, b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(storage.committed_batches(), 1);
    }

    #[test]
    fn failed_truncate_keeps_contents() {
        let storage = MemoryStorage::with_tables([A]);
        storage.put(A, b"k", b"v").unwrap();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.truncate_table(A).unwrap_err(),
            StorageError::TruncateFailed { .. }
        ));
        assert_eq!(storage.len(A), 1);
    }

    #[test]
    fn unknown_table() {
        let storage = MemoryStorage::new();
        assert!(storage.get(A, b"k").is_err());
    }
}
