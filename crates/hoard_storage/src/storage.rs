//! The storage contract consumed by persistent cache tables.

use crate::error::StorageResult;
use crate::types::TableId;
use std::collections::BTreeMap;

/// A multi-table write batch.
///
/// The map is ordered by table id, so walking it to take table locks always
/// follows ascending id order. An empty value inside a batch is a delete.
pub type Batch = BTreeMap<TableId, Vec<(Vec<u8>, Vec<u8>)>>;

/// A durable, transactional, byte-keyed table store.
///
/// Keys and values are opaque byte strings. Every table has its own
/// reader/writer lock: `get` takes the read side; `put`, `delete`,
/// `batch_put`, `walk` and `truncate_table` take the write side.
///
/// # Invariants
///
/// - `batch_put` is all-or-nothing across every table it touches
/// - `batch_put` acquires table locks in ascending table id order
/// - A failed `truncate_table` leaves the table contents untouched
/// - Implementors must be `Send + Sync`
pub trait Storage: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the read fails.
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`. An empty value deletes the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the write fails.
    fn put(&self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes `key`, returning whether a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the write fails.
    fn delete(&self, table: TableId, key: &[u8]) -> StorageResult<bool>;

    /// Atomically applies a multi-table batch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TransactionAborted`] if the batch could
    /// not be committed; none of its writes are visible in that case.
    fn batch_put(&self, batch: &Batch) -> StorageResult<()>;

    /// Visits every entry with a key `>= start`, in ascending key order,
    /// until the visitor returns `false`.
    ///
    /// The scan holds the read side of the table lock throughout and reads
    /// without transactional isolation. The visitor may read the same table;
    /// writing to it from the visitor deadlocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or a value cannot be read.
    fn walk(
        &self,
        table: TableId,
        start: &[u8],
        visitor: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()>;

    /// Removes every entry of a table in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateFailed`] if the transaction
    /// aborted; the table keeps its previous contents.
    fn truncate_table(&self, table: TableId) -> StorageResult<()>;

    /// Forces every committed write to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be synced.
    fn checkpoint(&self) -> StorageResult<()>;
}
