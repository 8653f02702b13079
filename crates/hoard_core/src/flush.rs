//! Write-back flushing.
//!
//! Dirty entries of one or more persistent tables are marshalled and
//! written in a single storage batch, so a flush is atomic across every
//! table it covers. Dirty marks are cleared only after the batch commits,
//! and only for keys that were not written again in the meantime.
//!
//! Flushes sharing a dirty set never overlap: each holds the set's flush
//! lock from staging until its marks are cleared.

use crate::error::CoreResult;
use hoard_storage::{Batch, Storage, TableId};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

/// Writes staged by one table for a flush.
pub struct StagedWrites {
    table: TableId,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    on_commit: Box<dyn FnOnce() + Send>,
}

impl StagedWrites {
    /// Creates a staged set. `on_commit` runs once the batch is durable.
    pub fn new(
        table: TableId,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        on_commit: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            table,
            entries,
            on_commit: Box::new(on_commit),
        }
    }

    /// Number of key writes staged. Empty values are deletes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for StagedWrites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedWrites")
            .field("table", &self.table)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// A table whose dirty entries can be flushed to storage.
pub trait WriteBack: Send + Sync {
    /// The storage table the writes go to.
    fn table_id(&self) -> TableId;

    /// Lock serializing flushes of the table's dirty set.
    fn flush_lock(&self) -> &Mutex<()>;

    /// Marshals the table's dirty entries. Returns `None` if nothing is dirty.
    ///
    /// Called by [`flush_tables`] with [`WriteBack::flush_lock`] held.
    ///
    /// # Errors
    ///
    /// Returns an error if a key or value cannot be marshalled; nothing is
    /// cleared in that case.
    fn stage(&self) -> CoreResult<Option<StagedWrites>>;
}

/// Flushes the dirty entries of `tables` to `storage` in one batch.
///
/// Returns the number of keys written.
///
/// # Errors
///
/// Returns an error if staging or the batch fails. Every key stays dirty
/// and will be retried by the next flush.
pub fn flush_tables(storage: &dyn Storage, tables: &[&dyn WriteBack]) -> CoreResult<usize> {
    let _guards = lock_all(tables);

    let mut staged = Vec::with_capacity(tables.len());
    for table in tables {
        if let Some(writes) = table.stage()? {
            staged.push(writes);
        }
    }
    if staged.is_empty() {
        return Ok(0);
    }

    let mut batch = Batch::new();
    let mut commits = Vec::with_capacity(staged.len());
    let mut written = 0;
    for writes in staged {
        written += writes.entries.len();
        batch
            .entry(writes.table)
            .or_default()
            .extend(writes.entries);
        commits.push(writes.on_commit);
    }

    storage.batch_put(&batch)?;
    for on_commit in commits {
        on_commit();
    }

    debug!(tables = batch.len(), keys = written, "write-back flush committed");
    Ok(written)
}

/// Takes the distinct flush locks of `tables` in address order.
fn lock_all<'a>(tables: &[&'a dyn WriteBack]) -> Vec<MutexGuard<'a, ()>> {
    let mut locks: Vec<&'a Mutex<()>> = tables.iter().map(|table| table.flush_lock()).collect();
    locks.sort_by_key(|lock| *lock as *const Mutex<()> as usize);
    locks.dedup_by(|a, b| std::ptr::eq(*a, *b));
    locks.into_iter().map(Mutex::lock).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::dirty::DirtySet;
    use crate::lock_pool::LockPool;
    use crate::persistent::PersistentTable;
    use hoard_codec::{StringMarshaller, U64Marshaller};
    use hoard_storage::MemoryStorage;
    use std::sync::Arc;

    const PLAYERS: TableId = TableId::new(1);
    const GUILDS: TableId = TableId::new(2);

    fn table(
        id: TableId,
        storage: &Arc<MemoryStorage>,
        dirty: &Arc<DirtySet<u64>>,
    ) -> PersistentTable<u64, String> {
        PersistentTable::new(
            TableConfig::new(id),
            storage.clone(),
            Arc::new(U64Marshaller),
            Arc::new(StringMarshaller),
            Arc::clone(dirty),
            Arc::new(LockPool::new(8)),
        )
    }

    #[test]
    fn tables_sharing_a_dirty_set_flush_together() {
        let storage = Arc::new(MemoryStorage::with_tables([PLAYERS, GUILDS]));
        let dirty = Arc::new(DirtySet::new());
        let players = table(PLAYERS, &storage, &dirty);
        let guilds = table(GUILDS, &storage, &dirty);
        players.write(1, "p".into());
        guilds.write(1, "g".into());

        let tables: [&dyn WriteBack; 2] = [&players, &guilds];
        let written = flush_tables(&*storage, &tables).unwrap();
        assert_eq!(written, 2);
        assert!(dirty.is_empty());
        assert_eq!(storage.committed_batches(), 1);
    }

    #[test]
    fn nothing_dirty_writes_no_batch() {
        let storage = Arc::new(MemoryStorage::with_tables([PLAYERS]));
        let players = table(PLAYERS, &storage, &Arc::new(DirtySet::new()));
        assert_eq!(flush_tables(&*storage, &[&players as &dyn WriteBack]).unwrap(), 0);
        assert_eq!(storage.committed_batches(), 0);
    }
}
