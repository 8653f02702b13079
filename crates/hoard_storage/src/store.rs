//! The log-structured store.

use crate::backup::{BackupKind, BackupManager, BackupReport, BackupScheduler};
use crate::config::StorageConfig;
use crate::dir::EnvDir;
use crate::dtable::{DTable, TableIndex};
use crate::error::{StorageError, StorageResult};
use crate::recovery;
use crate::segment::SegmentSet;
use crate::storage::{Batch, Storage};
use crate::txn::{Applied, Txn};
use crate::types::TableId;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A transactional, log-structured table store.
///
/// Opening a store takes an exclusive lock on the environment directory,
/// replays the log and starts the backup scheduler if any interval is
/// enabled. Share it across threads with `Arc<LogStore>`; it coerces to
/// `Arc<dyn Storage>`.
///
/// # Example
///
/// ```rust,no_run
/// use hoard_storage::{LogStore, Storage, StorageConfig, TableId};
///
/// let users = TableId::new(1);
/// let config = StorageConfig::new("/var/lib/app").table(users, "users");
/// let store = LogStore::open(config)?;
///
/// store.put(users, b"alice", b"admin")?;
/// assert_eq!(store.get(users, b"alice")?, Some(b"admin".to_vec()));
/// # Ok::<(), hoard_storage::StorageError>(())
/// ```
pub struct LogStore {
    config: StorageConfig,
    dir: EnvDir,
    segments: Arc<SegmentSet>,
    tables: RwLock<BTreeMap<TableId, Arc<DTable>>>,
    /// Recovered indexes of table ids not yet registered.
    orphans: Mutex<HashMap<TableId, TableIndex>>,
    next_txid: AtomicU64,
    backups: Arc<BackupManager>,
    scheduler: Mutex<Option<BackupScheduler>>,
    closed: AtomicBool,
}

impl LogStore {
    /// Opens (or creates) the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EnvironmentLocked`] if another store holds the
    /// directory, or an error if the log cannot be replayed.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let dir = EnvDir::open(&config.env_root)?;
        let segments = Arc::new(SegmentSet::open(
            dir.path(),
            config.max_segment_size,
            config.durability,
        )?);

        let recovered = recovery::replay(&segments, config.read_buffer_size())?;
        let mut orphans = recovered.indexes;

        let mut tables = BTreeMap::new();
        for (&id, name) in &config.tables {
            let index = orphans.remove(&id).unwrap_or_default();
            tables.insert(id, Arc::new(DTable::new(id, name.clone(), index)));
        }
        if !orphans.is_empty() {
            warn!(
                tables = ?orphans.keys().collect::<Vec<_>>(),
                "log holds data for unregistered tables"
            );
        }

        let backups = Arc::new(BackupManager::new(
            Arc::clone(&segments),
            config.resolved_backup_root(),
        ));
        let scheduler = BackupScheduler::start(
            Arc::clone(&backups),
            config
                .incremental_backup_enabled()
                .then_some(config.incremental_backup_interval),
            config
                .full_backup_enabled()
                .then_some(config.full_backup_interval),
        )?;

        info!(
            root = %dir.path().display(),
            tables = tables.len(),
            active_segment = segments.active_id(),
            "store opened"
        );

        Ok(Self {
            config,
            dir,
            segments,
            tables: RwLock::new(tables),
            orphans: Mutex::new(orphans),
            next_txid: AtomicU64::new(recovered.next_txid),
            backups,
            scheduler: Mutex::new(scheduler),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the environment directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Registers a table after open.
    ///
    /// Registering the same id and name again is a no-op. Data already in
    /// the log for this id becomes visible.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidOperation`] if the id is registered
    /// under a different name.
    pub fn add_table(&self, id: TableId, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&id) {
            if existing.name() == name {
                return Ok(());
            }
            return Err(StorageError::invalid_operation(format!(
                "{id} already registered as '{}'",
                existing.name()
            )));
        }

        let index = self.orphans.lock().remove(&id).unwrap_or_default();
        debug!(table = %id, name, keys = index.len(), "table registered");
        tables.insert(id, Arc::new(DTable::new(id, name, index)));
        Ok(())
    }

    /// Returns the handle of a registered table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownTable`] if the id is not registered.
    pub fn table(&self, id: TableId) -> StorageResult<Arc<DTable>> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownTable { table: id })
    }

    /// Returns the ids of every registered table.
    #[must_use]
    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.read().keys().copied().collect()
    }

    /// Copies every sealed segment with id greater than `after` into `dest`,
    /// sealing the active segment first.
    ///
    /// Returns the highest segment id now covered by backups starting from
    /// `after`; this is `after` itself when nothing new was sealed.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be copied.
    pub fn backup(&self, dest: &Path, after: Option<u64>) -> StorageResult<Option<u64>> {
        self.ensure_open()?;
        self.backups.flush()?;
        let (_, last) = self.backups.copy_segments(dest, after)?;
        Ok(last)
    }

    /// Runs one backup immediately, exactly like the scheduler would.
    ///
    /// # Errors
    ///
    /// Returns an error if the run fails.
    pub fn run_backup(&self, kind: BackupKind) -> StorageResult<BackupReport> {
        self.ensure_open()?;
        self.backups.flush()?;
        self.backups.run(kind)
    }

    /// Stops the backup scheduler and syncs the log. Later calls fail with
    /// [`StorageError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        self.segments.sync_active()?;
        info!(root = %self.dir.path().display(), "store closed");
        Ok(())
    }

    /// Returns true once [`LogStore::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn begin(&self) -> StorageResult<Txn> {
        Txn::begin(self.next_txid.fetch_add(1, Ordering::Relaxed))
    }
}

fn apply(index: &mut TableIndex, op: Applied) {
    match op {
        Applied::Put { key, pointer, .. } => {
            index.insert(key, pointer);
        }
        Applied::Delete { key, .. } => {
            index.remove(&key);
        }
        Applied::Truncate { .. } => {
            *index = TableIndex::new();
        }
    }
}

impl Storage for LogStore {
    fn get(&self, table: TableId, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let handle = self.table(table)?;
        // Recursive so a walk visitor on this thread can read through.
        let index = handle.index.read_recursive();
        match index.get(key) {
            Some(pointer) => self.segments.read(*pointer).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, table: TableId, key: &[u8], value: &[u8]) -> StorageResult<()> {
        if value.is_empty() {
            return self.delete(table, key).map(|_| ());
        }

        self.ensure_open()?;
        let handle = self.table(table)?;
        let mut index = handle.index.write();

        let mut txn = self.begin()?;
        txn.put(table, key, value)?;
        for op in txn.commit(&self.segments)? {
            apply(&mut index, op);
        }
        Ok(())
    }

    fn delete(&self, table: TableId, key: &[u8]) -> StorageResult<bool> {
        self.ensure_open()?;
        let handle = self.table(table)?;
        let mut index = handle.index.write();
        if !index.contains_key(key) {
            return Ok(false);
        }

        let mut txn = self.begin()?;
        txn.delete(table, key)?;
        for op in txn.commit(&self.segments)? {
            apply(&mut index, op);
        }
        Ok(true)
    }

    fn batch_put(&self, batch: &Batch) -> StorageResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        let handles = batch
            .keys()
            .map(|&id| self.table(id))
            .collect::<StorageResult<Vec<_>>>()?;

        // Batch keys iterate in ascending id order, so do the locks.
        let mut guards: Vec<(TableId, RwLockWriteGuard<'_, TableIndex>)> = handles
            .iter()
            .map(|handle| (handle.id(), handle.index.write()))
            .collect();

        let mut txn = self.begin()?;
        for (&table, entries) in batch {
            for (key, value) in entries {
                if let Err(e) = txn.put(table, key, value) {
                    txn.abort();
                    return Err(StorageError::transaction_aborted(e.to_string()));
                }
            }
        }

        let applied = txn.commit(&self.segments).map_err(|e| {
            error!(tables = batch.len(), error = %e, "batch commit failed");
            StorageError::transaction_aborted(e.to_string())
        })?;

        for op in applied {
            let table = op.table();
            if let Some((_, index)) = guards.iter_mut().find(|(id, _)| *id == table) {
                apply(index, op);
            }
        }
        Ok(())
    }

    fn walk(
        &self,
        table: TableId,
        start: &[u8],
        visitor: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        let handle = self.table(table)?;
        let index = handle.index.read_recursive();
        for (key, pointer) in index.range(start.to_vec()..) {
            let value = self.segments.read(*pointer)?;
            if !visitor(key, &value) {
                break;
            }
        }
        Ok(())
    }

    fn truncate_table(&self, table: TableId) -> StorageResult<()> {
        self.ensure_open()?;
        let handle = self.table(table)?;
        let mut index = handle.index.write();
        let dropped = index.len();

        let commit = self.begin().and_then(|mut txn| {
            txn.truncate(table)?;
            txn.commit(&self.segments)
        });
        match commit {
            Ok(ops) => {
                for op in ops {
                    apply(&mut index, op);
                }
                info!(table = %table, name = handle.name(), dropped, "table truncated");
                Ok(())
            }
            Err(e) => {
                error!(table = %table, error = %e, "table truncate failed");
                Err(StorageError::truncate_failed(table, e.to_string()))
            }
        }
    }

    fn checkpoint(&self) -> StorageResult<()> {
        self.ensure_open()?;
        self.segments.sync_active()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing store");
        }
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("root", &self.dir.path())
            .field("tables", &self.table_ids())
            .field("segments", &self.segments)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    const USERS: TableId = TableId::new(1);
    const ORDERS: TableId = TableId::new(2);
    const ITEMS: TableId = TableId::new(3);

    fn config(root: &Path) -> StorageConfig {
        StorageConfig::new(root)
            .durability(Durability::NoSync)
            .table(USERS, "users")
            .table(ORDERS, "orders")
            .table(ITEMS, "items")
    }

    fn collect(store: &LogStore, table: TableId) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        store
            .walk(table, b"", &mut |k, v| {
                out.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap();
        out
    }

    #[test]
    fn put_get_delete() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();

        store.put(USERS, b"alice", b"1").unwrap();
        assert_eq!(store.get(USERS, b"alice").unwrap(), Some(b"1".to_vec()));

        store.put(USERS, b"alice", b"2").unwrap();
        assert_eq!(store.get(USERS, b"alice").unwrap(), Some(b"2".to_vec()));

        assert!(store.delete(USERS, b"alice").unwrap());
        assert!(!store.delete(USERS, b"alice").unwrap());
        assert_eq!(store.get(USERS, b"alice").unwrap(), None);
    }

    #[test]
    fn empty_value_deletes() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();

        store.put(USERS, b"k", b"v").unwrap();
        store.put(USERS, b"k", b"").unwrap();
        assert_eq!(store.get(USERS, b"k").unwrap(), None);
    }

    #[test]
    fn unknown_table_rejected() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();
        let err = store.get(TableId::new(99), b"k").unwrap_err();
        assert!(matches!(err, StorageError::UnknownTable { .. }));
    }

    #[test]
    fn batch_spans_tables() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();

        store.put(ORDERS, b"stale", b"x").unwrap();
        let mut batch = Batch::new();
        batch.insert(USERS, vec![(b"u".to_vec(), b"1".to_vec())]);
        batch.insert(
            ORDERS,
            vec![
                (b"o".to_vec(), b"2".to_vec()),
                (b"stale".to_vec(), Vec::new()),
            ],
        );
        store.batch_put(&batch).unwrap();

        assert_eq!(store.get(USERS, b"u").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(ORDERS, b"o").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(ORDERS, b"stale").unwrap(), None);
    }

    #[test]
    fn batch_with_unknown_table_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();

        let mut batch = Batch::new();
        batch.insert(USERS, vec![(b"u".to_vec(), b"1".to_vec())]);
        batch.insert(TableId::new(42), vec![(b"x".to_vec(), b"y".to_vec())]);
        assert!(store.batch_put(&batch).is_err());
        assert_eq!(store.get(USERS, b"u").unwrap(), None);
    }

    #[test]
    fn overlapping_batches_complete() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LogStore::open(config(dir.path())).unwrap());

        let workers: Vec<_> = [(USERS, ITEMS), (ORDERS, ITEMS)]
            .into_iter()
            .map(|(a, b)| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let key = i.to_be_bytes().to_vec();
                        let mut batch = Batch::new();
                        batch.insert(b, vec![(key.clone(), a.as_u32().to_be_bytes().to_vec())]);
                        batch.insert(a, vec![(key.clone(), key)]);
                        store.batch_put(&batch).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.table(USERS).unwrap().len(), 200);
        assert_eq!(store.table(ORDERS).unwrap().len(), 200);
        assert_eq!(store.table(ITEMS).unwrap().len(), 200);
    }

    #[test]
    fn walk_from_start_key_and_stop() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();
        for key in [b"a", b"b", b"c", b"d"] {
            store.put(USERS, key, key).unwrap();
        }

        let mut seen = Vec::new();
        store
            .walk(USERS, b"b", &mut |k, _| {
                seen.push(k.to_vec());
                seen.len() < 2
            })
            .unwrap();
        assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn walk_visitor_can_read_while_a_writer_waits() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LogStore::open(config(dir.path())).unwrap());
        for key in [b"a", b"b", b"c"] {
            store.put(USERS, key, key).unwrap();
        }

        let (done_tx, done_rx) = mpsc::channel();
        let walker = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut writer = None;
                let mut reads = 0;
                store
                    .walk(USERS, b"", &mut |key, value| {
                        if writer.is_none() {
                            let store = Arc::clone(&store);
                            writer = Some(thread::spawn(move || {
                                store.put(USERS, b"z", b"late").unwrap();
                            }));
                            thread::sleep(Duration::from_millis(50));
                        }
                        assert_eq!(store.get(USERS, key).unwrap().as_deref(), Some(value));
                        reads += 1;
                        true
                    })
                    .unwrap();
                if let Some(writer) = writer {
                    writer.join().unwrap();
                }
                done_tx.send(reads).unwrap();
            })
        };

        let reads = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("walk visitor blocked on its own table");
        walker.join().unwrap();
        assert_eq!(reads, 3);
        assert_eq!(store.get(USERS, b"z").unwrap(), Some(b"late".to_vec()));
    }

    #[test]
    fn truncate_clears_only_target_table() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();
        store.put(USERS, b"a", b"1").unwrap();
        store.put(ORDERS, b"a", b"1").unwrap();

        store.truncate_table(USERS).unwrap();
        assert!(collect(&store, USERS).is_empty());
        assert_eq!(collect(&store, ORDERS).len(), 1);

        store.put(USERS, b"b", b"2").unwrap();
        assert_eq!(collect(&store, USERS), vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LogStore::open(config(dir.path())).unwrap();
            store.put(USERS, b"a", b"1").unwrap();
            store.put(USERS, b"b", b"2").unwrap();
            store.delete(USERS, b"a").unwrap();
            store.truncate_table(ORDERS).unwrap();
            store.close().unwrap();
        }

        let store = LogStore::open(config(dir.path())).unwrap();
        assert_eq!(collect(&store, USERS), vec![(b"b".to_vec(), b"2".to_vec())]);
        store.put(USERS, b"c", b"3").unwrap();
        assert_eq!(collect(&store, USERS).len(), 2);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = LogStore::open(config(dir.path())).unwrap();
        let err = LogStore::open(config(dir.path())).unwrap_err();
        assert!(matches!(err, StorageError::EnvironmentLocked));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.get(USERS, b"a").unwrap_err(),
            StorageError::Closed
        ));
        assert!(matches!(store.checkpoint().unwrap_err(), StorageError::Closed));
    }

    #[test]
    fn late_table_sees_logged_data() {
        let dir = tempdir().unwrap();
        let extra = TableId::new(7);
        {
            let store = LogStore::open(config(dir.path()).table(extra, "extra")).unwrap();
            store.put(extra, b"k", b"v").unwrap();
        }

        let store = LogStore::open(config(dir.path())).unwrap();
        assert!(store.get(extra, b"k").is_err());
        store.add_table(extra, "extra").unwrap();
        assert_eq!(store.get(extra, b"k").unwrap(), Some(b"v".to_vec()));
        store.add_table(extra, "extra").unwrap();
        assert!(store.add_table(extra, "other").is_err());
    }

    #[test]
    fn rotation_keeps_values_readable() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path()).max_segment_size(256)).unwrap();
        for i in 0..50u32 {
            store.put(USERS, &i.to_be_bytes(), &[i as u8; 40]).unwrap();
        }
        assert!(store.segments.active_id() > 1);
        for i in 0..50u32 {
            assert_eq!(
                store.get(USERS, &i.to_be_bytes()).unwrap(),
                Some(vec![i as u8; 40])
            );
        }
    }

    #[test]
    fn manual_backup_covers_committed_data() {
        let dir = tempdir().unwrap();
        let store = LogStore::open(config(dir.path())).unwrap();
        store.put(USERS, b"a", b"1").unwrap();

        let report = store.run_backup(BackupKind::Incremental).unwrap();
        assert_eq!(report.segments, vec![1]);
        assert!(report.dir.starts_with(dir.path().join("backup")));

        let dest = dir.path().join("manual");
        assert_eq!(store.backup(&dest, report.last_segment).unwrap(), Some(1));
    }
}
