//! Storage-backed cache tables.

use crate::clock::Clock;
use crate::config::TableConfig;
use crate::dirty::DirtySet;
use crate::error::{CoreError, CoreResult, LoadError};
use crate::flush::{flush_tables, StagedWrites, WriteBack};
use crate::lock_pool::LockPool;
use crate::policy::ShrinkPolicy;
use crate::table::Table;
use crate::tvalue::TValue;
use crate::wkey::WKey;
use crate::wrapper::{DirtyObserver, Wrapper};
use dashmap::mapref::entry::Entry;
use hoard_codec::Marshaller;
use hoard_storage::{Storage, TableId};
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A write-back cache table over a [`Storage`] table.
///
/// Misses are filled from storage. Writes go to the cache and mark the key
/// dirty; [`PersistentTable::flush`] pushes dirty keys to storage. Eviction
/// never drops a dirty key.
///
/// # Example
///
/// ```rust
/// use hoard_codec::{StringMarshaller, U64Marshaller};
/// use hoard_core::{DirtySet, LockPool, PersistentTable, TableConfig};
/// use hoard_storage::{MemoryStorage, Storage, TableId};
/// use std::sync::Arc;
///
/// let id = TableId::new(1);
/// let storage = Arc::new(MemoryStorage::with_tables([id]));
/// let names: PersistentTable<u64, String> = PersistentTable::new(
///     TableConfig::new(id),
///     storage.clone(),
///     Arc::new(U64Marshaller),
///     Arc::new(StringMarshaller),
///     Arc::new(DirtySet::new()),
///     Arc::new(LockPool::default()),
/// );
///
/// names.write(7, "seven".to_string());
/// assert_eq!(names.flush().unwrap(), 1);
/// assert!(storage.get(id, &7u64.to_be_bytes()).unwrap().is_some());
/// ```
pub struct PersistentTable<K: Eq + Hash, V> {
    table: Table<K, V>,
    storage: Arc<dyn Storage>,
    keys: Arc<dyn Marshaller<K>>,
    values: Arc<dyn Marshaller<V>>,
    dirty: Arc<DirtySet<K>>,
}

impl<K, V> PersistentTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a persistent table. `config.persistent` is forced on.
    pub fn new(
        config: TableConfig,
        storage: Arc<dyn Storage>,
        keys: Arc<dyn Marshaller<K>>,
        values: Arc<dyn Marshaller<V>>,
        dirty: Arc<DirtySet<K>>,
        locks: Arc<LockPool>,
    ) -> Self {
        Self {
            table: Table::new(config.persistent(true), locks),
            storage,
            keys,
            values,
            dirty,
        }
    }

    /// Replaces the eviction policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl ShrinkPolicy<K, V> + 'static) -> Self {
        self.table = self.table.with_policy(policy);
        self
    }

    /// Replaces the clock used for access times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.table = self.table.with_clock(clock);
        self
    }

    /// Returns the table id.
    pub fn id(&self) -> TableId {
        self.table.id()
    }

    /// Returns the underlying cache table.
    pub fn table(&self) -> &Table<K, V> {
        &self.table
    }

    /// Returns the dirty set shared with this table.
    pub fn dirty(&self) -> &Arc<DirtySet<K>> {
        &self.dirty
    }

    /// Returns the entry for `key`, loading it from storage on a miss.
    ///
    /// A key missing from storage is cached as confirmed absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Load`] if the storage read or unmarshalling
    /// fails; nothing is cached then.
    pub fn get(&self, key: &K) -> CoreResult<Arc<TValue<V>>> {
        self.table
            .get_or_load(key, |key| self.load(key))
            .map_err(|source| CoreError::load(self.id(), source))
    }

    fn load(&self, key: &K) -> Result<Option<V>, LoadError> {
        let key_bytes = self.keys.marshal(key)?;
        match self.storage.get(self.id(), &key_bytes)? {
            Some(bytes) => Ok(Some(self.values.unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Caches `value` under `key` and marks the key dirty.
    pub fn write(&self, key: K, value: V) {
        self.install(key, Some(Arc::new(value)));
    }

    /// Caches a confirmed-absent entry for `key` and marks it dirty; the next
    /// flush deletes it from storage.
    pub fn delete(&self, key: K) {
        self.install(key, None);
    }

    fn install(&self, key: K, value: Option<Arc<V>>) {
        let key = WKey::new(self.id(), key);
        let _guard = self.table.locks().lock_key(&key);
        let now = self.table.now();
        match self.table.cache().entry(key.key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().set(value);
                entry.get().touch(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(TValue::from_arc(value, now)));
            }
        }
        self.dirty.mark(key);
    }

    /// Opens an edit scope on the current value of `key`.
    ///
    /// Returns `None` if the key has no value. The first modification marks
    /// the key dirty; [`PersistentTable::commit`] installs the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has to be loaded and loading fails.
    pub fn edit(&self, key: &K) -> CoreResult<Option<Wrapper<V>>> {
        let Some(origin) = self.get(key)?.value() else {
            return Ok(None);
        };
        let key = WKey::new(self.id(), key.clone());
        let observer = DirtyObserver::new(Arc::clone(&self.dirty), key);
        Ok(Some(Wrapper::new(origin, Arc::new(observer))))
    }

    /// Installs the data of a modified wrapper. Returns false, changing
    /// nothing, if the wrapper was never modified.
    pub fn commit(&self, key: K, wrapper: Wrapper<V>) -> bool {
        if !wrapper.is_modified() {
            return false;
        }
        self.install(key, Some(wrapper.into_data()));
        true
    }

    /// Visits every record in storage, in key byte order, until the visitor
    /// returns `false`.
    ///
    /// Writes still waiting for a flush are not visible. Records that fail
    /// to unmarshal are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage scan fails.
    pub fn walk(&self, visitor: &mut dyn FnMut(&K, &V) -> bool) -> CoreResult<()> {
        let id = self.id();
        self.storage.walk(id, &[], &mut |key_bytes, value_bytes| {
            let decoded = self
                .keys
                .unmarshal(key_bytes)
                .and_then(|key| Ok((key, self.values.unmarshal(value_bytes)?)));
            match decoded {
                Ok((key, value)) => visitor(&key, &value),
                Err(e) => {
                    warn!(table = %id, error = %e, "skipping undecodable record");
                    true
                }
            }
        })?;
        Ok(())
    }

    /// Visits cached entries until the visitor returns `false`.
    pub fn walk_cache(&self, visitor: &mut dyn FnMut(&K, &TValue<V>) -> bool) {
        self.table.walk_cache(visitor);
    }

    /// Evicts every entry the policy approves, skipping dirty keys.
    /// Returns the number evicted.
    pub fn shrink(&self) -> usize {
        self.table.evict(None, Some(&*self.dirty))
    }

    /// Writes this table's dirty entries to storage in one batch.
    ///
    /// Returns the number of keys written.
    ///
    /// # Errors
    ///
    /// Returns an error if marshalling or the batch fails; the keys stay
    /// dirty.
    pub fn flush(&self) -> CoreResult<usize> {
        flush_tables(&*self.storage, &[self as &dyn WriteBack])
    }

    /// Empties the storage table, then drops cached entries and pending
    /// writes of this table.
    ///
    /// Writers must be quiesced; a write racing the truncate may survive it.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage truncate fails; the cache is left
    /// untouched then.
    pub fn truncate(&self) -> CoreResult<()> {
        let _flush = self.dirty.flush_lock().lock();
        self.storage.truncate_table(self.id())?;

        for (key, generation) in self.dirty.snapshot(self.id()) {
            self.dirty.clear_if(&WKey::new(self.id(), key), generation);
        }
        let mut keys = Vec::with_capacity(self.table.len());
        self.table.walk_cache(&mut |key, _| {
            keys.push(key.clone());
            true
        });
        for key in &keys {
            let _guard = self.table.locks().lock_entry(self.id(), key);
            self.table.remove(key);
        }
        info!(table = %self.id(), evicted = keys.len(), "persistent table truncated");
        Ok(())
    }
}

impl<K, V> WriteBack for PersistentTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn table_id(&self) -> TableId {
        self.id()
    }

    fn flush_lock(&self) -> &Mutex<()> {
        self.dirty.flush_lock()
    }

    fn stage(&self) -> CoreResult<Option<StagedWrites>> {
        let id = self.id();
        let marks = self.dirty.snapshot(id);
        if marks.is_empty() {
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(marks.len());
        for (key, _) in &marks {
            let _guard = self.table.locks().lock_entry(id, key);
            let Some(entry) = self.table.peek(key) else {
                warn!(table = %id, "dirty key evicted before flush; dropping its write");
                continue;
            };
            let value = match entry.value() {
                Some(value) => self.values.marshal(&value)?,
                None => Vec::new(),
            };
            entries.push((self.keys.marshal(key)?, value));
        }

        let dirty = Arc::clone(&self.dirty);
        debug!(table = %id, keys = entries.len(), "dirty entries staged");
        Ok(Some(StagedWrites::new(id, entries, move || {
            for (key, generation) in marks {
                dirty.clear_if(&WKey::new(id, key), generation);
            }
        })))
    }
}

impl<K, V> std::fmt::Debug for PersistentTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTable")
            .field("table", &self.table)
            .field("dirty", &self.dirty.len())
            .finish_non_exhaustive()
    }
}
