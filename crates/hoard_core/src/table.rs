//! Memory cache tables.

use crate::clock::{Clock, SystemClock};
use crate::config::TableConfig;
use crate::dirty::DirtyTracker;
use crate::lock_pool::LockPool;
use crate::policy::ShrinkPolicy;
use crate::tvalue::TValue;
use crate::wkey::WKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hoard_storage::TableId;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A concurrent cache of `K -> TValue<V>` with policy-driven eviction.
///
/// The table owns its map; entries are handed out as `Arc<TValue<V>>` and
/// may outlive their eviction. Walk visitors run on a snapshot, so they may
/// call back into the table.
pub struct Table<K, V> {
    config: TableConfig,
    cache: DashMap<K, Arc<TValue<V>>>,
    policy: Arc<dyn ShrinkPolicy<K, V>>,
    locks: Arc<LockPool>,
    clock: Arc<dyn Clock>,
    removals: AtomicU64,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a table using the policy implied by `config`.
    pub fn new(config: TableConfig, locks: Arc<LockPool>) -> Self {
        let policy = config.default_policy();
        Self {
            config,
            cache: DashMap::new(),
            policy,
            locks,
            clock: Arc::new(SystemClock::new()),
            removals: AtomicU64::new(0),
        }
    }

    /// Replaces the eviction policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl ShrinkPolicy<K, V> + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replaces the clock used for access times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the table id.
    pub fn id(&self) -> TableId {
        self.config.id
    }

    /// Returns the table configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Returns true for storage-backed tables.
    pub fn is_persistent(&self) -> bool {
        self.config.persistent
    }

    /// Returns the soft cap on cached entries.
    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns true if the cache holds more than `max_size` entries.
    pub fn over_max_size(&self) -> bool {
        self.len() > self.max_size()
    }

    /// Returns the shared stripe lock pool.
    pub fn locks(&self) -> &Arc<LockPool> {
        &self.locks
    }

    /// Current reading of the table clock.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Returns the entry for `key`, caching a confirmed-absent sentinel on
    /// a miss.
    pub fn get(&self, key: &K) -> Arc<TValue<V>> {
        let now = self.now();
        if let Some(entry) = self.cache.get(key) {
            entry.touch(now);
            return Arc::clone(entry.value());
        }
        let entry = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TValue::absent(now)));
        entry.touch(now);
        Arc::clone(entry.value())
    }

    /// Returns the entry for `key`, running `loader` on a miss.
    ///
    /// The loader first runs without any lock held. The result is installed
    /// under the key's stripe lock, and when several callers miss on the same
    /// key at once, the first installed entry wins and every caller gets it.
    /// If any entry of the table was removed while the loader ran, the read
    /// may predate a write that was flushed and evicted in the meantime, so
    /// the loader runs once more with the stripe lock held. The loader must
    /// therefore not take stripe locks of this table. A failed load caches
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub fn get_or_load<E>(
        &self,
        key: &K,
        mut loader: impl FnMut(&K) -> Result<Option<V>, E>,
    ) -> Result<Arc<TValue<V>>, E> {
        if let Some(entry) = self.cache.get(key) {
            entry.touch(self.now());
            return Ok(Arc::clone(entry.value()));
        }

        let epoch = self.removals.load(Ordering::Acquire);
        let mut loaded = loader(key)?;

        let _guard = self.locks.lock_entry(self.id(), key);
        if self.removals.load(Ordering::Acquire) != epoch && !self.cache.contains_key(key) {
            debug!(table = %self.id(), "entry removed during load; reloading");
            loaded = loader(key)?;
        }
        let now = self.now();
        let entry = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TValue::new(loaded, now)));
        entry.touch(now);
        Ok(Arc::clone(entry.value()))
    }

    /// Returns the cached entry without loading or refreshing its access time.
    pub fn peek(&self, key: &K) -> Option<Arc<TValue<V>>> {
        self.cache.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Caches `value`, returning the entry it replaced.
    pub fn put(&self, key: K, value: V) -> Option<Arc<TValue<V>>> {
        let entry = Arc::new(TValue::new(Some(value), self.now()));
        self.cache.insert(key, entry)
    }

    /// Caches `value` only if `key` has no entry.
    ///
    /// Returns the existing entry when there was one, `None` if `value` was
    /// inserted.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<TValue<V>>> {
        let now = self.now();
        match self.cache.entry(key) {
            Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(TValue::new(Some(value), now)));
                None
            }
        }
    }

    /// Removes `key` from the cache and marks its entry as evicted.
    ///
    /// Callers must hold the key's stripe lock if anyone else may be using
    /// the entry.
    pub fn remove(&self, key: &K) -> Option<Arc<TValue<V>>> {
        let (_, entry) = self.cache.remove(key)?;
        self.removals.fetch_add(1, Ordering::AcqRel);
        entry.mark_shrunk();
        debug!(table = %self.id(), "cache entry removed");
        Some(entry)
    }

    /// Returns true if `key` has an entry (absent sentinels included).
    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Visits cached entries until the visitor returns `false`.
    pub fn walk_cache(&self, visitor: &mut dyn FnMut(&K, &TValue<V>) -> bool) {
        for (key, entry) in self.snapshot() {
            if !visitor(&key, &entry) {
                break;
            }
        }
    }

    /// Same as [`Table::walk_cache`]; a memory table has nothing else to visit.
    pub fn walk(&self, visitor: &mut dyn FnMut(&K, &TValue<V>) -> bool) {
        self.walk_cache(visitor);
    }

    /// Evicts policy-approved entries until the table is back at 80% of
    /// `max_size`. Returns the number evicted.
    pub fn shrink(&self) -> usize {
        let target = self.len().saturating_sub(self.config.shrink_target());
        if target == 0 {
            return 0;
        }
        self.evict(Some(target), None)
    }

    fn snapshot(&self) -> Vec<(K, Arc<TValue<V>>)> {
        self.cache
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Evicts candidates approved by the policy, re-checking each one under
    /// its stripe lock. Stops after `limit` removals when a limit is given.
    /// Keys the tracker reports as dirty are never removed.
    pub(crate) fn evict(
        &self,
        limit: Option<usize>,
        dirty: Option<&dyn DirtyTracker<K>>,
    ) -> usize {
        let mut removed = 0;
        for (key, entry) in self.snapshot() {
            if limit.is_some_and(|limit| removed >= limit) {
                break;
            }
            if !self.policy.check(&key, &entry, self.now()) {
                continue;
            }

            let wkey = WKey::new(self.id(), key);
            let _guard = self.locks.lock_key(&wkey);
            if !self.policy.check(&wkey.key, &entry, self.now()) {
                continue;
            }
            if dirty.is_some_and(|tracker| tracker.is_dirty(&wkey)) {
                continue;
            }
            // Only remove the entry we checked; a replacement is left alone.
            if let Some((_, gone)) = self
                .cache
                .remove_if(&wkey.key, |_, current| Arc::ptr_eq(current, &entry))
            {
                self.removals.fetch_add(1, Ordering::AcqRel);
                gone.mark_shrunk();
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(table = %self.id(), removed, remaining = self.len(), "cache shrunk");
        }
        removed
    }

    pub(crate) fn cache(&self) -> &DashMap<K, Arc<TValue<V>>> {
        &self.cache
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.config.id)
            .field("persistent", &self.config.persistent)
            .field("max_size", &self.config.max_size)
            .field("len", &self.cache.len())
            .finish_non_exhaustive()
    }
}
