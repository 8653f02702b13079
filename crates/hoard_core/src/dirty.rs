//! Outstanding-write tracking.

use crate::wkey::WKey;
use dashmap::DashMap;
use hoard_storage::TableId;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Answers whether a key has a write that has not reached storage yet.
pub trait DirtyTracker<K>: Send + Sync {
    /// Returns true if `key` has an outstanding write.
    fn is_dirty(&self, key: &WKey<K>) -> bool;
}

/// The set of keys with outstanding writes.
///
/// Each mark stamps the key with a fresh generation. A flush snapshots
/// `(key, generation)` pairs and afterwards clears only the keys whose
/// generation is unchanged, so a write landing mid-flush stays dirty.
///
/// Flushes over the set are serialized by [`DirtySet::flush_lock`]; an older
/// batch committing after a newer one would otherwise overwrite the newer
/// value in storage while its mark is already gone.
#[derive(Debug)]
pub struct DirtySet<K: Eq + Hash> {
    entries: DashMap<WKey<K>, u64>,
    generation: AtomicU64,
    flush: Mutex<()>,
}

impl<K> DirtySet<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            flush: Mutex::new(()),
        }
    }

    /// Lock held from staging until the commit hooks of a flush have run.
    pub fn flush_lock(&self) -> &Mutex<()> {
        &self.flush
    }

    /// Marks `key` dirty and returns its new generation.
    pub fn mark(&self, key: WKey<K>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.entries.insert(key, generation);
        generation
    }

    /// Returns the dirty keys of `table` with their generations.
    #[must_use]
    pub fn snapshot(&self, table: TableId) -> Vec<(K, u64)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().table == table)
            .map(|entry| (entry.key().key.clone(), *entry.value()))
            .collect()
    }

    /// Clears `key` if it still carries `generation`. Returns true if cleared.
    pub fn clear_if(&self, key: &WKey<K>, generation: u64) -> bool {
        self.entries
            .remove_if(key, |_, current| *current == generation)
            .is_some()
    }

    /// Number of dirty keys across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Default for DirtySet<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> DirtyTracker<K> for DirtySet<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn is_dirty(&self, key: &WKey<K>) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TableId = TableId::new(1);
    const T2: TableId = TableId::new(2);

    #[test]
    fn mark_and_snapshot_by_table() {
        let dirty = DirtySet::new();
        dirty.mark(WKey::new(T1, "a"));
        dirty.mark(WKey::new(T2, "b"));

        assert!(dirty.is_dirty(&WKey::new(T1, "a")));
        assert!(!dirty.is_dirty(&WKey::new(T1, "b")));
        let keys: Vec<_> = dirty.snapshot(T1).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a"]);
        assert_eq!(dirty.len(), 2);
    }

    #[test]
    fn remark_survives_stale_clear() {
        let dirty = DirtySet::new();
        let key = WKey::new(T1, 9u64);
        let first = dirty.mark(key.clone());
        let second = dirty.mark(key.clone());
        assert!(second > first);

        assert!(!dirty.clear_if(&key, first));
        assert!(dirty.is_dirty(&key));
        assert!(dirty.clear_if(&key, second));
        assert!(dirty.is_empty());
    }
}
