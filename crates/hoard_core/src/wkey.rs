//! Composite cache keys.

use hoard_storage::TableId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A key qualified by the table it belongs to.
///
/// Used as the identity for lock striping and dirty tracking, never as a
/// storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WKey<K> {
    /// Owning table.
    pub table: TableId,
    /// Key within the table.
    pub key: K,
}

impl<K> WKey<K> {
    /// Creates a composite key.
    pub fn new(table: TableId, key: K) -> Self {
        Self { table, key }
    }
}

impl<K: Hash> WKey<K> {
    /// Returns the hash used to pick a lock stripe.
    #[must_use]
    pub fn stripe_hash(&self) -> u64 {
        stripe_hash(self.table, &self.key)
    }
}

/// Hashes a `(table, key)` pair without building a [`WKey`].
///
/// `DefaultHasher::new` uses fixed keys, so the result is stable for the
/// life of the process.
#[must_use]
pub fn stripe_hash<K: Hash + ?Sized>(table: TableId, key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    table.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}
