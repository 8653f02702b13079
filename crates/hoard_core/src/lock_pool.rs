//! Striped locks.
//!
//! A fixed set of mutexes shared by every table. A key is mapped to a
//! stripe by hashing it with its table id, so operations on the same key
//! always serialize while unrelated keys only contend when they collide.

use crate::wkey::{stripe_hash, WKey};
use hoard_storage::TableId;
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hash;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 1024;

/// Held while a stripe is locked. Dropping it unlocks the stripe.
pub type StripeGuard<'a> = MutexGuard<'a, ()>;

/// A fixed-size pool of mutexes selected by hash.
///
/// Stripe locks are not reentrant: never hold one stripe while acquiring
/// another, since two keys may share a stripe.
#[derive(Debug)]
pub struct LockPool {
    stripes: Box<[Mutex<()>]>,
}

impl LockPool {
    /// Creates a pool with `stripes` locks. Zero is raised to one.
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    /// Returns the number of stripes.
    #[must_use]
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    /// Maps a hash to a stripe index.
    #[must_use]
    pub fn stripe_for(&self, hash: u64) -> usize {
        // The remainder is below `stripes.len()`, which fits in usize.
        (hash % self.stripes.len() as u64) as usize
    }

    /// Locks a stripe. Indexes past the end wrap around.
    pub fn lock(&self, stripe: usize) -> StripeGuard<'_> {
        self.stripes[stripe % self.stripes.len()].lock()
    }

    /// Locks the stripe of a composite key.
    pub fn lock_key<K: Hash>(&self, key: &WKey<K>) -> StripeGuard<'_> {
        self.lock(self.stripe_for(key.stripe_hash()))
    }

    /// Locks the stripe of `key` in `table`.
    pub fn lock_entry<K: Hash + ?Sized>(&self, table: TableId, key: &K) -> StripeGuard<'_> {
        self.lock(self.stripe_for(stripe_hash(table, key)))
    }
}

impl Default for LockPool {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_stripes_becomes_one() {
        let pool = LockPool::new(0);
        assert_eq!(pool.stripes(), 1);
        assert_eq!(pool.stripe_for(12345), 0);
    }

    #[test]
    fn same_key_same_stripe() {
        let pool = LockPool::default();
        let key = WKey::new(TableId::new(4), "bob");
        let a = pool.stripe_for(key.stripe_hash());
        let b = pool.stripe_for(stripe_hash(TableId::new(4), "bob"));
        assert_eq!(a, b);
    }

    #[test]
    fn stripe_serializes_holders() {
        let pool = Arc::new(LockPool::new(8));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = pool.lock_entry(TableId::new(1), &42u64);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn stripe_always_in_range(stripes in 1usize..4096, hash in any::<u64>()) {
            let pool = LockPool::new(stripes);
            prop_assert!(pool.stripe_for(hash) < pool.stripes());
        }
    }
}
