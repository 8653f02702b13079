//! Eviction policies.

use crate::tvalue::TValue;
use std::time::Duration;

/// Idle time after which persistent table entries become evictable.
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(600);

/// Decides whether a cache entry may be evicted.
///
/// `check` runs twice per eviction: once during the lock-free scan and again
/// under the key's stripe lock, so it must be cheap and side-effect free.
pub trait ShrinkPolicy<K, V>: Send + Sync {
    /// Returns true if the entry may be removed. `now` is the table clock.
    fn check(&self, key: &K, value: &TValue<V>, now: u64) -> bool;
}

/// Every entry is a candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEvict;

impl<K, V> ShrinkPolicy<K, V> for AlwaysEvict {
    fn check(&self, _key: &K, _value: &TValue<V>, _now: u64) -> bool {
        true
    }
}

/// No entry is ever a candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEvict;

impl<K, V> ShrinkPolicy<K, V> for NeverEvict {
    fn check(&self, _key: &K, _value: &TValue<V>, _now: u64) -> bool {
        false
    }
}

/// Entries idle for longer than a fixed duration are candidates.
#[derive(Debug, Clone, Copy)]
pub struct ExpireAfter {
    idle_millis: u64,
}

impl ExpireAfter {
    /// Creates a policy expiring entries idle for longer than `idle`.
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        Self {
            idle_millis: u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for ExpireAfter {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRE_AFTER)
    }
}

impl<K, V> ShrinkPolicy<K, V> for ExpireAfter {
    fn check(&self, _key: &K, value: &TValue<V>, now: u64) -> bool {
        value.last_access().saturating_add(self.idle_millis) < now
    }
}

impl<K, V, F> ShrinkPolicy<K, V> for F
where
    F: Fn(&K, &TValue<V>) -> bool + Send + Sync,
{
    fn check(&self, key: &K, value: &TValue<V>, _now: u64) -> bool {
        self(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_after_uses_idle_time() {
        let policy = ExpireAfter::new(Duration::from_secs(1));
        let entry = TValue::new(Some(1u8), 1_000);
        assert!(!ShrinkPolicy::<u8, u8>::check(&policy, &0, &entry, 1_500));
        assert!(!ShrinkPolicy::<u8, u8>::check(&policy, &0, &entry, 2_000));
        assert!(ShrinkPolicy::<u8, u8>::check(&policy, &0, &entry, 2_001));
    }

    #[test]
    fn closures_are_policies() {
        let even_only = |key: &u32, _: &TValue<u8>| key % 2 == 0;
        let entry = TValue::absent(0);
        assert!(even_only.check(&2, &entry, 0));
        assert!(!even_only.check(&3, &entry, 0));
    }

    #[test]
    fn fixed_policies() {
        let entry = TValue::<u8>::absent(0);
        assert!(ShrinkPolicy::<u8, u8>::check(&AlwaysEvict, &1, &entry, 0));
        assert!(!ShrinkPolicy::<u8, u8>::check(&NeverEvict, &1, &entry, 0));
    }
}
