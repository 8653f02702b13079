//! Cache entries.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A cached value plus its access bookkeeping.
///
/// `None` is the confirmed-absent sentinel: storage was asked and had
/// nothing. Entries are shared through `Arc` between the cache and callers,
/// so the payload is swapped as a whole rather than mutated in place.
pub struct TValue<V> {
    value: RwLock<Option<Arc<V>>>,
    last_access: AtomicU64,
    shrunk: AtomicBool,
}

impl<V> TValue<V> {
    /// Creates an entry accessed at `now`.
    pub fn new(value: Option<V>, now: u64) -> Self {
        Self::from_arc(value.map(Arc::new), now)
    }

    /// Creates an entry around an already shared payload.
    pub fn from_arc(value: Option<Arc<V>>, now: u64) -> Self {
        Self {
            value: RwLock::new(value),
            last_access: AtomicU64::new(now),
            shrunk: AtomicBool::new(false),
        }
    }

    /// Creates a confirmed-absent entry.
    pub fn absent(now: u64) -> Self {
        Self::from_arc(None, now)
    }

    /// Returns the current payload.
    pub fn value(&self) -> Option<Arc<V>> {
        self.value.read().clone()
    }

    /// Replaces the payload, returning the previous one.
    pub fn set(&self, value: Option<Arc<V>>) -> Option<Arc<V>> {
        std::mem::replace(&mut *self.value.write(), value)
    }

    /// Returns true for the confirmed-absent sentinel.
    pub fn is_absent(&self) -> bool {
        self.value.read().is_none()
    }

    /// Last access time in clock milliseconds.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    /// Records an access at `now`.
    pub fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::AcqRel);
    }

    /// Returns true once the entry has been evicted.
    pub fn is_shrunk(&self) -> bool {
        self.shrunk.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shrunk(&self) {
        self.shrunk.store(true, Ordering::Release);
    }
}

impl<V: fmt::Debug> fmt::Debug for TValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TValue")
            .field("value", &self.value())
            .field("last_access", &self.last_access())
            .field("shrunk", &self.is_shrunk())
            .finish()
    }
}
