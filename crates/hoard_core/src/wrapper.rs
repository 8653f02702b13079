//! Copy-on-write edit scopes.
//!
//! A [`Wrapper`] holds two snapshots of a value: the origin it was created
//! from and the current data. They are the same `Arc` until the first
//! modification clones the origin. "Modified" means the two are different
//! allocations, not that they compare unequal.

use crate::dirty::DirtySet;
use crate::wkey::WKey;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Receives the new data whenever a wrapper changes.
pub trait ChangeObserver<V>: Send + Sync {
    /// Called with the wrapper's data after it changed identity.
    fn on_change(&self, data: &V);
}

/// Ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<V> ChangeObserver<V> for NoopObserver {
    fn on_change(&self, _data: &V) {}
}

/// Marks a key dirty on every change.
#[derive(Debug)]
pub struct DirtyObserver<K: Eq + Hash> {
    dirty: Arc<DirtySet<K>>,
    key: WKey<K>,
}

impl<K: Eq + Hash> DirtyObserver<K> {
    /// Creates an observer marking `key` in `dirty`.
    pub fn new(dirty: Arc<DirtySet<K>>, key: WKey<K>) -> Self {
        Self { dirty, key }
    }
}

impl<K, V> ChangeObserver<V> for DirtyObserver<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn on_change(&self, _data: &V) {
        self.dirty.mark(self.key.clone());
    }
}

/// A copy-on-write view of a value for one edit scope.
///
/// # Example
///
/// ```rust
/// use hoard_core::{NoopObserver, Wrapper};
/// use std::sync::Arc;
///
/// let origin = Arc::new(vec![1, 2, 3]);
/// let mut edit = Wrapper::new(Arc::clone(&origin), Arc::new(NoopObserver));
/// assert!(!edit.is_modified());
///
/// edit.get_mut().push(4);
/// assert!(edit.is_modified());
/// assert_eq!(origin.len(), 3);
/// assert_eq!(edit.get().len(), 4);
/// ```
pub struct Wrapper<V> {
    origin: Arc<V>,
    data: Arc<V>,
    observer: Arc<dyn ChangeObserver<V>>,
}

impl<V: Clone> Wrapper<V> {
    /// Creates an unmodified wrapper around `origin`.
    pub fn new(origin: Arc<V>, observer: Arc<dyn ChangeObserver<V>>) -> Self {
        Self {
            data: Arc::clone(&origin),
            origin,
            observer,
        }
    }

    /// Creates a wrapper whose changes nobody observes.
    pub fn detached(origin: Arc<V>) -> Self {
        Self::new(origin, Arc::new(NoopObserver))
    }

    /// Returns the current data.
    pub fn get(&self) -> &V {
        &self.data
    }

    /// Returns mutable access to the data, cloning the origin first if this
    /// is the first modification.
    pub fn get_mut(&mut self) -> &mut V {
        self.check_modify();
        Arc::make_mut(&mut self.data)
    }

    /// Clones the origin into the data and notifies the observer, once.
    /// Later calls do nothing until the wrapper is rebuilt.
    pub fn check_modify(&mut self) {
        if self.is_modified() {
            return;
        }
        self.data = Arc::new(V::clone(&self.origin));
        self.observer.on_change(&self.data);
    }

    /// Notifies the observer with the current data.
    ///
    /// Only meaningful after the data was replaced through
    /// [`Wrapper::assign`].
    pub fn force_modify(&self) {
        debug_assert!(
            self.is_modified(),
            "force_modify called on an unmodified wrapper"
        );
        self.observer.on_change(&self.data);
    }

    /// Replaces the data and notifies the observer.
    pub fn assign(&mut self, value: V) {
        self.data = Arc::new(value);
        self.observer.on_change(&self.data);
    }

    /// Returns true once the data is no longer the origin allocation.
    pub fn is_modified(&self) -> bool {
        !Arc::ptr_eq(&self.origin, &self.data)
    }

    /// Returns the origin snapshot.
    pub fn origin(&self) -> &Arc<V> {
        &self.origin
    }

    /// Returns the current data snapshot.
    pub fn data(&self) -> &Arc<V> {
        &self.data
    }

    /// Consumes the wrapper, returning the current data.
    pub fn into_data(self) -> Arc<V> {
        self.data
    }
}

impl<V: fmt::Debug> fmt::Debug for Wrapper<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("data", &self.data)
            .field("modified", &!Arc::ptr_eq(&self.origin, &self.data))
            .finish_non_exhaustive()
    }
}
