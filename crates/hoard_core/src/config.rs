//! Cache table configuration.

use crate::policy::{AlwaysEvict, ExpireAfter, ShrinkPolicy, DEFAULT_EXPIRE_AFTER};
use hoard_storage::TableId;
use std::sync::Arc;
use std::time::Duration;

/// Default soft cap on cached entries.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Configuration for a cache table.
///
/// # Example
///
/// ```rust
/// use hoard_core::TableConfig;
/// use hoard_storage::TableId;
/// use std::time::Duration;
///
/// let config = TableConfig::new(TableId::new(1))
///     .max_size(50_000)
///     .expire_after(Duration::from_secs(300));
/// assert_eq!(config.max_size, 50_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Table identity, shared with storage.
    pub id: TableId,
    /// Soft cap on cached entries; `shrink` evicts down to 80% of it.
    pub max_size: usize,
    /// Whether the table is backed by storage.
    pub persistent: bool,
    /// Idle time before an entry may be evicted. `None` picks the default
    /// policy: always evict for memory tables, ten minutes for persistent
    /// ones.
    pub expire_after: Option<Duration>,
}

impl TableConfig {
    /// Creates a memory-only configuration with default limits.
    #[must_use]
    pub const fn new(id: TableId) -> Self {
        Self {
            id,
            max_size: DEFAULT_MAX_SIZE,
            persistent: false,
            expire_after: None,
        }
    }

    /// Sets the soft cap on cached entries.
    #[must_use]
    pub const fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Marks the table as storage-backed.
    #[must_use]
    pub const fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Sets the idle expiry for the default eviction policy.
    #[must_use]
    pub const fn expire_after(mut self, idle: Duration) -> Self {
        self.expire_after = Some(idle);
        self
    }

    /// Number of entries `shrink` aims to keep.
    #[must_use]
    pub const fn shrink_target(&self) -> usize {
        self.max_size / 5 * 4 + self.max_size % 5 * 4 / 5
    }

    pub(crate) fn default_policy<K, V>(&self) -> Arc<dyn ShrinkPolicy<K, V>> {
        match (self.expire_after, self.persistent) {
            (Some(idle), _) => Arc::new(ExpireAfter::new(idle)),
            (None, true) => Arc::new(ExpireAfter::new(DEFAULT_EXPIRE_AFTER)),
            (None, false) => Arc::new(AlwaysEvict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_target_is_four_fifths() {
        assert_eq!(TableConfig::new(TableId::new(1)).max_size(100).shrink_target(), 80);
        assert_eq!(TableConfig::new(TableId::new(1)).max_size(7).shrink_target(), 5);
        assert_eq!(TableConfig::new(TableId::new(1)).max_size(0).shrink_target(), 0);
        assert_eq!(
            TableConfig::new(TableId::new(1)).max_size(usize::MAX).shrink_target(),
            usize::MAX / 5 * 4
        );
    }

    #[test]
    fn builder() {
        let config = TableConfig::new(TableId::new(2))
            .max_size(10)
            .persistent(true)
            .expire_after(Duration::from_secs(1));
        assert!(config.persistent);
        assert_eq!(config.expire_after, Some(Duration::from_secs(1)));
    }
}
