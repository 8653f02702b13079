//! Storage configuration.

use crate::types::TableId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Incremental backups run only when their interval is at least this long.
pub const MIN_INCREMENTAL_BACKUP_INTERVAL: Duration = Duration::from_secs(6);

/// Full backups run only when their interval is at least this long.
pub const MIN_FULL_BACKUP_INTERVAL: Duration = Duration::from_secs(10);

/// Default recovery read buffer size when `cache_size` is zero.
const DEFAULT_READ_BUFFER: usize = 1024 * 1024;

/// How hard a commit pushes data towards the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// fsync the active segment after every commit.
    Sync,
    /// Leave commits in the OS page cache until a checkpoint or rotation.
    NoSync,
}

/// Configuration for opening a [`crate::LogStore`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the log segments and the lock file.
    pub env_root: PathBuf,

    /// Directory receiving backups. Defaults to `<env_root>/backup`.
    pub backup_root: Option<PathBuf>,

    /// Interval between incremental backups (below 6s disables them).
    pub incremental_backup_interval: Duration,

    /// Interval between full backups (below 10s disables them).
    pub full_backup_interval: Duration,

    /// Read buffer hint in bytes used while replaying segments (0 = default).
    pub cache_size: usize,

    /// Commit durability level.
    pub durability: Durability,

    /// Size at which the active segment is sealed and a new one started.
    pub max_segment_size: u64,

    /// Logical tables to open, by id.
    pub tables: BTreeMap<TableId, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            env_root: PathBuf::from("data"),
            backup_root: None,
            incremental_backup_interval: Duration::ZERO, // disabled
            full_backup_interval: Duration::ZERO,        // disabled
            cache_size: 0,
            durability: Durability::Sync,
            max_segment_size: 16 * 1024 * 1024, // 16 MB
            tables: BTreeMap::new(),
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at `env_root` with default values.
    #[must_use]
    pub fn new(env_root: impl Into<PathBuf>) -> Self {
        Self {
            env_root: env_root.into(),
            ..Self::default()
        }
    }

    /// Sets the backup directory.
    #[must_use]
    pub fn backup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_root = Some(path.into());
        self
    }

    /// Sets the incremental backup interval.
    #[must_use]
    pub const fn incremental_backup_interval(mut self, interval: Duration) -> Self {
        self.incremental_backup_interval = interval;
        self
    }

    /// Sets the full backup interval.
    #[must_use]
    pub const fn full_backup_interval(mut self, interval: Duration) -> Self {
        self.full_backup_interval = interval;
        self
    }

    /// Sets the recovery read buffer hint.
    #[must_use]
    pub const fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Sets the commit durability.
    #[must_use]
    pub const fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the segment rotation size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Registers a logical table.
    #[must_use]
    pub fn table(mut self, id: TableId, name: impl Into<String>) -> Self {
        self.tables.insert(id, name.into());
        self
    }

    /// Returns the effective backup directory.
    #[must_use]
    pub fn resolved_backup_root(&self) -> PathBuf {
        self.backup_root
            .clone()
            .unwrap_or_else(|| self.env_root.join("backup"))
    }

    /// Returns true if scheduled incremental backups are enabled.
    #[must_use]
    pub fn incremental_backup_enabled(&self) -> bool {
        self.incremental_backup_interval >= MIN_INCREMENTAL_BACKUP_INTERVAL
    }

    /// Returns true if scheduled full backups are enabled.
    #[must_use]
    pub fn full_backup_enabled(&self) -> bool {
        self.full_backup_interval >= MIN_FULL_BACKUP_INTERVAL
    }

    pub(crate) fn read_buffer_size(&self) -> usize {
        if self.cache_size == 0 {
            DEFAULT_READ_BUFFER
        } else {
            self.cache_size
        }
    }
}
