//! Test fixtures and store helpers.

use hoard_codec::{CborMarshaller, U64Marshaller};
use hoard_core::{DirtySet, LockPool, PersistentTable, TableConfig};
use hoard_storage::{Durability, LogStore, Storage, StorageConfig, TableId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Player records.
pub const PLAYERS: TableId = TableId::new(1);
/// Session records.
pub const SESSIONS: TableId = TableId::new(2);
/// Guild records.
pub const GUILDS: TableId = TableId::new(3);

/// A sample entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Character level.
    pub level: u32,
    /// Currency balance.
    pub gold: u64,
}

impl Player {
    /// Deterministic sample player for `id`.
    pub fn sample(id: u64) -> Self {
        Self {
            id,
            name: format!("player-{id}"),
            level: (id % 60) as u32 + 1,
            gold: id * 100,
        }
    }
}

/// Store configuration with the three fixture tables and no fsync.
pub fn base_config(root: impl Into<PathBuf>) -> StorageConfig {
    StorageConfig::new(root)
        .durability(Durability::NoSync)
        .table(PLAYERS, "players")
        .table(SESSIONS, "sessions")
        .table(GUILDS, "guilds")
}

/// A [`LogStore`] in a temporary directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TestStore {
    /// The store.
    pub store: Arc<LogStore>,
    dir: TempDir,
}

impl TestStore {
    /// Opens a store with [`base_config`].
    pub fn open() -> Self {
        Self::open_with(|config| config)
    }

    /// Opens a store with [`base_config`] adjusted by `configure`.
    pub fn open_with(configure: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = LogStore::open(configure(base_config(dir.path())))
            .expect("Failed to open store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Closes the store and opens the same directory again.
    ///
    /// Every other handle to the store (tables included) must be dropped
    /// first, or the directory lock is still held.
    pub fn reopen(self) -> Self {
        self.reopen_with(|config| config)
    }

    /// Like [`TestStore::reopen`] with an adjusted configuration.
    pub fn reopen_with(self, configure: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        let Self { store, dir } = self;
        store.close().expect("Failed to close store");
        let store = Arc::try_unwrap(store).expect("Store still shared at reopen");
        drop(store);

        let store = LogStore::open(configure(base_config(dir.path())))
            .expect("Failed to reopen store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Environment directory of the store.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The store as a shared [`Storage`].
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.store.clone()
    }
}

impl std::ops::Deref for TestStore {
    type Target = LogStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// A persistent player table over `storage`.
pub fn player_table(
    storage: Arc<dyn Storage>,
    locks: Arc<LockPool>,
) -> PersistentTable<u64, Player> {
    player_table_with(storage, locks, TableConfig::new(PLAYERS))
}

/// A persistent player table with an explicit configuration.
pub fn player_table_with(
    storage: Arc<dyn Storage>,
    locks: Arc<LockPool>,
    config: TableConfig,
) -> PersistentTable<u64, Player> {
    PersistentTable::new(
        config,
        storage,
        Arc::new(U64Marshaller),
        Arc::new(CborMarshaller::new()),
        Arc::new(DirtySet::new()),
        locks,
    )
}
