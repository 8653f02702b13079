//! # hoard storage
//!
//! Durable, transactional, byte-keyed tables for the hoard cache.
//!
//! The main implementation, [`LogStore`], keeps every table's data in one
//! append-only log split into numbered segment files. Each transaction is
//! written as a single checksummed frame; on open, committed frames are
//! replayed to rebuild an in-memory key index per table and anything after
//! the last complete frame is discarded.
//!
//! Sealed segments never change, which makes backups plain file copies:
//! - incremental backups copy the segments sealed since the last run and
//!   remember the last one in `incbackup.conf`
//! - full backups copy every sealed segment
//!
//! Both can run on a background schedule configured through
//! [`StorageConfig`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use hoard_storage::{Batch, LogStore, Storage, StorageConfig, TableId};
//!
//! let users = TableId::new(1);
//! let sessions = TableId::new(2);
//! let store = LogStore::open(
//!     StorageConfig::new("/var/lib/app")
//!         .table(users, "users")
//!         .table(sessions, "sessions"),
//! )?;
//!
//! let mut batch = Batch::new();
//! batch.insert(users, vec![(b"alice".to_vec(), b"admin".to_vec())]);
//! batch.insert(sessions, vec![(b"s1".to_vec(), b"alice".to_vec())]);
//! store.batch_put(&batch)?;
//! # Ok::<(), hoard_storage::StorageError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod dir;
mod dtable;
mod error;
mod memory;
mod record;
mod recovery;
mod segment;
mod storage;
mod store;
mod txn;
mod types;

pub use backup::{
    backup_dir_name, load_cursor, save_cursor, BackupKind, BackupReport, CURSOR_FILE,
};
pub use config::{
    Durability, StorageConfig, MIN_FULL_BACKUP_INTERVAL, MIN_INCREMENTAL_BACKUP_INTERVAL,
};
pub use dtable::DTable;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use record::{compute_crc32, LogRecord, RecordType, LOG_MAGIC, LOG_VERSION};
pub use segment::{parse_segment_file_name, segment_file_name};
pub use storage::{Batch, Storage};
pub use store::LogStore;
pub use types::{RecordPointer, TableId};
