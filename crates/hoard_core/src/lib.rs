//! # hoard core
//!
//! Write-back cache tables for hot, keyed entity state.
//!
//! This crate provides:
//! - [`Table`]: a concurrent in-memory cache with single-winner miss loading
//!   and policy-driven eviction
//! - [`PersistentTable`]: a [`Table`] over a [`hoard_storage::Storage`]
//!   table, with dirty tracking and batched write-back
//! - [`LockPool`]: striped locks shared by all tables
//! - [`Wrapper`]: copy-on-write edit scopes that report their first change
//!
//! ## Concurrency
//!
//! Eviction scans without locks, then re-checks each candidate under its
//! key's stripe lock before removing it. Writes to a persistent table
//! update the cache and mark the key dirty under the same stripe lock, so
//! an eviction can never slip between a write and its dirty mark.
//!
//! ## Example
//!
//! ```rust
//! use hoard_codec::{CborMarshaller, U64Marshaller};
//! use hoard_core::{DirtySet, LockPool, PersistentTable, TableConfig};
//! use hoard_storage::{MemoryStorage, TableId};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Player { name: String, level: u32 }
//!
//! let id = TableId::new(1);
//! let players: PersistentTable<u64, Player> = PersistentTable::new(
//!     TableConfig::new(id).max_size(10_000),
//!     Arc::new(MemoryStorage::with_tables([id])),
//!     Arc::new(U64Marshaller),
//!     Arc::new(CborMarshaller::new()),
//!     Arc::new(DirtySet::new()),
//!     Arc::new(LockPool::default()),
//! );
//!
//! players.write(1, Player { name: "ayla".into(), level: 1 });
//! if let Some(mut edit) = players.edit(&1).unwrap() {
//!     edit.get_mut().level += 1;
//!     players.commit(1, edit);
//! }
//! players.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod dirty;
mod error;
mod flush;
mod lock_pool;
mod persistent;
mod policy;
mod table;
mod tvalue;
mod wkey;
mod wrapper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{TableConfig, DEFAULT_MAX_SIZE};
pub use dirty::{DirtySet, DirtyTracker};
pub use error::{CoreError, CoreResult, LoadError};
pub use flush::{flush_tables, StagedWrites, WriteBack};
pub use lock_pool::{LockPool, StripeGuard, DEFAULT_STRIPES};
pub use persistent::PersistentTable;
pub use policy::{AlwaysEvict, ExpireAfter, NeverEvict, ShrinkPolicy, DEFAULT_EXPIRE_AFTER};
pub use table::Table;
pub use tvalue::TValue;
pub use wkey::{stripe_hash, WKey};
pub use wrapper::{ChangeObserver, DirtyObserver, NoopObserver, Wrapper};
