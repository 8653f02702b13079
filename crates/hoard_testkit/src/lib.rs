//! # hoard testkit
//!
//! Test utilities for hoard.
//!
//! This crate provides:
//! - Fixtures: temporary stores and a sample entity type
//! - Property-based generators using proptest
//! - Stress drivers for concurrent batches and cache traffic
//! - One-time tracing setup for tests
//!
//! The cross-crate scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hoard_testkit::prelude::*;
//!
//! init_tracing();
//! let store = TestStore::open();
//! let players = player_table(store.storage(), Default::default());
//! players.write(1, Player::sample(1));
//! players.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
