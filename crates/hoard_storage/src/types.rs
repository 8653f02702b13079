//! Core type definitions shared by storage and cache layers.

use serde::Deserialize;
use std::fmt;

/// Identifier of a logical table.
///
/// Table ids are small integers assigned by configuration. They are the
/// identity written into the log, so they must stay stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

impl TableId {
    /// Creates a new table id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Location of a committed value inside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPointer {
    /// Segment file id.
    pub segment: u64,
    /// Byte offset of the value within the segment.
    pub offset: u64,
    /// Value length in bytes.
    pub len: u32,
}
