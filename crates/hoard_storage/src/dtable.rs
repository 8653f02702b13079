//! Per-table handles.

use crate::types::{RecordPointer, TableId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ordered index of live keys to the log location of their latest value.
pub(crate) type TableIndex = BTreeMap<Vec<u8>, RecordPointer>;

/// A logical table: its identity plus its index behind one reader/writer lock.
///
/// The lock doubles as the table-level lock of the storage contract: data
/// reads take the read side, everything else the write side.
#[derive(Debug)]
pub struct DTable {
    id: TableId,
    name: String,
    pub(crate) index: RwLock<TableIndex>,
}

impl DTable {
    pub(crate) fn new(id: TableId, name: impl Into<String>, index: TableIndex) -> Self {
        Self {
            id,
            name: name.into(),
            index: RwLock::new(index),
        }
    }

    /// Returns the table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the configured table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if the table holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}
