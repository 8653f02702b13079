//! Error types for the cache layer.

use hoard_codec::MarshalError;
use hoard_storage::{StorageError, TableId};
use thiserror::Error;

/// Result type for cache operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why filling a cache entry from storage failed.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The key could not be encoded or the stored bytes could not be decoded.
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// The storage read failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A cache miss could not be filled. Nothing was cached.
    #[error("load from {table} failed: {source}")]
    Load {
        /// The table being read.
        table: TableId,
        /// The underlying failure.
        #[source]
        source: LoadError,
    },

    /// A key or value could not be marshalled.
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Creates a load error for `table`.
    pub fn load(table: TableId, source: impl Into<LoadError>) -> Self {
        Self::Load {
            table,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_names_table() {
        let err = CoreError::load(TableId::new(3), MarshalError::InvalidUtf8);
        assert!(err.to_string().contains("table:3"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
