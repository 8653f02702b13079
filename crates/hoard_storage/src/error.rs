//! Error types for storage operations.

use crate::types::TableId;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log segment is corrupted or has an unsupported format.
    #[error("log corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected while reading a log record.
    #[error("checksum mismatch in segment {segment} at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Segment containing the record.
        segment: u64,
        /// Offset of the record within the segment.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The table id is not registered with the store.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// The table that was requested.
        table: TableId,
    },

    /// A transaction could not be committed and was rolled back.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for the abort.
        reason: String,
    },

    /// Truncating a table failed; the previous contents are still in place.
    #[error("truncate of table {table} failed: {reason}")]
    TruncateFailed {
        /// The table being truncated.
        table: TableId,
        /// Reason for the failure.
        reason: String,
    },

    /// A backup run failed.
    #[error("backup failed: {message}")]
    Backup {
        /// Description of the failure.
        message: String,
    },

    /// Another store holds the environment directory lock.
    #[error("environment locked: another store has exclusive access")]
    EnvironmentLocked,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The store is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a truncate failure.
    pub fn truncate_failed(table: TableId, reason: impl Into<String>) -> Self {
        Self::TruncateFailed {
            table,
            reason: reason.into(),
        }
    }

    /// Creates a backup error.
    pub fn backup(message: impl Into<String>) -> Self {
        Self::Backup {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
