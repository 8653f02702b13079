//! Environment directory management.
//!
//! ```text
//! <env_root>/
//! ├─ LOCK              # Advisory lock, one store per directory
//! ├─ 0000000001.seg    # Sealed log segment
//! ├─ 0000000002.seg    # Active log segment
//! └─ backup/           # Default backup root
//! ```

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Holds the exclusive lock on an environment directory.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub(crate) struct EnvDir {
    path: PathBuf,
    _lock_file: File,
}

impl EnvDir {
    /// Opens the environment directory, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EnvironmentLocked`] if another store holds
    /// the directory.
    pub(crate) fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StorageError::invalid_operation(format!(
                "environment root is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::EnvironmentLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// fsyncs a directory so renames and new files inside it are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> StorageResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> StorageResult<()> {
    // NTFS journals directory metadata
    Ok(())
}
