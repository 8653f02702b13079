//! Numbered log segment files.
//!
//! The environment directory holds segments named `NNNNNNNNNN.seg`. Only the
//! highest-numbered segment (the active one) is ever appended to; every
//! other segment is sealed and immutable, which is what makes copying them
//! for backup safe while the store keeps serving writes.

use crate::config::Durability;
use crate::error::{StorageError, StorageResult};
use crate::types::RecordPointer;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const SEGMENT_EXTENSION: &str = "seg";

/// First id used in a fresh environment.
pub(crate) const FIRST_SEGMENT_ID: u64 = 1;

/// Returns the file name of segment `id`.
#[must_use]
pub fn segment_file_name(id: u64) -> String {
    format!("{id:010}.{SEGMENT_EXTENSION}")
}

/// Parses a segment id out of a file name.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".seg")?;
    if stem.len() != 10 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// One append-only segment file.
#[derive(Debug)]
pub(crate) struct SegmentFile {
    id: u64,
    path: PathBuf,
    file: Mutex<File>,
    size: AtomicU64,
}

impl SegmentFile {
    /// Opens or creates the segment file `id` inside `dir`.
    pub(crate) fn open(dir: &Path, id: u64) -> StorageResult<Self> {
        let path = dir.join(segment_file_name(id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
            size: AtomicU64::new(size),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Appends `data` and returns the offset it was written at.
    ///
    /// A failed write is cut back off the file so no torn bytes remain
    /// in front of later appends.
    pub(crate) fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.lock();
        let offset = self.size();

        let written = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data));
        if let Err(e) = written {
            let _ = file.set_len(offset);
            return Err(e.into());
        }

        self.size.store(offset + data.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Reads `len` bytes at `offset`.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.size() {
            return Err(StorageError::corrupted(format!(
                "read past end of segment {}: offset {offset}, len {len}",
                self.id
            )));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads the whole segment through a buffer of `buffer_size` bytes.
    pub(crate) fn read_all(&self, buffer_size: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::with_capacity(buffer_size, &mut *file);
        let mut data = Vec::with_capacity(self.size() as usize);
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Cuts the file back to `len` bytes.
    pub(crate) fn truncate(&self, len: u64) -> StorageResult<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        file.sync_all()?;
        self.size.store(len, Ordering::Release);
        Ok(())
    }

    /// Forces file contents to disk.
    pub(crate) fn sync(&self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

/// The ordered set of segments in an environment directory.
pub(crate) struct SegmentSet {
    dir: PathBuf,
    max_segment_size: u64,
    durability: Durability,
    segments: RwLock<BTreeMap<u64, Arc<SegmentFile>>>,
    active: RwLock<Arc<SegmentFile>>,
    append_lock: Mutex<()>,
}

impl SegmentSet {
    /// Opens every segment in `dir`, creating the first one if none exist.
    pub(crate) fn open(
        dir: &Path,
        max_segment_size: u64,
        durability: Durability,
    ) -> StorageResult<Self> {
        let mut segments = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(parse_segment_file_name) {
                segments.insert(id, Arc::new(SegmentFile::open(dir, id)?));
            }
        }

        let active = match segments.values().next_back() {
            Some(last) => Arc::clone(last),
            None => {
                let first = Arc::new(SegmentFile::open(dir, FIRST_SEGMENT_ID)?);
                segments.insert(FIRST_SEGMENT_ID, Arc::clone(&first));
                first
            }
        };

        debug!(
            dir = %dir.display(),
            segments = segments.len(),
            "segment set opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            max_segment_size,
            durability,
            segments: RwLock::new(segments),
            active: RwLock::new(active),
            append_lock: Mutex::new(()),
        })
    }

    /// Returns all segments in id order.
    pub(crate) fn all(&self) -> Vec<Arc<SegmentFile>> {
        self.segments.read().values().cloned().collect()
    }

    /// Returns the id of the active segment.
    pub(crate) fn active_id(&self) -> u64 {
        self.active().id()
    }

    fn active(&self) -> Arc<SegmentFile> {
        self.active.read().clone()
    }

    /// Appends one frame to the active segment, rotating first if it is full.
    ///
    /// Returns the segment id and offset the frame starts at.
    pub(crate) fn append(&self, frame: &[u8]) -> StorageResult<(u64, u64)> {
        let _guard = self.append_lock.lock();
        let mut active = self.active();
        if active.size() > 0 && active.size() >= self.max_segment_size {
            active = self.rotate_locked(&active)?;
        }

        let offset = active.append(frame)?;
        if self.durability == Durability::Sync {
            if let Err(e) = active.sync() {
                // Not durable means not committed: take the frame back out.
                let _ = active.truncate(offset);
                return Err(e);
            }
        }
        Ok((active.id(), offset))
    }

    /// Seals the active segment if it holds any data.
    ///
    /// Returns the id of the active segment afterwards; every segment with a
    /// smaller id is sealed.
    pub(crate) fn seal_active(&self) -> StorageResult<u64> {
        let _guard = self.append_lock.lock();
        let active = self.active();
        if active.size() == 0 {
            return Ok(active.id());
        }
        Ok(self.rotate_locked(&active)?.id())
    }

    fn rotate_locked(&self, current: &SegmentFile) -> StorageResult<Arc<SegmentFile>> {
        current.sync()?;
        let next_id = current.id() + 1;
        let next = Arc::new(SegmentFile::open(&self.dir, next_id)?);
        self.segments.write().insert(next_id, Arc::clone(&next));
        *self.active.write() = Arc::clone(&next);
        info!(sealed = current.id(), active = next_id, "log segment rotated");
        Ok(next)
    }

    /// Reads the value a pointer refers to.
    pub(crate) fn read(&self, pointer: RecordPointer) -> StorageResult<Vec<u8>> {
        let segment = self
            .segments
            .read()
            .get(&pointer.segment)
            .cloned()
            .ok_or_else(|| {
                StorageError::corrupted(format!("missing segment {}", pointer.segment))
            })?;
        segment.read_at(pointer.offset, pointer.len as usize)
    }

    /// fsyncs the active segment.
    pub(crate) fn sync_active(&self) -> StorageResult<()> {
        self.active().sync()
    }

    /// Returns the path of segment `id`.
    pub(crate) fn path_of(&self, id: u64) -> PathBuf {
        self.dir.join(segment_file_name(id))
    }
}

impl std::fmt::Debug for SegmentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSet")
            .field("dir", &self.dir)
            .field("active", &self.active_id())
            .field("max_segment_size", &self.max_segment_size)
            .finish_non_exhaustive()
    }
}
