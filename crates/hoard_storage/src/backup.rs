//! Segment-copy backups and the periodic backup scheduler.
//!
//! A backup seals the active segment and copies sealed segment files into a
//! fresh directory under the backup root:
//!
//! ```text
//! <backup_root>/
//! ├─ incbackup.conf                  # last segment id copied incrementally
//! ├─ inc-2026-10-19-14-03-07/        # incremental: segments after the cursor
//! └─ full-2026-10-19-14-03-17/       # full: every sealed segment
//! ```
//!
//! Restoring is a matter of copying the segments of the latest full backup,
//! then those of every later incremental backup, into an empty environment
//! directory.

use crate::dir::sync_dir;
use crate::error::{StorageError, StorageResult};
use crate::segment::{segment_file_name, SegmentSet};
use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Name of the incremental cursor file inside the backup root.
pub const CURSOR_FILE: &str = "incbackup.conf";

/// Kind of backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupKind {
    /// Copy the segments sealed since the last incremental run.
    Incremental,
    /// Copy every sealed segment.
    Full,
}

impl BackupKind {
    /// Directory name prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Incremental => "inc",
            Self::Full => "full",
        }
    }
}

/// Outcome of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// What kind of run this was.
    pub kind: BackupKind,
    /// Directory the segments were copied into.
    pub dir: PathBuf,
    /// Ids of the segments copied, ascending.
    pub segments: Vec<u64>,
    /// Highest segment id covered by this backup, if any.
    pub last_segment: Option<u64>,
}

/// Returns the directory name for a backup started at `at`.
#[must_use]
pub fn backup_dir_name(kind: BackupKind, at: &DateTime<Local>) -> String {
    format!("{}-{}", kind.prefix(), at.format("%Y-%m-%d-%H-%M-%S"))
}

/// Reads the incremental cursor from `path`.
///
/// A missing, empty or unparsable file means "no incremental backup yet".
#[must_use]
pub fn load_cursor(path: &Path) -> Option<u64> {
    let text = fs::read_to_string(path).ok()?;
    match text.lines().next().map(str::trim).map(str::parse::<u64>) {
        Some(Ok(id)) => Some(id),
        Some(Err(_)) => {
            debug!(path = %path.display(), "ignoring unreadable backup cursor");
            None
        }
        None => None,
    }
}

/// Writes the incremental cursor to `path` through a temp file and rename.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_cursor(path: &Path, last_segment: u64) -> StorageResult<()> {
    let tmp = path.with_extension("conf.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        writeln!(file, "{last_segment}")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Runs backups against a segment set. Runs are serialized.
#[derive(Debug)]
pub(crate) struct BackupManager {
    segments: Arc<SegmentSet>,
    root: PathBuf,
    lock: Mutex<()>,
}

impl BackupManager {
    pub(crate) fn new(segments: Arc<SegmentSet>, root: PathBuf) -> Self {
        Self {
            segments,
            root,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn cursor_path(&self) -> PathBuf {
        self.root.join(CURSOR_FILE)
    }

    /// Forces committed writes to disk ahead of a run.
    pub(crate) fn flush(&self) -> StorageResult<()> {
        self.segments.sync_active()
    }

    /// Copies every sealed segment with id greater than `after` into `dest`.
    ///
    /// Returns the highest segment id now covered: the last one copied, or
    /// `after` unchanged when nothing new was sealed.
    pub(crate) fn copy_segments(
        &self,
        dest: &Path,
        after: Option<u64>,
    ) -> StorageResult<(Vec<u64>, Option<u64>)> {
        let _guard = self.lock.lock();
        let active = self.segments.seal_active()?;
        fs::create_dir_all(dest)?;

        let ids: Vec<u64> = self
            .segments
            .all()
            .iter()
            .map(|s| s.id())
            .filter(|&id| id < active && after.map_or(true, |cursor| id > cursor))
            .collect();

        for &id in &ids {
            let name = segment_file_name(id);
            fs::copy(self.segments.path_of(id), dest.join(&name)).map_err(|e| {
                StorageError::backup(format!("copying {name} to {}: {e}", dest.display()))
            })?;
        }
        sync_dir(dest)?;

        let last = ids.last().copied().or(after);
        debug!(dest = %dest.display(), copied = ids.len(), ?last, "segments copied");
        Ok((ids, last))
    }

    /// Runs one backup of `kind` into a new timestamped directory.
    pub(crate) fn run(&self, kind: BackupKind) -> StorageResult<BackupReport> {
        let dir = self.root.join(backup_dir_name(kind, &Local::now()));
        let report = match kind {
            BackupKind::Incremental => {
                let cursor_path = self.cursor_path();
                let cursor = load_cursor(&cursor_path);
                let (segments, last) = self.copy_segments(&dir, cursor)?;
                if let Some(last) = last {
                    save_cursor(&cursor_path, last)?;
                }
                BackupReport {
                    kind,
                    dir,
                    segments,
                    last_segment: last,
                }
            }
            BackupKind::Full => {
                let (segments, last) = self.copy_segments(&dir, None)?;
                BackupReport {
                    kind,
                    dir,
                    segments,
                    last_segment: last,
                }
            }
        };

        info!(
            kind = kind.prefix(),
            dir = %report.dir.display(),
            copied = report.segments.len(),
            "backup complete"
        );
        Ok(report)
    }
}

struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the background backup thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
pub(crate) struct BackupScheduler {
    signal: Arc<Signal>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BackupScheduler {
    /// Starts the scheduler. Returns `None` when neither interval is set.
    pub(crate) fn start(
        manager: Arc<BackupManager>,
        incremental: Option<Duration>,
        full: Option<Duration>,
    ) -> StorageResult<Option<Self>> {
        if incremental.is_none() && full.is_none() {
            return Ok(None);
        }

        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name("hoard-backup".to_string())
            .spawn(move || backup_loop(&manager, &thread_signal, incremental, full))?;

        info!(
            incremental_secs = incremental.map(|d| d.as_secs()),
            full_secs = full.map(|d| d.as_secs()),
            "backup scheduler started"
        );
        Ok(Some(Self {
            signal,
            thread: Some(thread),
        }))
    }

    /// Stops the thread and waits for any in-flight run to finish.
    pub(crate) fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            debug!("backup scheduler stopped");
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn backup_loop(
    manager: &BackupManager,
    signal: &Signal,
    incremental: Option<Duration>,
    full: Option<Duration>,
) {
    let start = Instant::now();
    let mut next_incremental = incremental.map(|every| start + every);
    let mut next_full = full.map(|every| start + every);

    loop {
        let Some(due) = [next_incremental, next_full].into_iter().flatten().min() else {
            return;
        };

        {
            let mut stopped = signal.stopped.lock();
            while !*stopped && Instant::now() < due {
                signal.wake.wait_until(&mut stopped, due);
            }
            if *stopped {
                return;
            }
        }

        let now = Instant::now();
        if let Err(e) = manager.flush() {
            error!(error = %e, "pre-backup flush failed");
        }

        if let (Some(at), Some(every)) = (next_incremental, incremental) {
            if at <= now {
                if let Err(e) = manager.run(BackupKind::Incremental) {
                    error!(error = %e, "incremental backup failed");
                }
                next_incremental = Some(Instant::now() + every);
            }
        }

        if let (Some(at), Some(every)) = (next_full, full) {
            if at <= now {
                if let Err(e) = manager.run(BackupKind::Full) {
                    error!(error = %e, "full backup failed");
                }
                next_full = Some(Instant::now() + every);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn manager(env: &Path, backups: &Path) -> BackupManager {
        let segments = Arc::new(SegmentSet::open(env, 1 << 20, Durability::NoSync).unwrap());
        BackupManager::new(segments, backups.to_path_buf())
    }

    #[test]
    fn dir_name_format() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            backup_dir_name(BackupKind::Incremental, &at),
            "inc-2026-03-07-09-05-01"
        );
        assert_eq!(backup_dir_name(BackupKind::Full, &at), "full-2026-03-07-09-05-01");
    }

    #[test]
    fn cursor_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CURSOR_FILE);
        assert_eq!(load_cursor(&path), None);

        save_cursor(&path, 42).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42\n");
        assert_eq!(load_cursor(&path), Some(42));
    }

    #[test]
    fn garbage_cursor_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CURSOR_FILE);
        fs::write(&path, "not a number\n").unwrap();
        assert_eq!(load_cursor(&path), None);
    }

    #[test]
    fn copy_after_cursor_skips_older_segments() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        let manager = manager(env.path(), out.path());

        manager.segments.append(b"one").unwrap();
        manager.segments.seal_active().unwrap();
        manager.segments.append(b"two").unwrap();

        let (copied, last) = manager.copy_segments(&out.path().join("a"), Some(1)).unwrap();
        assert_eq!(copied, vec![2]);
        assert_eq!(last, Some(2));
        assert!(out.path().join("a").join(segment_file_name(2)).exists());
        assert!(!out.path().join("a").join(segment_file_name(1)).exists());
    }

    #[test]
    fn nothing_new_keeps_cursor() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        let manager = manager(env.path(), out.path());

        let (copied, last) = manager.copy_segments(&out.path().join("a"), Some(42)).unwrap();
        assert!(copied.is_empty());
        assert_eq!(last, Some(42));
    }

    #[test]
    fn incremental_run_advances_cursor_full_does_not() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        let manager = manager(env.path(), out.path());

        manager.segments.append(b"data").unwrap();
        let report = manager.run(BackupKind::Incremental).unwrap();
        assert_eq!(report.segments, vec![1]);
        assert_eq!(load_cursor(&manager.cursor_path()), Some(1));

        manager.segments.append(b"more").unwrap();
        let full = manager.run(BackupKind::Full).unwrap();
        assert_eq!(full.segments, vec![1, 2]);
        assert_eq!(load_cursor(&manager.cursor_path()), Some(1));
    }

    #[test]
    fn scheduler_stops_promptly() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        let manager = Arc::new(manager(env.path(), out.path()));

        let started = Instant::now();
        let mut scheduler =
            BackupScheduler::start(manager, Some(Duration::from_secs(3600)), None)
                .unwrap()
                .unwrap();
        scheduler.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn scheduler_survives_a_failed_run() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        // A plain file where the backup root should be fails every run.
        let root = out.path().join("backups");
        fs::write(&root, b"in the way").unwrap();
        let manager = Arc::new(manager(env.path(), &root));
        manager.segments.append(b"data").unwrap();
        let cursor = manager.cursor_path();

        let mut scheduler = BackupScheduler::start(
            Arc::clone(&manager),
            Some(Duration::from_millis(50)),
            None,
        )
        .unwrap()
        .unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(load_cursor(&cursor), None);

        fs::remove_file(&root).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while load_cursor(&cursor).is_none() {
            assert!(Instant::now() < deadline, "scheduler stopped after a failure");
            thread::sleep(Duration::from_millis(20));
        }
        scheduler.shutdown();

        assert_eq!(load_cursor(&cursor), Some(1));
    }

    #[test]
    fn no_intervals_no_thread() {
        let env = tempdir().unwrap();
        let out = tempdir().unwrap();
        let manager = Arc::new(manager(env.path(), out.path()));
        assert!(BackupScheduler::start(manager, None, None).unwrap().is_none());
    }
}
