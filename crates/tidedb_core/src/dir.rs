//! Engine directory management.
//!
//! This module handles the file system layout of one engine:
//!
//! ```text
//! <path>/<name>/
//! ├─ LOCK                      # Advisory lock for single-writer
//! ├─ segments/
//! │  └─ segment-NNNNNN.dat     # Append-only segment files, numbered from 0
//! ├─ snapshot/
//! │  └─ state-<name>.snap      # Index snapshot
//! ├─ compact/                  # Scratch output of a running compaction
//! └─ segments.old/             # Previous segments during a compaction swap
//! ```
//!
//! The LOCK file ensures only one handle can open the engine at a time.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::Snapshot;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOCK_FILE: &str = "LOCK";
const SEGMENTS_DIR: &str = "segments";
const OLD_SEGMENTS_DIR: &str = "segments.old";
const COMPACT_DIR: &str = "compact";
const SNAPSHOT_DIR: &str = "snapshot";

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".dat";

/// File name of segment `number`, e.g. `segment-000007.dat`.
#[must_use]
pub fn segment_file_name(number: u32) -> String {
    format!("{SEGMENT_PREFIX}{number:06}{SEGMENT_SUFFIX}")
}

/// Parses a segment file name back into its number.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u32> {
    let digits = name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Manages an engine's directory structure and file locking.
///
/// # Thread Safety
///
/// The `EngineDir` holds an exclusive lock on the engine directory. Only
/// one `EngineDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct EngineDir {
    path: PathBuf,
    name: String,
    _lock_file: File,
}

impl EngineDir {
    /// Opens or creates the directory `root/name`.
    ///
    /// Finishes a compaction swap that was interrupted by a crash, and
    /// removes a stale compaction scratch directory.
    ///
    /// # Errors
    ///
    /// - `EngineLocked` if another handle holds the lock
    /// - `InvalidFormat` if the path exists but is not a directory
    /// - I/O errors
    pub fn open(root: &Path, name: &str) -> CoreResult<Self> {
        let path = root.join(name);
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
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
            return Err(CoreError::EngineLocked);
        }

        let dir = Self {
            path,
            name: name.to_owned(),
            _lock_file: lock_file,
        };
        dir.recover_swap()?;
        fs::create_dir_all(dir.segments_dir())?;
        fs::create_dir_all(dir.snapshot_dir())?;
        sync_directory(&dir.path)?;

        Ok(dir)
    }

    /// Returns the engine directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the live segments.
    #[must_use]
    pub fn segments_dir(&self) -> PathBuf {
        self.path.join(SEGMENTS_DIR)
    }

    /// Scratch directory a compaction writes into.
    #[must_use]
    pub fn compact_dir(&self) -> PathBuf {
        self.path.join(COMPACT_DIR)
    }

    fn old_segments_dir(&self) -> PathBuf {
        self.path.join(OLD_SEGMENTS_DIR)
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.path.join(SNAPSHOT_DIR)
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_dir().join(format!("state-{}.snap", self.name))
    }

    /// Path of segment `number`.
    #[must_use]
    pub fn segment_path(&self, number: u32) -> PathBuf {
        self.segments_dir().join(segment_file_name(number))
    }

    /// Lists the segment numbers on disk in ascending order.
    ///
    /// Files ending in `.tmp` are ignored.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` for an unrecognised file name or a gap in the
    /// numbering, which must run contiguously from 0.
    pub fn list_segments(&self) -> CoreResult<Vec<u32>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(self.segments_dir())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.ends_with(".tmp") {
                continue;
            }
            match parse_segment_file_name(&name) {
                Some(number) => numbers.push(number),
                None => {
                    return Err(CoreError::invalid_format(format!(
                        "unexpected file in segments directory: {name}"
                    )))
                }
            }
        }
        numbers.sort_unstable();

        for (expected, &number) in numbers.iter().enumerate() {
            if number as usize != expected {
                return Err(CoreError::invalid_format(format!(
                    "segment numbering has a gap: expected {}, found {number}",
                    segment_file_name(expected as u32)
                )));
            }
        }

        Ok(numbers)
    }

    /// Loads the snapshot.
    ///
    /// Returns `None` if there is no snapshot file.
    pub fn load_snapshot(&self) -> CoreResult<Option<Snapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        Snapshot::decode(&data).map(Some)
    }

    /// Saves the snapshot atomically.
    ///
    /// Uses write-then-rename:
    /// 1. Write to `state-<name>.snap.tmp`
    /// 2. Sync the temporary file
    /// 3. Rename it over the snapshot
    /// 4. Fsync the snapshot directory
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let path = self.snapshot_path();
        let temp_path = self.snapshot_dir().join(format!("state-{}.snap.tmp", self.name));

        let data = snapshot.encode()?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        sync_directory(&self.snapshot_dir())?;

        Ok(())
    }

    /// Removes the snapshot file if present.
    pub fn remove_snapshot(&self) -> CoreResult<()> {
        let path = self.snapshot_path();
        if path.exists() {
            fs::remove_file(&path)?;
            sync_directory(&self.snapshot_dir())?;
        }
        Ok(())
    }

    /// Empties the compaction scratch directory and returns its path.
    pub fn reset_compact_dir(&self) -> CoreResult<PathBuf> {
        let compact = self.compact_dir();
        if compact.exists() {
            fs::remove_dir_all(&compact)?;
        }
        fs::create_dir_all(&compact)?;
        sync_directory(&self.path)?;
        Ok(compact)
    }

    /// Replaces the live segments with the compaction output.
    ///
    /// `segments` becomes `segments.old`, `compact` becomes `segments`, and
    /// `segments.old` is removed. A crash between the two renames is
    /// finished on the next [`EngineDir::open`].
    ///
    /// The compaction output's directory entries are made durable before
    /// anything old is touched.
    pub fn swap_in_compacted(&self) -> CoreResult<()> {
        sync_directory(&self.compact_dir())?;

        let old = self.old_segments_dir();
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }

        fs::rename(self.segments_dir(), &old)?;
        fs::rename(self.compact_dir(), self.segments_dir())?;
        sync_directory(&self.path)?;

        fs::remove_dir_all(&old)?;
        sync_directory(&self.path)?;

        Ok(())
    }

    /// Syncs the segments directory after a segment file is created.
    pub fn sync_segments_dir(&self) -> CoreResult<()> {
        sync_directory(&self.segments_dir())
    }

    fn recover_swap(&self) -> CoreResult<()> {
        let segments = self.segments_dir();
        let compact = self.compact_dir();
        let old = self.old_segments_dir();

        if !segments.exists() {
            if compact.exists() && old.exists() {
                info!(engine = %self.name, "finishing interrupted compaction swap");
                fs::rename(&compact, &segments)?;
            } else if old.exists() {
                warn!(engine = %self.name, "restoring segments from segments.old");
                fs::rename(&old, &segments)?;
            }
        }

        if segments.exists() {
            if old.exists() {
                fs::remove_dir_all(&old)?;
            }
            if compact.exists() {
                fs::remove_dir_all(&compact)?;
            }
        }

        Ok(())
    }
}

/// Fsyncs a directory so entry creations, renames and deletions are durable.
///
/// Windows NTFS journals metadata, so this is a no-op there.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordLocator;
    use tempfile::tempdir;

    #[test]
    fn open_creates_layout() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "users").unwrap();

        assert_eq!(dir.path(), root.path().join("users"));
        assert!(dir.segments_dir().is_dir());
        assert!(root.path().join("users/snapshot").is_dir());
        assert!(root.path().join("users/LOCK").exists());
        assert_eq!(dir.list_segments().unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn second_open_is_locked() {
        let root = tempdir().unwrap();
        let _dir = EngineDir::open(root.path(), "users").unwrap();

        assert!(matches!(
            EngineDir::open(root.path(), "users"),
            Err(CoreError::EngineLocked)
        ));
        // A different engine under the same root is independent.
        assert!(EngineDir::open(root.path(), "orders").is_ok());
    }

    #[test]
    fn lock_released_on_drop() {
        let root = tempdir().unwrap();
        drop(EngineDir::open(root.path(), "users").unwrap());
        assert!(EngineDir::open(root.path(), "users").is_ok());
    }

    #[test]
    fn segment_names() {
        assert_eq!(segment_file_name(0), "segment-000000.dat");
        assert_eq!(segment_file_name(42), "segment-000042.dat");
        assert_eq!(parse_segment_file_name("segment-000042.dat"), Some(42));
        assert_eq!(parse_segment_file_name("segment-1234567.dat"), Some(1_234_567));
        assert_eq!(parse_segment_file_name("segment-42.dat"), None);
        assert_eq!(parse_segment_file_name("segment-00004x.dat"), None);
        assert_eq!(parse_segment_file_name("other.dat"), None);
    }

    #[test]
    fn list_segments_sorted_and_ignores_tmp() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "e").unwrap();
        for n in [2, 0, 1] {
            File::create(dir.segment_path(n)).unwrap();
        }
        File::create(dir.segments_dir().join("segment-000003.dat.tmp")).unwrap();

        assert_eq!(dir.list_segments().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn list_segments_rejects_gap() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "e").unwrap();
        File::create(dir.segment_path(0)).unwrap();
        File::create(dir.segment_path(2)).unwrap();

        assert!(matches!(
            dir.list_segments(),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn list_segments_rejects_stray_file() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "e").unwrap();
        File::create(dir.segments_dir().join("notes.txt")).unwrap();

        assert!(matches!(
            dir.list_segments(),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn snapshot_save_load_remove() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "users").unwrap();
        assert!(dir.load_snapshot().unwrap().is_none());

        let snapshot = Snapshot::new(1, vec![("a".into(), RecordLocator::new(0, 0, 3))]);
        dir.save_snapshot(&snapshot).unwrap();

        assert!(dir.snapshot_path().ends_with("snapshot/state-users.snap"));
        assert!(!root.path().join("users/snapshot/state-users.snap.tmp").exists());
        assert_eq!(dir.load_snapshot().unwrap(), Some(snapshot));

        dir.remove_snapshot().unwrap();
        assert!(dir.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_file_is_reported() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "users").unwrap();
        fs::write(dir.snapshot_path(), b"garbage!").unwrap();

        assert!(matches!(
            dir.load_snapshot(),
            Err(CoreError::SnapshotCorrupted { .. })
        ));
    }

    #[test]
    fn swap_replaces_segments() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "e").unwrap();
        fs::write(dir.segment_path(0), b"old").unwrap();
        fs::write(dir.segment_path(1), b"old").unwrap();

        let compact = dir.reset_compact_dir().unwrap();
        fs::write(compact.join(segment_file_name(0)), b"new").unwrap();
        dir.swap_in_compacted().unwrap();

        assert_eq!(dir.list_segments().unwrap(), vec![0]);
        assert_eq!(fs::read(dir.segment_path(0)).unwrap(), b"new");
        assert!(!dir.compact_dir().exists());
        assert!(!root.path().join("e/segments.old").exists());
    }

    #[cfg(unix)]
    #[test]
    fn swap_syncs_output_before_moving_segments() {
        let root = tempdir().unwrap();
        let dir = EngineDir::open(root.path(), "e").unwrap();
        fs::write(dir.segment_path(0), b"old").unwrap();

        // No compaction output: the sync of compact/ fails first.
        assert!(dir.swap_in_compacted().is_err());
        assert_eq!(fs::read(dir.segment_path(0)).unwrap(), b"old");
        assert!(!root.path().join("e/segments.old").exists());
    }

    #[test]
    fn open_finishes_interrupted_swap() {
        let root = tempdir().unwrap();
        let engine = root.path().join("e");
        fs::create_dir_all(engine.join("segments.old")).unwrap();
        fs::create_dir_all(engine.join("compact")).unwrap();
        fs::write(engine.join("segments.old").join(segment_file_name(0)), b"old").unwrap();
        fs::write(engine.join("compact").join(segment_file_name(0)), b"new").unwrap();

        let dir = EngineDir::open(root.path(), "e").unwrap();
        assert_eq!(fs::read(dir.segment_path(0)).unwrap(), b"new");
        assert!(!engine.join("segments.old").exists());
        assert!(!engine.join("compact").exists());
    }

    #[test]
    fn open_restores_old_segments_without_compact_output() {
        let root = tempdir().unwrap();
        let engine = root.path().join("e");
        fs::create_dir_all(engine.join("segments.old")).unwrap();
        fs::write(engine.join("segments.old").join(segment_file_name(0)), b"old").unwrap();

        let dir = EngineDir::open(root.path(), "e").unwrap();
        assert_eq!(fs::read(dir.segment_path(0)).unwrap(), b"old");
    }

    #[test]
    fn open_discards_partial_compaction() {
        let root = tempdir().unwrap();
        let engine = root.path().join("e");
        fs::create_dir_all(engine.join("segments")).unwrap();
        fs::create_dir_all(engine.join("compact")).unwrap();
        fs::write(engine.join("segments").join(segment_file_name(0)), b"live").unwrap();
        fs::write(engine.join("compact").join(segment_file_name(0)), b"half").unwrap();

        let dir = EngineDir::open(root.path(), "e").unwrap();
        assert_eq!(fs::read(dir.segment_path(0)).unwrap(), b"live");
        assert!(!dir.compact_dir().exists());
    }
}
