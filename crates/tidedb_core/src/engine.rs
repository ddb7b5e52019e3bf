//! The storage engine.
//!
//! An [`Engine`] owns one directory of segment files, the in-memory index
//! mapping every live key to its [`RecordLocator`], and the counters that
//! drive compaction.
//!
//! ## Locking
//!
//! - The append mutex serializes everything that hands out offsets: writes,
//!   rotation, snapshots, compaction and rebuilds.
//! - The index and the segment list each have a reader/writer lock. Anything
//!   that needs both takes the index lock first.
//! - Reads never take the append mutex, so a `get` proceeds while a write is
//!   in flight.

use crate::codec::{decode_value, encode_value};
use crate::config::Config;
use crate::dir::EngineDir;
use crate::error::{CoreError, CoreResult};
use crate::segment::{
    encoded_len, validate_id, CompactionResult, Compactor, Record, RecordStatus, Segment,
};
use crate::snapshot::{Snapshot, SnapshotCounters};
use crate::stats::{EngineCounters, EngineStats};
use crate::types::RecordLocator;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A log-structured key/value engine.
///
/// # Thread Safety
///
/// `Engine` is `Send + Sync`; share it behind an `Arc` (see
/// [`crate::EngineRegistry`]). Dropping it closes it.
///
/// # Example
///
/// ```rust,ignore
/// use tidedb_core::Engine;
///
/// let engine = Engine::open(Path::new("data"), "users", false)?;
/// engine.put("alice", &user)?;
/// let user: Option<User> = engine.get("alice")?;
/// ```
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    dir: EngineDir,
    config: Config,
    append: Mutex<AppendState>,
    /// Indexed by segment number.
    segments: RwLock<Vec<Arc<Segment>>>,
    index: RwLock<HashMap<String, RecordLocator>>,
    counters: EngineCounters,
    compaction: Mutex<Option<JoinHandle<()>>>,
    compacting: AtomicBool,
    closed: AtomicBool,
}

struct AppendState {
    active: Arc<Segment>,
}

/// Index rebuilt from replayed records.
#[derive(Default)]
struct Replay {
    index: HashMap<String, RecordLocator>,
    tombstones: u64,
    write_ahead: u64,
}

impl Replay {
    fn apply(&mut self, segment: u32, offset: u64, record: Record) {
        match record.status {
            RecordStatus::Active => {
                let locator = RecordLocator::new(segment, offset, record.payload.len() as u32);
                if self.index.insert(record.id, locator).is_some() {
                    self.tombstones += 1;
                } else {
                    self.write_ahead += 1;
                }
            }
            RecordStatus::Deleted => {
                self.index.remove(&record.id);
                self.tombstones += 1;
            }
        }
    }
}

impl Engine {
    /// Opens (or creates) the engine `name` under `path`.
    ///
    /// Configuration comes from the environment (see
    /// [`Config::from_env`]); `debug` overrides `TIDEDB_DEBUG`.
    ///
    /// # Errors
    ///
    /// Configuration errors, `EngineLocked` if the engine is already open,
    /// corruption found during recovery, or I/O errors.
    pub fn open(path: &Path, name: &str, debug: bool) -> CoreResult<Self> {
        let config = Config::from_env()?.debug(debug);
        Self::open_with_config(path, name, config)
    }

    /// Opens (or creates) the engine `name` under `path` with an explicit
    /// configuration.
    ///
    /// Recovery loads the snapshot, if any, and replays every segment it
    /// does not cover. An incomplete record at the end of the last segment
    /// is cut off; anywhere else it is an error.
    ///
    /// # Errors
    ///
    /// See [`Engine::open`].
    pub fn open_with_config(path: &Path, name: &str, config: Config) -> CoreResult<Self> {
        config.validate()?;
        validate_name(name)?;
        let started = Instant::now();

        let dir = EngineDir::open(path, name)?;
        let mut numbers = dir.list_segments()?;
        if numbers.is_empty() {
            File::create(dir.segment_path(0))?;
            dir.sync_segments_dir()?;
            numbers.push(0);
        }
        let last = numbers.len() as u32 - 1;

        let mut segments = numbers
            .iter()
            .map(|&n| Segment::open_sealed(&dir.segment_path(n), n).map(Arc::new))
            .collect::<CoreResult<Vec<_>>>()?;

        let (mut replay, boundary) = match dir.load_snapshot()? {
            None => (Replay::default(), 0),
            Some(snapshot) => restore_snapshot(snapshot, &segments, last)?,
        };

        for segment in &segments[boundary as usize..] {
            let number = segment.number();
            let summary = segment.scan(|offset, record| {
                replay.apply(number, offset, record);
                Ok(())
            })?;
            if summary.torn_tail {
                if number != last {
                    return Err(CoreError::invalid_format(format!(
                        "segment {number} has an incomplete record at offset {} but is not the last segment",
                        summary.valid_len
                    )));
                }
                warn!(
                    engine = %name,
                    segment = number,
                    valid_len = summary.valid_len,
                    size = segment.size(),
                    "truncating incomplete record at end of segment"
                );
                segment.truncate(summary.valid_len)?;
            }
        }

        let active = Arc::new(Segment::open(
            &dir.segment_path(last),
            last,
            config.writer_queue_depth,
        )?);
        segments[last as usize] = Arc::clone(&active);

        let counters = EngineCounters::new();
        counters.reset(replay.tombstones, replay.write_ahead);

        info!(
            engine = %name,
            keys = replay.index.len(),
            segments = segments.len(),
            replayed_from = boundary,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                name: name.to_owned(),
                dir,
                config,
                append: Mutex::new(AppendState { active }),
                segments: RwLock::new(segments),
                index: RwLock::new(replay.index),
                counters,
                compaction: Mutex::new(None),
                compacting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Engine directory (`path/name`).
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.dir.path()
    }

    /// Configuration the engine was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Serializes `value` as CBOR and stores it under `id`.
    ///
    /// # Errors
    ///
    /// See [`Engine::put_raw`], plus [`CoreError::Codec`].
    pub fn put<T: Serialize + ?Sized>(&self, id: &str, value: &T) -> CoreResult<RecordLocator> {
        let payload = encode_value(value)?;
        self.put_raw(id, &payload)
    }

    /// Stores `payload` under `id`, replacing any previous value.
    ///
    /// Returns once the record is queued and indexed, or synced as well when
    /// `sync_on_write` is set.
    ///
    /// # Errors
    ///
    /// Validation errors before any I/O, `EngineClosed`, or write failures.
    /// On failure the index is unchanged.
    pub fn put_raw(&self, id: &str, payload: &[u8]) -> CoreResult<RecordLocator> {
        validate_id(id)?;
        let record_len = encoded_len(id.len(), payload.len())?;
        let inner = &self.inner;

        let (locator, overwrite) = {
            let mut append = inner.append.lock();
            inner.ensure_open()?;
            inner.rotate_if_needed(&mut append, record_len)?;

            let locator = append
                .active
                .write_record(id, payload, RecordStatus::Active)?;
            if inner.config.sync_on_write {
                append.active.sync()?;
            }

            let previous = inner.index.write().insert(id.to_owned(), locator);
            if previous.is_some() {
                inner.counters.record_overwrite();
            } else {
                inner.counters.record_insert();
            }
            (locator, previous.is_some())
        };

        if inner.config.debug {
            debug!(engine = %inner.name, id, %locator, overwrite, "put");
        }
        inner.maybe_schedule_compaction();
        Ok(locator)
    }

    /// Reads and deserializes the value stored under `id`.
    ///
    /// # Errors
    ///
    /// See [`Engine::get_raw`], plus [`CoreError::Codec`].
    pub fn get<T: DeserializeOwned>(&self, id: &str) -> CoreResult<Option<T>> {
        match self.get_raw(id)? {
            Some(payload) => decode_value(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the payload stored under `id`.
    ///
    /// An absent key is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `CorruptedRecord` if the record fails verification, `EngineClosed`,
    /// or I/O errors.
    pub fn get_raw(&self, id: &str) -> CoreResult<Option<Vec<u8>>> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let (locator, segment) = {
            let index = inner.index.read();
            let Some(locator) = index.get(id).copied() else {
                if inner.config.debug {
                    debug!(engine = %inner.name, id, "get: not found");
                }
                return Ok(None);
            };
            let segments = inner.segments.read();
            (locator, segment_for(&segments, &locator)?)
        };

        let record = segment.read_record(&locator, id)?;
        if inner.config.debug {
            debug!(engine = %inner.name, id, %locator, "get");
        }
        Ok(Some(record.payload))
    }

    /// Deletes `id` by appending a tombstone.
    ///
    /// Returns `false`, without any I/O, if the key is absent.
    ///
    /// # Errors
    ///
    /// Validation errors, `EngineClosed`, or write failures.
    pub fn delete(&self, id: &str) -> CoreResult<bool> {
        validate_id(id)?;
        let inner = &self.inner;

        let deleted = {
            let mut append = inner.append.lock();
            inner.ensure_open()?;

            if inner.index.read().contains_key(id) {
                inner.rotate_if_needed(&mut append, encoded_len(id.len(), 0)?)?;
                append.active.write_record(id, &[], RecordStatus::Deleted)?;
                if inner.config.sync_on_write {
                    append.active.sync()?;
                }
                inner.index.write().remove(id);
                inner.counters.record_overwrite();
                true
            } else {
                false
            }
        };

        if inner.config.debug {
            debug!(engine = %inner.name, id, deleted, "delete");
        }
        if deleted {
            inner.maybe_schedule_compaction();
        }
        Ok(deleted)
    }

    /// Visits every live record on `workers` threads.
    ///
    /// The key set is captured when the call starts and split round-robin
    /// across the workers. Returning `false` from `callback` stops only the
    /// worker that received it; the others run to the end of their share.
    ///
    /// # Errors
    ///
    /// The first error any worker hit, typically `CorruptedRecord`.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from `callback`.
    pub fn iterate<F>(&self, callback: F, workers: usize) -> CoreResult<()>
    where
        F: Fn(&str, &[u8]) -> bool + Sync,
    {
        let inner = &self.inner;
        inner.ensure_open()?;

        let (entries, segments) = {
            let index = inner.index.read();
            let segments = inner.segments.read();
            let entries: Vec<(String, RecordLocator)> =
                index.iter().map(|(k, v)| (k.clone(), *v)).collect();
            (entries, segments.clone())
        };

        let workers = workers.max(1);
        if inner.config.debug {
            debug!(engine = %inner.name, keys = entries.len(), workers, "iterate");
        }

        let mut partitions: Vec<Vec<(String, RecordLocator)>> =
            (0..workers).map(|_| Vec::new()).collect();
        for (i, entry) in entries.into_iter().enumerate() {
            partitions[i % workers].push(entry);
        }

        let callback = &callback;
        let segments = &segments;
        thread::scope(|scope| -> CoreResult<()> {
            let mut handles = Vec::with_capacity(workers);
            for (n, partition) in partitions.into_iter().enumerate() {
                if partition.is_empty() {
                    continue;
                }
                let handle = thread::Builder::new()
                    .name(format!("tidedb-iterate-{n}"))
                    .spawn_scoped(scope, move || -> CoreResult<()> {
                        for (key, locator) in partition {
                            let segment = segment_for(segments, &locator)?;
                            let record = segment.read_record(&locator, &key)?;
                            if !callback(&key, &record.payload) {
                                break;
                            }
                        }
                        Ok(())
                    })?;
                handles.push(handle);
            }

            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        first_error.get_or_insert(err);
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    /// Number of live keys.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.index.read().len()
    }

    /// Whether `id` is a live key.
    #[must_use]
    pub fn is_exist(&self, id: &str) -> bool {
        self.inner.index.read().contains_key(id)
    }

    /// Waits for queued writes and fsyncs the active segment.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, or the writer's failure.
    pub fn sync(&self) -> CoreResult<()> {
        let append = self.inner.append.lock();
        self.inner.ensure_open()?;
        append.active.sync()
    }

    /// Returns a point-in-time copy of the engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let keys = inner.index.read().len() as u64;
        let segments = inner.segments.read();

        EngineStats {
            keys,
            tombstones: inner.counters.tombstones(),
            write_ahead: inner.counters.write_ahead(),
            segments: segments.len() as u64,
            active_segment: segments.last().map_or(0, |s| s.number()),
            disk_bytes: segments.iter().map(|s| s.size()).sum(),
            compactions: inner.counters.compactions(),
            snapshots: inner.counters.snapshots(),
            last_compaction_bytes_reclaimed: inner.counters.last_compaction_bytes_reclaimed(),
        }
    }

    /// Writes a snapshot of every index entry outside the active segment.
    ///
    /// # Errors
    ///
    /// `EngineClosed` or I/O errors.
    pub fn create_snapshot(&self) -> CoreResult<()> {
        let append = self.inner.append.lock();
        self.inner.ensure_open()?;
        self.inner.write_snapshot(append.active.number())
    }

    /// Rewrites live records into fresh segments, dropping dead ones.
    ///
    /// Writers block for the whole compaction.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, corruption in a live record, or I/O errors. A failure
    /// before the directory swap leaves the original segments in place.
    pub fn compact(&self) -> CoreResult<CompactionResult> {
        self.inner.compact()
    }

    /// Compacts, then rebuilds the index by replaying every segment.
    ///
    /// # Errors
    ///
    /// See [`Engine::compact`] and [`Engine::rebuild_indexes`].
    pub fn prune(&self) -> CoreResult<CompactionResult> {
        let inner = &self.inner;
        let mut append = inner.append.lock();
        inner.ensure_open()?;
        let result = inner.compact_locked(&mut append)?;
        inner.rebuild_locked(&append)?;
        Ok(result)
    }

    /// Rebuilds the index and counters by replaying every segment from the
    /// first, then writes a fresh snapshot.
    ///
    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, `CorruptedRecord` for any damaged record, or I/O
    /// errors.
    pub fn rebuild_indexes(&self) -> CoreResult<usize> {
        let append = self.inner.append.lock();
        self.inner.ensure_open()?;
        self.inner.rebuild_locked(&append)
    }

    /// Clears the in-memory index and counters.
    ///
    /// Segment files are untouched. Until the next snapshot the records come
    /// back on reopen or [`Engine::rebuild_indexes`]. Any later snapshot
    /// (rotation, [`Engine::create_snapshot`], compaction) records the
    /// emptied index, after which they stay gone on reopen; compaction also
    /// drops them from disk.
    pub fn empty(&self) {
        let _append = self.inner.append.lock();
        self.inner.index.write().clear();
        self.inner.counters.reset(0, 0);
        if self.inner.config.debug {
            debug!(engine = %self.inner.name, "index emptied");
        }
    }

    /// Closes the engine.
    ///
    /// Waits for a running background compaction, drains and syncs the
    /// active segment. Later operations fail with `EngineClosed`.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// The active segment's writer failure, or a final sync error.
    pub fn close(&self) -> CoreResult<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let compaction = inner.compaction.lock().take();
        if let Some(handle) = compaction {
            if handle.join().is_err() {
                warn!(engine = %inner.name, "background compaction panicked");
            }
        }

        let append = inner.append.lock();
        append.active.close()?;
        info!(engine = %inner.name, "engine closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(engine = %self.inner.name, error = %err, "failed to close engine");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.name)
            .field("path", &self.inner.dir.path())
            .field("keys", &self.count())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::EngineClosed);
        }
        Ok(())
    }

    /// Starts a new active segment when `record_len` more bytes would push
    /// the current one past the maximum size.
    ///
    /// An empty segment always takes the record, however large.
    fn rotate_if_needed(&self, append: &mut AppendState, record_len: u64) -> CoreResult<()> {
        let size = append.active.size();
        if size == 0 || size + record_len <= self.config.max_segment_size {
            return Ok(());
        }

        let next = append.active.number() + 1;
        let segment = Arc::new(Segment::open(
            &self.dir.segment_path(next),
            next,
            self.config.writer_queue_depth,
        )?);
        self.dir.sync_segments_dir()?;
        append.active.close()?;

        self.segments.write().push(Arc::clone(&segment));
        append.active = segment;

        info!(engine = %self.name, segment = next, "rotated to new segment");
        self.write_snapshot(next)
    }

    /// Must be called with the append mutex held; `boundary` is the active
    /// segment number.
    fn write_snapshot(&self, boundary: u32) -> CoreResult<()> {
        let (entries, uncovered) = {
            let index = self.index.read();
            let entries: Vec<(String, RecordLocator)> = index
                .iter()
                .filter(|(_, locator)| locator.segment < boundary)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            (entries, self.uncovered_counts(&index, boundary)?)
        };
        let count = entries.len();
        let counters = SnapshotCounters {
            tombstones: self
                .counters
                .tombstones()
                .saturating_sub(uncovered.tombstones),
            write_ahead: self
                .counters
                .write_ahead()
                .saturating_sub(uncovered.write_ahead),
        };

        let snapshot = Snapshot::new(boundary, entries).with_counters(counters);
        self.dir.save_snapshot(&snapshot)?;
        self.counters.record_snapshot();

        if self.config.debug {
            debug!(engine = %self.name, boundary, entries = count, "snapshot written");
        }
        Ok(())
    }

    /// What replaying the segments from `boundary` on top of the covered
    /// index adds to the counters. Recovery adds it back.
    fn uncovered_counts(
        &self,
        index: &HashMap<String, RecordLocator>,
        boundary: u32,
    ) -> CoreResult<SnapshotCounters> {
        let segments = self.segments.read();
        let mut live: HashMap<String, bool> = HashMap::new();
        let mut counts = SnapshotCounters::default();

        for segment in segments.iter().skip(boundary as usize) {
            segment.scan(|_, record| {
                let was_live = match live.get(&record.id) {
                    Some(&state) => state,
                    None => index
                        .get(&record.id)
                        .is_some_and(|locator| locator.segment < boundary),
                };
                match record.status {
                    RecordStatus::Active => {
                        if was_live {
                            counts.tombstones += 1;
                        } else {
                            counts.write_ahead += 1;
                        }
                        live.insert(record.id, true);
                    }
                    RecordStatus::Deleted => {
                        counts.tombstones += 1;
                        live.insert(record.id, false);
                    }
                }
                Ok(())
            })?;
        }
        Ok(counts)
    }

    fn compact(&self) -> CoreResult<CompactionResult> {
        let mut append = self.append.lock();
        self.ensure_open()?;
        self.compact_locked(&mut append)
    }

    fn compact_locked(&self, append: &mut AppendState) -> CoreResult<CompactionResult> {
        let started = Instant::now();

        let (entries, sources) = {
            let index = self.index.read();
            let segments = self.segments.read();
            let entries: Vec<(String, RecordLocator)> =
                index.iter().map(|(k, v)| (k.clone(), *v)).collect();
            (entries, segments.clone())
        };
        let segments_before = sources.len();
        let bytes_before: u64 = sources.iter().map(|s| s.size()).sum();
        let tombstones_dropped = self.counters.tombstones();

        let scratch = self.dir.reset_compact_dir()?;
        let rewrite = Compactor::new(self.config.max_segment_size, self.config.writer_queue_depth)
            .rewrite(entries, &sources, &scratch)?;

        // The old snapshot names old locations.
        self.dir.remove_snapshot()?;
        for segment in &sources {
            segment.close()?;
        }
        self.dir.swap_in_compacted()?;

        let last = rewrite.segment_count - 1;
        let mut segments = Vec::with_capacity(rewrite.segment_count as usize);
        for number in 0..last {
            segments.push(Arc::new(Segment::open_sealed(
                &self.dir.segment_path(number),
                number,
            )?));
        }
        let active = Arc::new(Segment::open(
            &self.dir.segment_path(last),
            last,
            self.config.writer_queue_depth,
        )?);
        segments.push(Arc::clone(&active));

        let live_records = rewrite.index.len();
        {
            let mut index = self.index.write();
            let mut list = self.segments.write();
            *index = rewrite.index;
            *list = segments;
        }
        append.active = active;

        let result = CompactionResult {
            live_records,
            tombstones_dropped,
            segments_before,
            segments_after: rewrite.segment_count as usize,
            bytes_before,
            bytes_after: rewrite.bytes_written,
        };
        self.counters.record_compaction(result.bytes_reclaimed());
        self.write_snapshot(last)?;

        info!(
            engine = %self.name,
            live_records,
            tombstones_dropped,
            segments_before,
            segments_after = result.segments_after,
            bytes_reclaimed = result.bytes_reclaimed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(result)
    }

    fn rebuild_locked(&self, append: &AppendState) -> CoreResult<usize> {
        let started = Instant::now();
        let segments = self.segments.read().clone();

        let mut replay = Replay::default();
        for segment in &segments {
            let number = segment.number();
            let summary = segment.scan(|offset, record| {
                replay.apply(number, offset, record);
                Ok(())
            })?;
            if summary.torn_tail {
                return Err(CoreError::invalid_format(format!(
                    "segment {number} has an incomplete record at offset {}",
                    summary.valid_len
                )));
            }
        }

        let keys = replay.index.len();
        *self.index.write() = replay.index;
        self.counters.reset(replay.tombstones, replay.write_ahead);
        self.write_snapshot(append.active.number())?;

        info!(
            engine = %self.name,
            keys,
            segments = segments.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt"
        );
        Ok(keys)
    }

    /// Spawns a background compaction when dead records exceed the
    /// configured share of live keys and none is running.
    fn maybe_schedule_compaction(self: &Arc<Self>) {
        if !self.config.auto_compact {
            return;
        }
        let count = self.index.read().len() as u64;
        let tombstones = self.counters.tombstones();
        if tombstones * 100 <= count * self.config.compaction_threshold_percent {
            return;
        }

        let mut slot = self.compaction.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self
            .compacting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(finished) = slot.take() {
            let _ = finished.join();
        }

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("tidedb-compact-{}", self.name))
            .spawn(move || {
                match inner.compact() {
                    Ok(_) | Err(CoreError::EngineClosed) => {}
                    Err(err) => {
                        warn!(engine = %inner.name, error = %err, "background compaction failed");
                    }
                }
                inner.compacting.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(err) => {
                self.compacting.store(false, Ordering::Release);
                warn!(engine = %self.name, error = %err, "could not start background compaction");
            }
        }
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(CoreError::invalid_config(format!(
            "invalid engine name {name:?}"
        )));
    }
    Ok(())
}

fn segment_for(segments: &[Arc<Segment>], locator: &RecordLocator) -> CoreResult<Arc<Segment>> {
    segments
        .get(locator.segment as usize)
        .cloned()
        .ok_or_else(|| {
            CoreError::invalid_format(format!(
                "locator {locator} names missing segment {}",
                locator.segment
            ))
        })
}

/// Seeds the replay from a snapshot and returns the first segment to scan.
fn restore_snapshot(
    snapshot: Snapshot,
    segments: &[Arc<Segment>],
    last: u32,
) -> CoreResult<(Replay, u32)> {
    let boundary = snapshot.boundary.unwrap_or(last);
    if boundary > last {
        return Err(CoreError::invalid_snapshot(format!(
            "snapshot covers segments below {boundary} but the last segment is {last}"
        )));
    }

    let mut index = HashMap::with_capacity(snapshot.entries.len());
    for (key, locator) in snapshot.entries {
        if locator.segment >= boundary {
            return Err(CoreError::invalid_snapshot(format!(
                "entry {key:?} at {locator} is not below boundary {boundary}"
            )));
        }
        let record_len = encoded_len(key.len(), locator.length as usize)
            .map_err(|err| CoreError::invalid_snapshot(format!("entry {key:?}: {err}")))?;
        if locator.offset + record_len > segments[locator.segment as usize].size() {
            return Err(CoreError::invalid_snapshot(format!(
                "entry {key:?} at {locator} lies past the end of its segment"
            )));
        }
        index.insert(key, locator);
    }

    let counters = snapshot.counters.unwrap_or(SnapshotCounters {
        tombstones: 0,
        write_ahead: index.len() as u64,
    });
    Ok((
        Replay {
            index,
            tombstones: counters.tombstones,
            write_ahead: counters.write_ahead,
        },
        boundary,
    ))
}
