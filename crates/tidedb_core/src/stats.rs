//! Engine statistics.
//!
//! Counters live in [`EngineCounters`] and are updated with atomics while
//! operations run. [`EngineStats`] is the plain point-in-time copy handed to
//! callers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters owned by an engine.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    /// Dead records (overwritten or deleted) since the last compaction.
    tombstones: AtomicU64,
    /// Keys ever inserted since open, net of rebuilds.
    write_ahead: AtomicU64,
    compactions: AtomicU64,
    snapshots: AtomicU64,
    last_compaction_bytes_reclaimed: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_overwrite(&self) {
        self.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.write_ahead.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, bytes_reclaimed: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.last_compaction_bytes_reclaimed
            .store(bytes_reclaimed, Ordering::Relaxed);
        self.tombstones.store(0, Ordering::Relaxed);
    }

    /// Sets both recovery-derived counters.
    pub(crate) fn reset(&self, tombstones: u64, write_ahead: u64) {
        self.tombstones.store(tombstones, Ordering::Relaxed);
        self.write_ahead.store(write_ahead, Ordering::Relaxed);
    }

    pub(crate) fn tombstones(&self) -> u64 {
        self.tombstones.load(Ordering::Relaxed)
    }

    pub(crate) fn write_ahead(&self) -> u64 {
        self.write_ahead.load(Ordering::Relaxed)
    }

    pub(crate) fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::Relaxed)
    }

    pub(crate) fn last_compaction_bytes_reclaimed(&self) -> u64 {
        self.last_compaction_bytes_reclaimed.load(Ordering::Relaxed)
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EngineStats {
    /// Live keys in the index.
    pub keys: u64,
    /// Dead records since the last compaction.
    pub tombstones: u64,
    /// Keys inserted (as opposed to overwritten).
    pub write_ahead: u64,
    /// Number of segment files.
    pub segments: u64,
    /// Number of the segment receiving appends.
    pub active_segment: u32,
    /// Total size of the segment files in bytes.
    pub disk_bytes: u64,
    /// Compactions completed since open.
    pub compactions: u64,
    /// Snapshots written since open.
    pub snapshots: u64,
    /// Bytes reclaimed by the most recent compaction.
    pub last_compaction_bytes_reclaimed: u64,
}

impl EngineStats {
    /// Fraction of records that are dead, in percent of live keys.
    #[must_use]
    pub fn tombstone_ratio_percent(&self) -> u64 {
        if self.keys == 0 {
            return if self.tombstones == 0 { 0 } else { 100 };
        }
        self.tombstones * 100 / self.keys
    }
}
