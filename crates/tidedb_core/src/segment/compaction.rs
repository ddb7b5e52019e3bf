//! Segment compaction.
//!
//! Compaction rewrites only the live records into a fresh run of segment
//! files, which physically drops tombstones and overwritten versions. This
//! module performs the rewrite into a scratch directory; swapping the result
//! into place is the engine's job.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state: every live key reads back
//!   the same payload afterwards
//! - Every rewritten record is Active
//! - Output order is sorted by key, so the same live set always produces the
//!   same files

use crate::dir::segment_file_name;
use crate::error::{CoreError, CoreResult};
use crate::segment::record::{encoded_len, RecordStatus};
use crate::segment::store::Segment;
use crate::types::RecordLocator;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Result of a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Live records rewritten.
    pub live_records: usize,
    /// Dead entries (overwrites and deletes) that were dropped.
    pub tombstones_dropped: u64,
    /// Segment files before compaction.
    pub segments_before: usize,
    /// Segment files after compaction.
    pub segments_after: usize,
    /// Segment bytes before compaction.
    pub bytes_before: u64,
    /// Segment bytes after compaction.
    pub bytes_after: u64,
}

impl CompactionResult {
    /// Bytes freed by the compaction.
    #[must_use]
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Output of [`Compactor::rewrite`].
#[derive(Debug)]
pub struct Rewrite {
    /// Index over the rewritten segments.
    pub index: HashMap<String, RecordLocator>,
    /// Number of segment files written, numbered from 0.
    pub segment_count: u32,
    /// Total bytes written.
    pub bytes_written: u64,
}

/// Rewrites live records into new segments.
///
/// ## Example
///
/// ```ignore
/// let compactor = Compactor::new(config.max_segment_size, config.writer_queue_depth);
/// let rewrite = compactor.rewrite(live_entries, &segments, &scratch_dir)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    max_segment_size: u64,
    queue_depth: usize,
}

impl Compactor {
    /// Creates a compactor that rotates output files at `max_segment_size`.
    #[must_use]
    pub fn new(max_segment_size: u64, queue_depth: usize) -> Self {
        Self {
            max_segment_size,
            queue_depth,
        }
    }

    /// Copies each live record from `sources` into new segment files under
    /// `target`.
    ///
    /// `sources` must be indexed by segment number. Every source record is
    /// re-read and verified. All output files are closed (drained and
    /// synced) before this returns.
    ///
    /// # Errors
    ///
    /// Corruption in a source record, a locator naming an unknown segment,
    /// or I/O errors. On error the sources are untouched.
    pub fn rewrite(
        &self,
        mut entries: Vec<(String, RecordLocator)>,
        sources: &[Arc<Segment>],
        target: &Path,
    ) -> CoreResult<Rewrite> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut number = 0u32;
        let mut current = self.open_output(target, number)?;
        let mut index = HashMap::with_capacity(entries.len());
        let mut bytes_written = 0u64;

        for (key, locator) in entries {
            let source = sources
                .get(locator.segment as usize)
                .filter(|s| s.number() == locator.segment)
                .ok_or_else(|| {
                    CoreError::invalid_format(format!(
                        "key {key:?} points at missing segment {}",
                        locator.segment
                    ))
                })?;
            let record = source.read_record(&locator, &key)?;

            let len = encoded_len(key.len(), record.payload.len())?;
            if current.size() > 0 && current.size() + len > self.max_segment_size {
                current.close()?;
                number += 1;
                current = self.open_output(target, number)?;
            }

            let rewritten = current.write_record(&key, &record.payload, RecordStatus::Active)?;
            bytes_written += len;
            index.insert(key, rewritten);
        }

        current.close()?;

        Ok(Rewrite {
            index,
            segment_count: number + 1,
            bytes_written,
        })
    }

    fn open_output(&self, target: &Path, number: u32) -> CoreResult<Segment> {
        Segment::open(
            &target.join(segment_file_name(number)),
            number,
            self.queue_depth,
        )
    }
}
