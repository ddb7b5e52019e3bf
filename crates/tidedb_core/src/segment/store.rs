//! A single segment: one append-only file plus its writer thread.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{
    encode_parts, Corruption, Record, RecordHeader, RecordStatus, RECORD_HEADER_SIZE,
};
use crate::segment::writer::{self, WriteCommand, WriterShared};
use crate::types::RecordLocator;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tidedb_storage::{FileBackend, StorageBackend};

/// Outcome of a full sequential scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Number of complete records visited.
    pub records: u64,
    /// Offset just past the last complete record.
    pub valid_len: u64,
    /// Whether an incomplete record was found at the end of the file.
    pub torn_tail: bool,
}

/// One append-only segment file.
///
/// A writable segment owns a background writer thread; a sealed segment has
/// none and only serves reads. Closing a segment stops appends but keeps it
/// readable until it is dropped.
pub struct Segment {
    number: u32,
    path: Option<PathBuf>,
    backend: Arc<dyn StorageBackend>,
    /// Logical size: advanced when bytes are queued, not when written.
    size: AtomicU64,
    sender: Mutex<Option<SyncSender<WriteCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<WriterShared>,
}

impl Segment {
    /// Opens (or creates) a writable segment file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the writer thread
    /// cannot be spawned.
    pub fn open(path: &Path, number: u32, queue_depth: usize) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        let mut segment = Self::with_backend(number, Arc::new(backend), queue_depth)?;
        segment.path = Some(path.to_path_buf());
        Ok(segment)
    }

    /// Opens an existing segment file for reads only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_sealed(path: &Path, number: u32) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        let mut segment = Self::sealed_with_backend(number, Arc::new(backend))?;
        segment.path = Some(path.to_path_buf());
        Ok(segment)
    }

    /// Wraps an arbitrary backend as a writable segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read or the writer
    /// thread cannot be spawned.
    pub fn with_backend(
        number: u32,
        backend: Arc<dyn StorageBackend>,
        queue_depth: usize,
    ) -> CoreResult<Self> {
        let segment = Self::sealed_with_backend(number, backend)?;
        let (tx, rx) = mpsc::sync_channel(queue_depth.max(1));
        let handle = {
            let backend = Arc::clone(&segment.backend);
            let shared = Arc::clone(&segment.shared);
            thread::Builder::new()
                .name(format!("tidedb-segment-{number:06}"))
                .spawn(move || writer::run(backend, rx, shared))?
        };
        *segment.sender.lock() = Some(tx);
        *segment.worker.lock() = Some(handle);
        Ok(segment)
    }

    /// Wraps an arbitrary backend as a read-only segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn sealed_with_backend(number: u32, backend: Arc<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            number,
            path: None,
            backend,
            size: AtomicU64::new(size),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            shared: Arc::new(WriterShared::new(number, size)),
        })
    }

    /// Segment number.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// File path, if this segment is file backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Logical size, including bytes still queued for the writer.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Whether the segment still accepts appends.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Queues `data` for the writer thread and returns its offset.
    ///
    /// Returns as soon as the bytes are queued. The logical size advances
    /// immediately.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SegmentClosed`] on a sealed or closed segment,
    /// or [`CoreError::WriterFailed`] if an earlier write failed.
    pub fn append(&self, data: Vec<u8>) -> CoreResult<u64> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(CoreError::SegmentClosed {
                segment: self.number,
            });
        };
        self.shared.check()?;

        let offset = self.size.fetch_add(data.len() as u64, Ordering::AcqRel);
        tx.send(WriteCommand::Append { offset, data })
            .map_err(|_| self.shared.failed("writer thread exited".into()))?;
        Ok(offset)
    }

    /// Reads `len` bytes at `offset`, waiting for queued writes that cover
    /// the range.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedRecord`] if the range lies past the end
    /// of the segment, or a storage error.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        let size = self.size();
        if end > size {
            return Err(self.corrupted(
                offset,
                Corruption::Truncated {
                    needed: len,
                    available: size.saturating_sub(offset) as usize,
                },
            ));
        }
        self.shared.wait_written(end)?;
        Ok(self.backend.read_at(offset, len)?)
    }

    /// Encodes and appends one record.
    ///
    /// The returned locator is what the index must store for `id`.
    ///
    /// # Errors
    ///
    /// Validation errors from the codec, or any [`Segment::append`] error.
    pub fn write_record(
        &self,
        id: &str,
        payload: &[u8],
        status: RecordStatus,
    ) -> CoreResult<RecordLocator> {
        let encoded = encode_parts(id, payload, status)?;
        let offset = self.append(encoded)?;
        Ok(RecordLocator::new(self.number, offset, payload.len() as u32))
    }

    /// Reads and verifies the live record `locator` points at.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedRecord`] on checksum mismatch, a
    /// different stored id, or a tombstone.
    pub fn read_record(&self, locator: &RecordLocator, id: &str) -> CoreResult<Record> {
        let len = RECORD_HEADER_SIZE + id.len() + locator.length as usize;
        let data = self.read_at(locator.offset, len)?;
        let record = Record::decode(&data).map_err(|kind| self.corrupted(locator.offset, kind))?;

        if record.id != id {
            return Err(self.corrupted(
                locator.offset,
                Corruption::IdMismatch {
                    expected: id.to_owned(),
                    found: record.id,
                },
            ));
        }
        if record.is_tombstone() {
            return Err(self.corrupted(locator.offset, Corruption::UnexpectedTombstone));
        }
        Ok(record)
    }

    /// Visits every record from the start of the segment.
    ///
    /// An incomplete record at the end of the file stops the scan and is
    /// reported through [`ScanSummary::torn_tail`]; a checksum mismatch or
    /// malformed record is an error.
    ///
    /// # Errors
    ///
    /// Corruption, storage errors, or any error returned by `visit`.
    pub fn scan<F>(&self, mut visit: F) -> CoreResult<ScanSummary>
    where
        F: FnMut(u64, Record) -> CoreResult<()>,
    {
        let size = self.size();
        let mut summary = ScanSummary {
            records: 0,
            valid_len: 0,
            torn_tail: false,
        };

        while summary.valid_len < size {
            let offset = summary.valid_len;
            if offset + RECORD_HEADER_SIZE as u64 > size {
                summary.torn_tail = true;
                break;
            }

            let header_bytes = self.read_at(offset, RECORD_HEADER_SIZE)?;
            let header =
                RecordHeader::parse(&header_bytes).map_err(|kind| self.corrupted(offset, kind))?;
            let record_len = header.record_len();
            if offset + record_len > size {
                summary.torn_tail = true;
                break;
            }

            let data = self.read_at(offset, record_len as usize)?;
            let record = Record::decode(&data).map_err(|kind| self.corrupted(offset, kind))?;
            visit(offset, record)?;

            summary.records += 1;
            summary.valid_len = offset + record_len;
        }

        Ok(summary)
    }

    /// Cuts the segment back to `len` bytes.
    ///
    /// Only valid on a sealed segment; used to drop a torn tail before the
    /// segment is reopened for writing.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidFormat`] on a writable segment, or a
    /// storage error.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        if self.is_writable() {
            return Err(CoreError::invalid_format(format!(
                "segment {} must be sealed before truncation",
                self.number
            )));
        }
        self.backend.truncate(len)?;
        self.size.store(len, Ordering::Release);
        Ok(())
    }

    /// Waits for queued writes and fsyncs the file.
    ///
    /// # Errors
    ///
    /// Returns the writer's failure, or a storage error.
    pub fn sync(&self) -> CoreResult<()> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                let (reply_tx, reply_rx) = mpsc::sync_channel(1);
                tx.send(WriteCommand::Sync(reply_tx))
                    .map_err(|_| self.shared.failed("writer thread exited".into()))?;
                drop(sender);
                reply_rx
                    .recv()
                    .map_err(|_| self.shared.failed("writer thread exited".into()))?
                    .map_err(|message| self.shared.failed(message))
            }
            None => {
                self.shared.check()?;
                Ok(self.backend.sync()?)
            }
        }
    }

    /// Stops accepting appends, drains the queue, fsyncs and joins the
    /// writer thread. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the writer's failure, or a storage error from the final sync.
    pub fn close(&self) -> CoreResult<()> {
        let sender = self.sender.lock().take();
        let Some(sender) = sender else {
            return Ok(());
        };
        drop(sender);

        if let Some(handle) = self.worker.lock().take() {
            handle
                .join()
                .map_err(|_| self.shared.failed("writer thread panicked".into()))?;
        }
        self.shared.check()?;
        self.backend.sync()?;
        Ok(())
    }

    fn corrupted(&self, offset: u64, kind: Corruption) -> CoreError {
        CoreError::CorruptedRecord {
            segment: self.number,
            offset,
            kind,
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(segment = self.number, error = %e, "segment close on drop failed");
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("number", &self.number)
            .field("path", &self.path)
            .field("size", &self.size())
            .field("written", &self.shared.written())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tidedb_storage::InMemoryBackend;

    fn memory_segment() -> (Arc<InMemoryBackend>, Segment) {
        let backend = Arc::new(InMemoryBackend::new());
        let segment = Segment::with_backend(0, backend.clone(), 8).unwrap();
        (backend, segment)
    }

    #[test]
    fn write_and_read_record() {
        let (_, segment) = memory_segment();

        let locator = segment
            .write_record("user:1", b"alice", RecordStatus::Active)
            .unwrap();
        assert_eq!(locator, RecordLocator::new(0, 0, 5));

        let record = segment.read_record(&locator, "user:1").unwrap();
        assert_eq!(record.payload, b"alice");
    }

    #[test]
    fn offsets_are_gap_free() {
        let (_, segment) = memory_segment();

        let a = segment.write_record("a", &[1; 10], RecordStatus::Active).unwrap();
        let b = segment.write_record("bb", &[2; 3], RecordStatus::Active).unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 11 + 1 + 10);
        assert_eq!(segment.size(), 22 + 11 + 2 + 3);
    }

    #[test]
    fn read_record_checks_id() {
        let (_, segment) = memory_segment();
        let locator = segment.write_record("abc", b"v", RecordStatus::Active).unwrap();

        let err = segment.read_record(&locator, "abd").unwrap_err();
        assert!(matches!(
            err,
            CoreError::CorruptedRecord {
                kind: Corruption::IdMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn read_record_detects_flipped_payload_byte() {
        let (backend, segment) = memory_segment();
        let locator = segment.write_record("k", b"value", RecordStatus::Active).unwrap();
        segment.sync().unwrap();

        backend.corrupt_byte(locator.offset + 11 + 1 + 2);

        let err = segment.read_record(&locator, "k").unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(
            err,
            CoreError::CorruptedRecord {
                kind: Corruption::ChecksumMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn scan_visits_records_in_order() {
        let (_, segment) = memory_segment();
        segment.write_record("a", b"1", RecordStatus::Active).unwrap();
        segment.write_record("b", b"2", RecordStatus::Active).unwrap();
        segment.write_record("a", b"", RecordStatus::Deleted).unwrap();

        let mut seen = Vec::new();
        let summary = segment
            .scan(|offset, record| {
                seen.push((offset, record.id, record.status));
                Ok(())
            })
            .unwrap();

        assert_eq!(summary.records, 3);
        assert!(!summary.torn_tail);
        assert_eq!(summary.valid_len, segment.size());
        assert_eq!(seen[0].2, RecordStatus::Active);
        assert_eq!(seen[2], (26, "a".to_string(), RecordStatus::Deleted));
    }

    #[test]
    fn scan_reports_torn_tail() {
        let full = Record::active("key", vec![7; 20]).encode().unwrap();
        let mut data = full.clone();
        data.extend_from_slice(&full[..15]);
        let backend = Arc::new(InMemoryBackend::with_data(data));
        let segment = Segment::sealed_with_backend(3, backend).unwrap();

        let summary = segment.scan(|_, _| Ok(())).unwrap();
        assert_eq!(summary.records, 1);
        assert!(summary.torn_tail);
        assert_eq!(summary.valid_len, full.len() as u64);

        segment.truncate(summary.valid_len).unwrap();
        assert_eq!(segment.size(), full.len() as u64);
    }

    #[test]
    fn scan_fails_on_checksum_mismatch() {
        let mut data = Record::active("key", vec![7; 20]).encode().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        let segment =
            Segment::sealed_with_backend(0, Arc::new(InMemoryBackend::with_data(data))).unwrap();

        assert!(segment.scan(|_, _| Ok(())).unwrap_err().is_corruption());
    }

    #[test]
    fn closed_segment_rejects_appends_but_serves_reads() {
        let (_, segment) = memory_segment();
        let locator = segment.write_record("k", b"v", RecordStatus::Active).unwrap();

        segment.close().unwrap();
        segment.close().unwrap();

        assert!(matches!(
            segment.append(vec![1]),
            Err(CoreError::SegmentClosed { segment: 0 })
        ));
        assert_eq!(segment.read_record(&locator, "k").unwrap().payload, b"v");
    }

    #[test]
    fn truncate_requires_sealed_segment() {
        let (_, segment) = memory_segment();
        assert!(matches!(
            segment.truncate(0),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn read_past_end_is_corruption() {
        let (_, segment) = memory_segment();
        segment.write_record("k", b"v", RecordStatus::Active).unwrap();
        let bogus = RecordLocator::new(0, 4, 100);
        assert!(segment.read_record(&bogus, "k").unwrap_err().is_corruption());
    }

    #[test]
    fn file_segment_persists_after_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment-000000.dat");

        let locator = {
            let segment = Segment::open(&path, 0, 16).unwrap();
            let locator = segment.write_record("doc", b"body", RecordStatus::Active).unwrap();
            segment.close().unwrap();
            locator
        };

        let segment = Segment::open_sealed(&path, 0).unwrap();
        assert!(!segment.is_writable());
        assert_eq!(segment.path(), Some(path.as_path()));
        assert_eq!(segment.read_record(&locator, "doc").unwrap().payload, b"body");
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let (_, segment) = memory_segment();
        let segment = Arc::new(segment);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let segment = Arc::clone(&segment);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| {
                            let id = format!("t{t}-{i}");
                            let locator = segment
                                .write_record(&id, id.as_bytes(), RecordStatus::Active)
                                .unwrap();
                            (id, locator)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for (id, locator) in handle.join().unwrap() {
                let record = segment.read_record(&locator, &id).unwrap();
                assert_eq!(record.payload, id.as_bytes());
            }
        }
        assert_eq!(segment.scan(|_, _| Ok(())).unwrap().records, 200);
    }
}
