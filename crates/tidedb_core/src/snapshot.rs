//! Index snapshots.
//!
//! A snapshot is a checkpoint of the live index that bounds recovery: only
//! segments at or after the snapshot's *boundary* have to be replayed on
//! open.
//!
//! ## Format
//!
//! ```text
//! | magic "TDSN" (4) | version (2) | boundary (4, v2+) |
//! | tombstones (8, v3) | write_ahead (8, v3) | count (8) |
//! | count x ( key_len (2) | key | segment (4) | offset (8) | length (4) ) |
//! | crc32c (4) over everything before it |
//! ```
//!
//! All integers are big-endian. Version 1 files carry no boundary; for them
//! the boundary is the last segment on disk. Version 3 adds the counters as
//! they stand for the covered segments, so replaying the rest brings them
//! back to their values at close.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordLocator;

/// Magic bytes for snapshot files.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TDSN";

/// Snapshot format written by this version.
pub const SNAPSHOT_VERSION: u16 = 3;

const CRC_SIZE: usize = 4;
const ENTRY_FIXED_SIZE: usize = 2 + 4 + 8 + 4;

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// First segment number not covered. `None` for version 1 files.
    pub boundary: Option<u32>,
    /// Covered index entries.
    pub entries: Vec<(String, RecordLocator)>,
    /// Counters for the covered segments. `None` before version 3.
    pub counters: Option<SnapshotCounters>,
}

/// Engine counters excluding the contribution of uncovered segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotCounters {
    /// Dead records.
    pub tombstones: u64,
    /// Inserted keys.
    pub write_ahead: u64,
}

impl Snapshot {
    /// Creates a snapshot covering every segment below `boundary`.
    #[must_use]
    pub fn new(boundary: u32, entries: Vec<(String, RecordLocator)>) -> Self {
        Self {
            boundary: Some(boundary),
            entries,
            counters: None,
        }
    }

    /// Attaches counters, making this a version 3 snapshot.
    #[must_use]
    pub fn with_counters(mut self, counters: SnapshotCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Encodes the snapshot in the newest version its fields allow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if a key is longer than a `u16`
    /// length prefix allows.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let keys: usize = self.entries.iter().map(|(k, _)| k.len()).sum();
        let mut buf =
            Vec::with_capacity(34 + keys + self.entries.len() * ENTRY_FIXED_SIZE + CRC_SIZE);

        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        match (self.boundary, self.counters) {
            (Some(boundary), Some(counters)) => {
                buf.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
                buf.extend_from_slice(&boundary.to_be_bytes());
                buf.extend_from_slice(&counters.tombstones.to_be_bytes());
                buf.extend_from_slice(&counters.write_ahead.to_be_bytes());
            }
            (Some(boundary), None) => {
                buf.extend_from_slice(&2u16.to_be_bytes());
                buf.extend_from_slice(&boundary.to_be_bytes());
            }
            (None, _) => buf.extend_from_slice(&1u16.to_be_bytes()),
        }
        buf.extend_from_slice(&(self.entries.len() as u64).to_be_bytes());

        for (key, locator) in &self.entries {
            let key_len = u16::try_from(key.len())
                .map_err(|_| CoreError::invalid_id(format!("key of {} bytes", key.len())))?;
            buf.extend_from_slice(&key_len.to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&locator.segment.to_be_bytes());
            buf.extend_from_slice(&locator.offset.to_be_bytes());
            buf.extend_from_slice(&locator.length.to_be_bytes());
        }

        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());

        Ok(buf)
    }

    /// Decodes a snapshot.
    ///
    /// The trailing checksum is verified before anything else is trusted.
    ///
    /// # Errors
    ///
    /// [`CoreError::SnapshotCorrupted`] for a checksum mismatch or
    /// truncated body, [`CoreError::InvalidSnapshot`] for a bad magic or
    /// unknown version.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < CRC_SIZE {
            return Err(CoreError::snapshot_corrupted("file shorter than its checksum"));
        }
        let (body, trailer) = data.split_at(data.len() - CRC_SIZE);
        let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc32c::crc32c(body);
        if stored != computed {
            return Err(CoreError::snapshot_corrupted(format!(
                "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            )));
        }

        let mut cursor = Cursor::new(body);

        if cursor.take(4)? != SNAPSHOT_MAGIC {
            return Err(CoreError::invalid_snapshot("bad magic"));
        }

        let version = cursor.u16()?;
        let (boundary, counters) = match version {
            1 => (None, None),
            2 => (Some(cursor.u32()?), None),
            3 => {
                let boundary = cursor.u32()?;
                let counters = SnapshotCounters {
                    tombstones: cursor.u64()?,
                    write_ahead: cursor.u64()?,
                };
                (Some(boundary), Some(counters))
            }
            other => {
                return Err(CoreError::invalid_snapshot(format!(
                    "unsupported version {other}"
                )))
            }
        };

        let count = cursor.u64()?;
        if count > (body.len() / ENTRY_FIXED_SIZE) as u64 {
            return Err(CoreError::snapshot_corrupted(format!(
                "entry count {count} exceeds file size"
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = cursor.u16()? as usize;
            let key = std::str::from_utf8(cursor.take(key_len)?)
                .map_err(|_| CoreError::snapshot_corrupted("key is not valid UTF-8"))?
                .to_owned();
            let segment = cursor.u32()?;
            let offset = cursor.u64()?;
            let length = cursor.u32()?;
            entries.push((key, RecordLocator::new(segment, offset, length)));
        }

        if !cursor.is_empty() {
            return Err(CoreError::snapshot_corrupted("trailing bytes after entries"));
        }

        Ok(Self {
            boundary,
            entries,
            counters,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::snapshot_corrupted("unexpected end of snapshot"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::new(
            3,
            vec![
                ("alpha".into(), RecordLocator::new(0, 0, 12)),
                ("beta".into(), RecordLocator::new(2, 4096, 0)),
            ],
        )
    }

    #[test]
    fn v2_roundtrip() {
        let snapshot = sample();
        let encoded = snapshot.encode().unwrap();
        assert_eq!(&encoded[4..6], &[0, 2]);
        assert_eq!(Snapshot::decode(&encoded).unwrap(), snapshot);
    }

    #[test]
    fn v3_carries_counters() {
        let snapshot = sample().with_counters(SnapshotCounters {
            tombstones: 4,
            write_ahead: 9,
        });
        let encoded = snapshot.encode().unwrap();
        assert_eq!(&encoded[4..6], &SNAPSHOT_VERSION.to_be_bytes());

        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.counters.unwrap().tombstones, 4);
    }

    #[test]
    fn v1_files_have_no_boundary() {
        let snapshot = Snapshot {
            boundary: None,
            entries: sample().entries,
            counters: None,
        };
        let encoded = snapshot.encode().unwrap();
        assert_eq!(&encoded[4..6], &[0, 1]);

        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded.boundary, None);
        assert_eq!(decoded.entries.len(), 2);
    }

    #[test]
    fn header_layout() {
        let encoded = Snapshot::new(7, vec![])
            .with_counters(SnapshotCounters {
                tombstones: 1,
                write_ahead: 2,
            })
            .encode()
            .unwrap();
        assert_eq!(&encoded[0..4], b"TDSN");
        assert_eq!(&encoded[4..6], &[0, 3]);
        assert_eq!(&encoded[6..10], &[0, 0, 0, 7]);
        assert_eq!(&encoded[10..18], &1u64.to_be_bytes());
        assert_eq!(&encoded[18..26], &2u64.to_be_bytes());
        assert_eq!(&encoded[26..34], &[0; 8]);
        assert_eq!(encoded.len(), 34 + 4);
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut encoded = sample().encode().unwrap();
        encoded[20] ^= 0x40;
        assert!(matches!(
            Snapshot::decode(&encoded),
            Err(CoreError::SnapshotCorrupted { .. })
        ));
    }

    #[test]
    fn bad_magic_with_valid_checksum_is_invalid() {
        let mut body = b"NOPE".to_vec();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u64.to_be_bytes());
        let crc = crc32c::crc32c(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        assert!(matches!(
            Snapshot::decode(&body),
            Err(CoreError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn unknown_version_is_invalid() {
        let mut body = SNAPSHOT_MAGIC.to_vec();
        body.extend_from_slice(&9u16.to_be_bytes());
        body.extend_from_slice(&0u64.to_be_bytes());
        let crc = crc32c::crc32c(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        assert!(matches!(
            Snapshot::decode(&body),
            Err(CoreError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn truncated_body_with_valid_checksum_is_corruption() {
        let mut body = SNAPSHOT_MAGIC.to_vec();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&1u64.to_be_bytes());
        body.extend_from_slice(&[0, 3, b'a']);
        let crc = crc32c::crc32c(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        assert!(matches!(
            Snapshot::decode(&body),
            Err(CoreError::SnapshotCorrupted { .. })
        ));
    }

    #[test]
    fn tiny_file_is_corruption() {
        assert!(matches!(
            Snapshot::decode(&[1, 2]),
            Err(CoreError::SnapshotCorrupted { .. })
        ));
    }
}
