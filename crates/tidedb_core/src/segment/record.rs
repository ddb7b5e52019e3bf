//! Segment record codec.

use crate::error::{CoreError, CoreResult};
use thiserror::Error;

/// Size of the fixed portion: data_len (4) + crc (4) + id_len (2) + status (1).
pub const RECORD_HEADER_SIZE: usize = 11;

/// Longest id a record can carry.
pub const MAX_ID_LEN: usize = u16::MAX as usize;

/// Whether a record carries a live value or marks its key deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordStatus {
    /// The record holds the current value for its id.
    Active = 1,
    /// Tombstone: the id was deleted.
    Deleted = 2,
}

impl RecordStatus {
    /// Returns the on-disk byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses the on-disk byte.
    pub fn from_byte(byte: u8) -> Result<Self, Corruption> {
        match byte {
            1 => Ok(Self::Active),
            2 => Ok(Self::Deleted),
            other => Err(Corruption::InvalidStatus(other)),
        }
    }
}

/// Ways a stored record can fail verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// The payload checksum does not match the stored one.
    #[error("checksum mismatch: stored {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum computed over the payload read back.
        actual: u32,
    },

    /// Fewer bytes were available than the header promises.
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the header requires.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// The status byte is neither Active nor Deleted.
    #[error("invalid status byte {0:#04x}")]
    InvalidStatus(u8),

    /// The record has a zero-length id.
    #[error("record has an empty id")]
    EmptyId,

    /// The id bytes are not UTF-8.
    #[error("record id is not valid UTF-8")]
    InvalidId,

    /// The record at a locator belongs to another key.
    #[error("record id {found:?} does not match requested {expected:?}")]
    IdMismatch {
        /// The key that was looked up.
        expected: String,
        /// The id stored in the record.
        found: String,
    },

    /// An indexed locator points at a tombstone.
    #[error("index points at a tombstone")]
    UnexpectedTombstone,
}

/// The fixed-size prefix of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length.
    pub data_len: u32,
    /// CRC-32C of the payload.
    pub crc: u32,
    /// Id length.
    pub id_len: u16,
}

impl RecordHeader {
    /// Parses the first [`RECORD_HEADER_SIZE`] bytes of a record.
    ///
    /// The status byte is part of the fixed portion on disk but is read with
    /// the body, after the id.
    pub fn parse(data: &[u8]) -> Result<Self, Corruption> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Corruption::Truncated {
                needed: RECORD_HEADER_SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            data_len: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            crc: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            id_len: u16::from_be_bytes([data[8], data[9]]),
        })
    }

    /// Total encoded length of the record this header starts.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + u64::from(self.id_len) + u64::from(self.data_len)
    }
}

/// One log record: a key, a status and (for Active records) a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// External key.
    pub id: String,
    /// Active or tombstone.
    pub status: RecordStatus,
    /// Stored value bytes, empty for tombstones.
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates an Active record.
    #[must_use]
    pub fn active(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            status: RecordStatus::Active,
            payload,
        }
    }

    /// Creates a tombstone for `id`.
    #[must_use]
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RecordStatus::Deleted,
            payload: Vec::new(),
        }
    }

    /// Returns whether this is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.status == RecordStatus::Deleted
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidId`] for an empty or over-long id and
    /// with [`CoreError::PayloadTooLarge`] if the payload length does not fit
    /// in 32 bits.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        encode_parts(&self.id, &self.payload, self.status)
    }

    /// Decodes a record and verifies its payload checksum.
    ///
    /// Bytes past the end of the record are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, Corruption> {
        let header = RecordHeader::parse(data)?;
        let needed = header.record_len() as usize;
        if data.len() < needed {
            return Err(Corruption::Truncated {
                needed,
                available: data.len(),
            });
        }
        if header.id_len == 0 {
            return Err(Corruption::EmptyId);
        }

        let id_end = RECORD_HEADER_SIZE - 1 + header.id_len as usize;
        let id_bytes = &data[RECORD_HEADER_SIZE - 1..id_end];
        let status = RecordStatus::from_byte(data[id_end])?;
        let payload = &data[id_end + 1..needed];

        let actual = crc32c::crc32c(payload);
        if actual != header.crc {
            return Err(Corruption::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }

        let id = std::str::from_utf8(id_bytes).map_err(|_| Corruption::InvalidId)?;

        Ok(Self {
            id: id.to_owned(),
            status,
            payload: payload.to_vec(),
        })
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.id.len() as u64 + self.payload.len() as u64
    }
}

/// Checks that `id` can be stored in a record.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] if the id is empty or longer than
/// [`MAX_ID_LEN`] bytes.
pub fn validate_id(id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::invalid_id("id must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::invalid_id(format!(
            "id is {} bytes, maximum is {MAX_ID_LEN}",
            id.len()
        )));
    }
    Ok(())
}

/// Returns the encoded length of a record with the given id and payload
/// sizes, validating both.
///
/// # Errors
///
/// Same conditions as [`Record::encode`].
pub fn encoded_len(id_len: usize, data_len: usize) -> CoreResult<u64> {
    if id_len == 0 || id_len > MAX_ID_LEN {
        return Err(CoreError::invalid_id(format!(
            "id length {id_len} outside 1..={MAX_ID_LEN}"
        )));
    }
    if u32::try_from(data_len).is_err() {
        return Err(CoreError::PayloadTooLarge { size: data_len });
    }
    Ok(RECORD_HEADER_SIZE as u64 + id_len as u64 + data_len as u64)
}

/// Encodes a record from borrowed parts.
pub(crate) fn encode_parts(id: &str, payload: &[u8], status: RecordStatus) -> CoreResult<Vec<u8>> {
    validate_id(id)?;
    let data_len = u32::try_from(payload.len()).map_err(|_| CoreError::PayloadTooLarge {
        size: payload.len(),
    })?;
    let id_len = id.len() as u16;

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + id.len() + payload.len());
    buf.extend_from_slice(&data_len.to_be_bytes());
    buf.extend_from_slice(&crc32c::crc32c(payload).to_be_bytes());
    buf.extend_from_slice(&id_len.to_be_bytes());
    buf.extend_from_slice(id.as_bytes());
    buf.push(status.as_byte());
    buf.extend_from_slice(payload);

    Ok(buf)
}
