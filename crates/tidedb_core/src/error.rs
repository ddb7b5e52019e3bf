//! Error types for TideDB core.

use crate::segment::Corruption;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TideDB engine operations.
///
/// A missing key is never an error: lookups return `Option`, deletes return
/// `bool`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidedb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value could not be serialized or deserialized.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The record id is empty or too long.
    #[error("invalid id: {reason}")]
    InvalidId {
        /// Why the id was rejected.
        reason: String,
    },

    /// The payload does not fit a 32-bit length.
    #[error("payload too large: {size} bytes")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// A configuration value could not be used.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A record failed structural or checksum verification.
    #[error("corrupted record in segment {segment} at offset {offset}: {kind}")]
    CorruptedRecord {
        /// Segment number holding the record.
        segment: u32,
        /// Byte offset of the record start.
        offset: u64,
        /// What was wrong with it.
        kind: Corruption,
    },

    /// The snapshot file failed its trailing checksum or is truncated.
    #[error("snapshot corrupted: {message}")]
    SnapshotCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The snapshot file is not a snapshot or disagrees with the segments.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },

    /// The on-disk layout is not a valid engine directory.
    #[error("invalid engine format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A segment's background writer failed; the segment rejects further writes.
    #[error("segment {segment} writer failed: {message}")]
    WriterFailed {
        /// Segment number.
        segment: u32,
        /// The first error reported by the writer.
        message: String,
    },

    /// The segment no longer accepts appends.
    #[error("segment {segment} is closed")]
    SegmentClosed {
        /// Segment number.
        segment: u32,
    },

    /// Another handle holds the engine directory lock.
    #[error("engine locked: another handle has exclusive access")]
    EngineLocked,

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates an invalid id error.
    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Self::InvalidId {
            reason: reason.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a snapshot corrupted error.
    pub fn snapshot_corrupted(message: impl Into<String>) -> Self {
        Self::SnapshotCorrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate damaged on-disk data.
    ///
    /// Callers can answer these with a full [`crate::Engine::rebuild_indexes`]
    /// or by restoring from a replica.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptedRecord { .. }
                | Self::SnapshotCorrupted { .. }
                | Self::InvalidSnapshot { .. }
                | Self::InvalidFormat { .. }
        )
    }

    /// Returns true for errors raised before any I/O because the input was
    /// unusable.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId { .. } | Self::PayloadTooLarge { .. } | Self::InvalidConfig { .. }
        )
    }
}
