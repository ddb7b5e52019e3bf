//! Core type definitions for TideDB.

use std::fmt;

/// Where a live record sits on disk.
///
/// `offset` is the start of the whole record inside the segment file and
/// `length` is the payload length. Together with the key length this is
/// enough to read and verify the record without touching its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLocator {
    /// Segment number.
    pub segment: u32,
    /// Byte offset of the record start.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u32,
}

impl RecordLocator {
    /// Creates a new locator.
    #[must_use]
    pub const fn new(segment: u32, offset: u64, length: u32) -> Self {
        Self {
            segment,
            offset,
            length,
        }
    }
}

impl fmt::Display for RecordLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}+{}", self.segment, self.offset, self.length)
    }
}
