//! Segment storage for records.
//!
//! Segments are append-only files named `segment-NNNNNN.dat`. Exactly one
//! segment is active (accepting appends); the others are sealed.
//!
//! ## Record Format
//!
//! ```text
//! | data_len (4) | crc32c (4) | id_len (2) | id (id_len) | status (1) | payload (data_len) |
//! ```
//!
//! All integers are big-endian. The checksum covers the payload only.
//! Status `1` is Active, `2` is a tombstone.

mod compaction;
mod record;
mod store;
mod writer;

pub use compaction::{CompactionResult, Compactor};
pub use record::{
    encoded_len, validate_id, Corruption, Record, RecordHeader, RecordStatus, MAX_ID_LEN,
    RECORD_HEADER_SIZE,
};
pub use store::{ScanSummary, Segment};
