//! # TideDB Core
//!
//! Embedded log-structured key/value storage engine.
//!
//! This crate provides:
//! - Checksummed, append-only segment files with a background writer per
//!   segment
//! - An in-memory index from key to record location
//! - Snapshots that bound crash recovery to the segments they do not cover
//! - Compaction that rewrites live records and drops dead ones
//! - A registry for sharing engine handles
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tidedb_core::{Config, Engine};
//!
//! let engine = Engine::open_with_config(Path::new("data"), "users", Config::default())?;
//! engine.put("alice", &vec![1u32, 2, 3])?;
//! let value: Option<Vec<u32>> = engine.get("alice")?;
//! assert_eq!(value, Some(vec![1, 2, 3]));
//! # Ok::<(), tidedb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod dir;
mod engine;
mod error;
mod registry;
mod segment;
mod snapshot;
mod stats;
mod types;

pub use codec::{decode_value, encode_value};
pub use config::{Config, ENV_DEBUG, ENV_MAX_SEGMENT_SIZE_MB, ENV_SYNC_ON_WRITE};
pub use dir::{parse_segment_file_name, segment_file_name};
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use registry::EngineRegistry;
pub use segment::{
    encoded_len, validate_id, CompactionResult, Corruption, Record, RecordHeader, RecordStatus,
    ScanSummary, Segment, MAX_ID_LEN, RECORD_HEADER_SIZE,
};
pub use snapshot::{Snapshot, SnapshotCounters, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use stats::EngineStats;
pub use types::RecordLocator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
