//! # TideDB Storage
//!
//! Byte-level storage backends for TideDB.
//!
//! A backend is an **opaque byte store**: it appends bytes, reads them back at
//! an offset and makes them durable on request. It has no knowledge of
//! records, segments, snapshots or keys; `tidedb_core` owns every on-disk
//! format.
//!
//! ## Design Principles
//!
//! - All operations take `&self`, so one backend can be shared between a
//!   segment's background writer thread and any number of readers
//! - `size()` reports bytes that have physically been handed to the backend
//! - Backends must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Persistent storage using OS file APIs
//! - [`InMemoryBackend`] - For tests and scratch data
//!
//! ## Example
//!
//! ```rust
//! use tidedb_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
