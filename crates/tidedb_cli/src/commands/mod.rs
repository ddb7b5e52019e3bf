//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod get;
pub mod inspect;
pub mod prune;
pub mod verify;

use std::path::PathBuf;
use tidedb_core::{CompactionResult, Config, Engine};

/// The engine a command operates on.
#[derive(Debug, Clone)]
pub struct Target {
    /// Root directory.
    pub path: PathBuf,
    /// Engine name.
    pub name: String,
    /// Whether per-operation debug events are enabled.
    pub verbose: bool,
}

impl Target {
    /// Directory of the engine itself.
    pub fn engine_dir(&self) -> PathBuf {
        self.path.join(&self.name)
    }

    /// Opens the engine, failing if it does not exist yet.
    pub fn open(&self) -> Result<Engine, Box<dyn std::error::Error>> {
        if !self.engine_dir().is_dir() {
            return Err(format!("No engine found at {:?}", self.engine_dir()).into());
        }
        let config = Config::from_env()?.debug(self.verbose);
        Ok(Engine::open_with_config(&self.path, &self.name, config)?)
    }
}

pub(crate) fn print_compaction(result: &CompactionResult) {
    println!("  Live records:       {}", result.live_records);
    println!("  Tombstones dropped: {}", result.tombstones_dropped);
    println!(
        "  Segments:           {} -> {}",
        result.segments_before, result.segments_after
    );
    println!("  Size before: {} bytes", result.bytes_before);
    println!("  Size after:  {} bytes", result.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        result.bytes_reclaimed(),
        if result.bytes_before > 0 {
            result.bytes_reclaimed() as f64 / result.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
}
