//! Inspect command implementation.

use super::Target;
use serde::Serialize;
use tidedb_core::EngineStats;

/// Engine inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Engine directory.
    pub path: String,
    /// Engine name.
    pub name: String,
    /// Statistics after recovery.
    #[serde(flatten)]
    pub stats: EngineStats,
}

/// Runs the inspect command.
pub fn run(target: &Target, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    let result = InspectResult {
        path: engine.path().display().to_string(),
        name: engine.name().to_owned(),
        stats: engine.stats(),
    };
    engine.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let stats = &result.stats;
    println!("TideDB Engine: {} ({})", result.name, result.path);
    println!();
    println!("Index:");
    println!("  Live keys:   {}", stats.keys);
    println!(
        "  Tombstones:  {} ({}% of live keys)",
        stats.tombstones,
        stats.tombstone_ratio_percent()
    );
    println!("  Write-ahead: {}", stats.write_ahead);
    println!();
    println!("Segments:");
    println!("  Files:          {}", stats.segments);
    println!("  Active segment: {}", stats.active_segment);
    println!("  Total size:     {} bytes", stats.disk_bytes);
}
