//! Compact command implementation.

use super::{print_compaction, Target};

/// Runs the compact command.
pub fn run(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    println!("Compacting {:?}", engine.path());
    println!();

    let result = engine.compact()?;
    engine.close()?;

    print_compaction(&result);
    println!();
    println!("✓ Compaction complete");
    Ok(())
}
