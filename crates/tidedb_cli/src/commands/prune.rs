//! Prune command implementation.

use super::{print_compaction, Target};

/// Runs the prune command: compaction followed by a full index rebuild.
pub fn run(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    println!("Pruning {:?}", engine.path());
    println!();

    let result = engine.prune()?;
    let keys = engine.count();
    engine.close()?;

    print_compaction(&result);
    println!("  Keys after rebuild: {keys}");
    println!();
    println!("✓ Prune complete");
    Ok(())
}
