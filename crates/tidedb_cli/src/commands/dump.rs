//! Dump command implementation.

use super::Target;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tidedb_core::{CoreResult, Engine};

/// Runs the dump command.
///
/// Keys are collected on `workers` threads and printed sorted. With a
/// limit, collection stops once that many keys have been seen.
pub fn run(
    target: &Target,
    limit: Option<usize>,
    workers: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    let workers = workers.unwrap_or(engine.config().iterate_workers);
    let entries = collect(&engine, limit, workers)?;
    let total = engine.count();
    engine.close()?;

    for (id, len) in &entries {
        println!("{id}\t{len} bytes");
    }
    println!();
    println!("{} of {} keys", entries.len(), total);

    Ok(())
}

/// Collects up to `limit` keys with their payload sizes, sorted by key.
fn collect(
    engine: &Engine,
    limit: Option<usize>,
    workers: usize,
) -> CoreResult<Vec<(String, usize)>> {
    let limit = limit.unwrap_or(usize::MAX);
    let taken = AtomicUsize::new(0);
    let entries = Mutex::new(Vec::new());

    engine.iterate(
        |id, payload| {
            if taken.fetch_add(1, Ordering::SeqCst) >= limit {
                return false;
            }
            entries.lock().push((id.to_owned(), payload.len()));
            true
        },
        workers,
    )?;

    let mut entries = entries.into_inner();
    entries.sort();
    Ok(entries)
}
