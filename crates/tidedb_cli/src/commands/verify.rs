//! Verify command implementation.
//!
//! Works on the files directly and never opens the engine, so it does not
//! truncate an incomplete tail or rewrite anything.

use super::Target;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tidedb_core::{encoded_len, parse_segment_file_name, RecordStatus, Segment, Snapshot};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segment files checked.
    pub segments_checked: usize,
    /// Number of records checked.
    pub records_checked: u64,
    /// Number of tombstone records.
    pub tombstones: u64,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let dir = target.engine_dir();
    if !dir.is_dir() {
        return Err(format!("No engine found at {dir:?}").into());
    }

    println!("Verifying engine at {dir:?}");
    println!();

    let mut result = VerifyResult::default();
    let sizes = verify_segments(&dir.join("segments"), &mut result)?;
    verify_snapshot(
        &dir.join("snapshot").join(format!("state-{}.snap", target.name)),
        &sizes,
        &mut result,
    )?;

    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Engine verification passed");
        Ok(())
    } else {
        println!("✗ Engine verification failed");
        Err("Verification failed".into())
    }
}

/// Scans every segment and returns the size of each, by number.
fn verify_segments(
    segments_dir: &Path,
    result: &mut VerifyResult,
) -> Result<HashMap<u32, u64>, Box<dyn std::error::Error>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(segments_dir)? {
        let file_name = entry?.file_name();
        let name = file_name.to_string_lossy();
        if name.ends_with(".tmp") {
            continue;
        }
        match parse_segment_file_name(&name) {
            Some(number) => numbers.push(number),
            None => result
                .errors
                .push(format!("Unexpected file in segments directory: {name}")),
        }
    }
    numbers.sort_unstable();

    for (expected, &number) in numbers.iter().enumerate() {
        if number as usize != expected {
            result
                .errors
                .push(format!("Segment numbering gap: expected {expected}, found {number}"));
            break;
        }
    }

    let last = numbers.last().copied();
    let mut sizes = HashMap::new();
    for number in numbers {
        let path = segments_dir.join(tidedb_core::segment_file_name(number));
        let segment = Segment::open_sealed(&path, number)?;
        sizes.insert(number, segment.size());
        result.segments_checked += 1;

        let mut tombstones = 0u64;
        match segment.scan(|_, record| {
            if record.status == RecordStatus::Deleted {
                tombstones += 1;
            }
            Ok(())
        }) {
            Ok(summary) => {
                result.records_checked += summary.records;
                if summary.torn_tail {
                    let message = format!(
                        "Segment {number}: incomplete record at offset {} ({} trailing bytes)",
                        summary.valid_len,
                        segment.size() - summary.valid_len
                    );
                    if Some(number) == last {
                        result.warnings.push(message);
                    } else {
                        result.errors.push(message);
                    }
                }
            }
            Err(err) => result.errors.push(format!("Segment {number}: {err}")),
        }
        result.tombstones += tombstones;
    }

    Ok(sizes)
}

fn verify_snapshot(
    path: &Path,
    sizes: &HashMap<u32, u64>,
    result: &mut VerifyResult,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        result
            .warnings
            .push("No snapshot (the next open replays every segment)".into());
        return Ok(());
    }

    let snapshot = match Snapshot::decode(&fs::read(path)?) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            result.errors.push(format!("Snapshot: {err}"));
            return Ok(());
        }
    };

    for (key, locator) in &snapshot.entries {
        let Some(&size) = sizes.get(&locator.segment) else {
            result
                .errors
                .push(format!("Snapshot entry {key:?} names missing segment {}", locator.segment));
            continue;
        };
        let end = encoded_len(key.len(), locator.length as usize)
            .map(|len| locator.offset + len)
            .unwrap_or(u64::MAX);
        if end > size {
            result.errors.push(format!(
                "Snapshot entry {key:?} at {locator} lies past the end of its segment"
            ));
        }
    }

    Ok(())
}

fn print_result(result: &VerifyResult) {
    println!(
        "  Segments checked: {}, records: {}, tombstones: {}",
        result.segments_checked, result.records_checked, result.tombstones
    );
    for warning in &result.warnings {
        println!("    WARNING: {warning}");
    }
    for error in &result.errors {
        println!("    ERROR: {error}");
    }
}
