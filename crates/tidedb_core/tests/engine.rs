//! End-to-end behaviour of a single engine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use tidedb_core::{Config, CoreError, Corruption, Engine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    age: u32,
    tags: Vec<String>,
}

fn config() -> Config {
    Config::new().sync_on_write(false).auto_compact(false)
}

fn open(root: &Path) -> Engine {
    Engine::open_with_config(root, "test", config()).unwrap()
}

fn segment_files(root: &Path) -> usize {
    fs::read_dir(root.join("test/segments")).unwrap().count()
}

#[test]
fn structured_values_roundtrip() {
    let root = tempdir().unwrap();
    let engine = open(root.path());
    let user = User {
        name: "Ada".into(),
        age: 36,
        tags: vec!["admin".into(), "ops".into()],
    };

    engine.put("user:1", &user).unwrap();
    assert_eq!(engine.get::<User>("user:1").unwrap(), Some(user));
    assert_eq!(engine.get::<User>("user:2").unwrap(), None);
}

#[test]
fn decoding_into_wrong_type_is_codec_error() {
    let root = tempdir().unwrap();
    let engine = open(root.path());
    engine.put("n", &42u32).unwrap();

    assert!(matches!(
        engine.get::<User>("n"),
        Err(CoreError::Codec { .. })
    ));
}

#[test]
fn delete_then_get_is_not_found() {
    let root = tempdir().unwrap();
    let engine = open(root.path());

    engine.put("k", &"v").unwrap();
    assert!(engine.delete("k").unwrap());
    assert_eq!(engine.get::<String>("k").unwrap(), None);
    assert!(!engine.delete("k").unwrap());
    assert!(!engine.is_exist("k"));
}

#[test]
fn overwrites_count_one_tombstone_each() {
    let root = tempdir().unwrap();
    let engine = open(root.path());

    for version in 0..5u32 {
        engine.put("k", &version).unwrap();
    }
    assert_eq!(engine.get::<u32>("k").unwrap(), Some(4));
    assert_eq!(engine.stats().tombstones, 4);
    assert_eq!(engine.stats().write_ahead, 1);
}

#[test]
fn two_large_values_rotate_at_1024_bytes() {
    let root = tempdir().unwrap();
    let engine = Engine::open_with_config(
        root.path(),
        "test",
        config().max_segment_size(1024),
    )
    .unwrap();

    engine.put_raw("a", &[b'a'; 900]).unwrap();
    assert_eq!(segment_files(root.path()), 1);
    engine.put_raw("b", &[b'b'; 900]).unwrap();

    assert_eq!(segment_files(root.path()), 2);
    assert!(root.path().join("test/segments/segment-000001.dat").exists());
    assert!(root.path().join("test/snapshot/state-test.snap").exists());
    assert_eq!(engine.get_raw("a").unwrap().unwrap(), vec![b'a'; 900]);
    assert_eq!(engine.get_raw("b").unwrap().unwrap(), vec![b'b'; 900]);
}

#[test]
fn rotation_stops_growth_of_previous_segment() {
    let root = tempdir().unwrap();
    let engine = Engine::open_with_config(
        root.path(),
        "test",
        config().max_segment_size(200),
    )
    .unwrap();

    let mut snapshot_bytes = Vec::new();
    for i in 0..20 {
        engine.put_raw(&format!("key-{i:02}"), &[i as u8; 50]).unwrap();
        let snap = root.path().join("test/snapshot/state-test.snap");
        if snap.exists() {
            snapshot_bytes.push(fs::read(snap).unwrap());
        }
    }
    engine.sync().unwrap();

    let first = fs::metadata(root.path().join("test/segments/segment-000000.dat"))
        .unwrap()
        .len();
    assert!(first <= 200);
    assert!(segment_files(root.path()) > 1);
    // Every rotation rewrote the snapshot.
    snapshot_bytes.dedup();
    assert_eq!(snapshot_bytes.len() as u64, engine.stats().snapshots);

    engine.put_raw("late", b"x").unwrap();
    engine.sync().unwrap();
    assert_eq!(
        fs::metadata(root.path().join("test/segments/segment-000000.dat"))
            .unwrap()
            .len(),
        first
    );
}

#[test]
fn flipped_payload_byte_is_detected() {
    let root = tempdir().unwrap();
    {
        let engine = open(root.path());
        engine.put_raw("victim", b"precious payload").unwrap();
        engine.put_raw("bystander", b"fine").unwrap();
        engine.close().unwrap();
    }

    let path = root.path().join("test/segments/segment-000000.dat");
    let mut bytes = fs::read(&path).unwrap();
    // Header (11) + id "victim" (6) + status (1) puts the payload at 18.
    bytes[18 + 3] ^= 0x20;
    fs::write(&path, bytes).unwrap();

    // The snapshot-free open replays the segment and finds the damage.
    let err = Engine::open_with_config(root.path(), "test", config()).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn flipped_byte_in_covered_segment_fails_get() {
    let root = tempdir().unwrap();
    {
        let engine = Engine::open_with_config(
            root.path(),
            "test",
            config().max_segment_size(64),
        )
        .unwrap();
        engine.put_raw("victim", &[7; 40]).unwrap();
        // Rotates, leaving segment 0 covered by the snapshot.
        engine.put_raw("other", &[8; 40]).unwrap();
        engine.close().unwrap();
    }

    let path = root.path().join("test/segments/segment-000000.dat");
    let mut bytes = fs::read(&path).unwrap();
    bytes[30] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    let engine = Engine::open_with_config(root.path(), "test", config()).unwrap();
    match engine.get_raw("victim") {
        Err(CoreError::CorruptedRecord {
            segment: 0,
            offset: 0,
            kind: Corruption::ChecksumMismatch { .. },
        }) => {}
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert_eq!(engine.get_raw("other").unwrap().unwrap(), vec![8; 40]);
}

#[test]
fn concurrent_writers_and_readers() {
    let root = tempdir().unwrap();
    let engine = Arc::new(
        Engine::open_with_config(root.path(), "test", config().max_segment_size(4096)).unwrap(),
    );

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{t}-k{i}");
                    engine.put(&key, &(t * 1000 + i)).unwrap();
                    assert_eq!(engine.get::<u32>(&key).unwrap(), Some(t * 1000 + i));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(engine.count(), 400);
    assert!(engine.stats().segments > 1);
    for t in 0..4u32 {
        for i in 0..100u32 {
            assert_eq!(
                engine.get::<u32>(&format!("t{t}-k{i}")).unwrap(),
                Some(t * 1000 + i)
            );
        }
    }
}

#[test]
fn iterate_sees_snapshot_of_keys() {
    let root = tempdir().unwrap();
    let engine = open(root.path());
    for i in 0..30 {
        engine.put_raw(&format!("k{i}"), &[i as u8]).unwrap();
    }
    engine.delete("k5").unwrap();

    let seen = parking_lot::Mutex::new(Vec::new());
    engine
        .iterate(
            |id, payload| {
                seen.lock().push((id.to_owned(), payload[0]));
                true
            },
            3,
        )
        .unwrap();

    let seen = seen.into_inner();
    assert_eq!(seen.len(), 29);
    assert!(!seen.iter().any(|(id, _)| id == "k5"));
    assert!(seen.iter().all(|(id, v)| id == &format!("k{v}")));
}

#[test]
fn iterate_reports_corruption() {
    let root = tempdir().unwrap();
    {
        let engine = Engine::open_with_config(
            root.path(),
            "test",
            config().max_segment_size(64),
        )
        .unwrap();
        engine.put_raw("victim", &[7; 40]).unwrap();
        engine.put_raw("other", &[8; 40]).unwrap();
        engine.close().unwrap();
    }
    let path = root.path().join("test/segments/segment-000000.dat");
    let mut bytes = fs::read(&path).unwrap();
    bytes[40] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    let engine = Engine::open_with_config(root.path(), "test", config()).unwrap();
    let err = engine.iterate(|_, _| true, 2).unwrap_err();
    assert!(err.is_corruption());
}
