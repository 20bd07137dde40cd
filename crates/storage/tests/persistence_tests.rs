//! Bitmaps and config blobs across reopen, on real files

use reliant_bits::BitIndex;
use reliant_core::{replica, ReplicaConfig};
use reliant_storage::testing::{FaultyFile, WriteMode};
use reliant_storage::{read_json, write_json, BigBitmap, Bitmap, Config};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

fn replicas(dir: &TempDir, name: &str, n: usize, allowfails: usize) -> ReplicaConfig {
    let mut config = ReplicaConfig::new().with_allowfails(allowfails);
    for i in 0..n {
        config = config.with_path(dir.path().join(format!("{}.{}", name, i)));
    }
    config
}

// ============================================================================
// Bitmaps
// ============================================================================

#[test]
fn test_bitmap_reopen_restores_bits() {
    let dir = TempDir::new().unwrap();
    let config = replicas(&dir, "free.bits", 2, 1);
    {
        let mut b = Bitmap::open_files(&config, 16).unwrap();
        b.set(3).unwrap();
        b.set_range(500, 700).unwrap();
        b.clear(600).unwrap();
        assert_eq!(b.find(true).unwrap(), 3);
    }

    let mut b = Bitmap::open_files(&config, 16).unwrap();
    assert!(!b.has(3));
    assert_eq!(b.find(false).unwrap(), 500);
    assert_eq!(b.find_from(600, false).unwrap(), 601);
    assert!(b.find_from(701, false).unwrap_err().is_not_found());
}

#[test]
fn test_big_bitmap_reopen_rebuilds_index() {
    let dir = TempDir::new().unwrap();
    let config = replicas(&dir, "slots.bits", 3, 1);
    let far = 64 * 64 * 64 + 5;
    {
        let mut b = BigBitmap::open_files(&config, 64, 100_000_000).unwrap();
        b.set(far).unwrap();
        b.set_range(10, 20).unwrap();
        b.clear_range(10, 19).unwrap();
    }

    let mut b = BigBitmap::open_files(&config, 64, 100_000_000).unwrap();
    assert_eq!(b.find(true).unwrap(), 20);
    assert_eq!(b.find(false).unwrap(), far);
    assert_eq!(b.index().capacity_words(), 16_777_216);
}

#[test]
fn test_big_bitmap_reopen_too_large_for_capacity() {
    let dir = TempDir::new().unwrap();
    let config = replicas(&dir, "small.bits", 1, 0);
    {
        let mut b = Bitmap::open_files(&config, 8).unwrap();
        b.set(4096 + 64).unwrap();
    }
    assert!(BigBitmap::open_files(&config, 8, 4096).is_err());
}

#[test]
fn test_bitmap_survives_one_bad_replica() {
    let good = Arc::new(FaultyFile::default());
    let bad = Arc::new(FaultyFile::always(WriteMode::Bad));
    let table = || {
        reliant_storage::Table::open(
            replica::from_files(vec![bad.clone(), good.clone()]),
            8,
            1,
        )
        .unwrap()
    };

    let mut b = Bitmap::open(table()).unwrap();
    for idx in [1, 70, 130, 4000] {
        b.set(idx).unwrap();
    }
    let mut reopened = Bitmap::open(table()).unwrap();
    assert_eq!(reopened.words(), b.words());
    assert_eq!(reopened.find(false).unwrap(), 1);
}

// ============================================================================
// Config blobs
// ============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Manifest {
    generation: u64,
    segments: Vec<String>,
}

#[test]
fn test_config_roundtrip_on_disk() {
    let dir = TempDir::new().unwrap();
    let config = Config::open_files(&replicas(&dir, "manifest", 3, 1)).unwrap();
    assert!(config.validate().unwrap_err().is_not_found());

    config.write_file(b"generation 1").unwrap();
    config.validate().unwrap();
    assert_eq!(config.read_file().unwrap(), b"generation 1");

    // clobber the first replica; reads fall through
    std::fs::write(dir.path().join("manifest.0"), b"garbage").unwrap();
    assert_eq!(config.read_file().unwrap(), b"generation 1");
}

#[test]
fn test_config_write_tolerates_allowfails() {
    let files = [
        Arc::new(FaultyFile::new([WriteMode::Fail])),
        Arc::new(FaultyFile::default()),
    ];
    let config = Config::open(replica::from_files(files.clone()), 1);
    config.write_file(b"v1").unwrap();
    assert!(files[0].snapshot().is_empty());
    assert_eq!(config.read_file().unwrap(), b"v1");

    let strict = Config::open(replica::from_files(files.clone()), 0);
    files[1].push_modes([WriteMode::Fail]);
    assert!(strict.write_file(b"v2").unwrap_err().is_too_many_fails());
}

#[test]
fn test_json_manifest_reload() {
    let dir = TempDir::new().unwrap();
    let cfg = replicas(&dir, "manifest.json", 2, 0);
    let manifest = Manifest {
        generation: 7,
        segments: vec!["seg-0001".into(), "seg-0002".into()],
    };
    write_json(&Config::open_files(&cfg).unwrap(), &manifest).unwrap();

    let back: Manifest = read_json(&Config::open_files(&cfg).unwrap()).unwrap();
    assert_eq!(back, manifest);
}
