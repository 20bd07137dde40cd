//! Table and Array behaviour over replicas with scripted write faults

use proptest::prelude::*;
use reliant_core::{replica, File, MemFile, Replica, ReplicaConfig};
use reliant_storage::testing::{FaultyFile, WriteMode};
use reliant_storage::{Array, RowArray, Table};
use std::sync::Arc;
use tempfile::TempDir;

use WriteMode::{Bad, Fail, Ok as Good};

// ============================================================================
// Helpers
// ============================================================================

fn faulty_replicas(scripts: &[&[WriteMode]]) -> (Vec<Replica>, Vec<Arc<FaultyFile>>) {
    let files: Vec<Arc<FaultyFile>> = scripts
        .iter()
        .map(|modes| Arc::new(FaultyFile::new(modes.iter().copied())))
        .collect();
    (replica::from_files(files.clone()), files)
}

fn row(s: &str, rowlen: usize) -> Vec<u8> {
    let mut b = vec![0u8; rowlen];
    b[..s.len()].copy_from_slice(s.as_bytes());
    b
}

fn rows(ss: &[&str], rowlen: usize) -> Vec<u8> {
    ss.iter().flat_map(|s| row(s, rowlen)).collect()
}

/// Each replica has some rows corrupted, but every row has at least one
/// intact copy, and the last replica is always intact.
const SCRIPTS: [&[WriteMode]; 3] = [
    &[Good, Bad, Bad, Good, Bad, Bad],
    &[Good, Good, Bad, Bad, Bad, Good],
    &[Good, Good, Good, Good, Good, Good],
];

struct Case {
    data: &'static [&'static str],
    row: usize,
    rows: usize,
}

const CASES: [Case; 6] = [
    Case { data: &["Hello"], row: 3, rows: 4 },
    Case { data: &["World!"], row: 0, rows: 4 },
    Case { data: &["xsw"], row: 1, rows: 4 },
    Case { data: &["abcd"], row: 3, rows: 4 },
    Case { data: &["ef"], row: 2, rows: 4 },
    Case { data: &["hi", "qiniu", "!"], row: 3, rows: 6 },
];

const ROWLEN: usize = 8;

// ============================================================================
// Table
// ============================================================================

#[test]
fn test_table_survives_corrupted_replicas() {
    let (files, _) = faulty_replicas(&SCRIPTS);
    let table = Table::open(files, ROWLEN, 1).unwrap();

    let mut realworld = vec![""; 10];
    let mut maxrow = 0;
    for (i, c) in CASES.iter().enumerate() {
        if c.data.len() == 1 {
            table.write_row(c.row as u64, &row(c.data[0], ROWLEN)).unwrap();
        } else {
            table.write_rows(c.row as u64, &rows(c.data, ROWLEN)).unwrap();
        }
        assert_eq!(table.rows().unwrap(), c.rows as u64, "case {}", i);

        for (k, s) in c.data.iter().enumerate() {
            realworld[c.row + k] = s;
        }
        maxrow = maxrow.max(c.row + c.data.len());

        let mut buf = vec![0u8; ROWLEN];
        for (r, expect) in realworld.iter().enumerate().take(maxrow) {
            table.read_row(r as u64, &mut buf).unwrap();
            assert_eq!(buf, row(expect, ROWLEN), "case {} row {}", i, r);
        }

        let mut bufs = vec![0u8; ROWLEN * maxrow];
        table.read_rows(0, &mut bufs).unwrap();
        assert_eq!(bufs, rows(&realworld[..maxrow], ROWLEN), "case {}", i);
    }
}

#[test]
fn test_degraded_write_with_three_replicas() {
    let (files, faulty) = faulty_replicas(&[&[], &[Fail], &[]]);
    let table = Table::open(files, 4, 1).unwrap();

    table.write_row(0, b"data").unwrap();
    assert!(faulty[1].snapshot().is_empty());

    // the failed replica is skipped on read
    let mut buf = [0u8; 4];
    table.read_row(0, &mut buf).unwrap();
    assert_eq!(&buf, b"data");

    // a second failure in the same write exceeds the tolerance
    faulty[0].push_modes([Fail]);
    faulty[1].push_modes([Fail]);
    assert!(table.write_row(1, b"more").unwrap_err().is_too_many_fails());
}

#[test]
fn test_short_write_is_caught_by_checksum() {
    let (files, _) = faulty_replicas(&[&[WriteMode::Short], &[]]);
    let table = Table::open(files, 8, 0).unwrap();
    table.write_row(0, b"abcdefgh").unwrap();

    let mut buf = [0u8; 8];
    table.read_row(0, &mut buf).unwrap();
    assert_eq!(&buf, b"abcdefgh");
}

#[test]
fn test_all_copies_corrupt_is_bad_data() {
    let (files, _) = faulty_replicas(&[&[Bad], &[Bad]]);
    let table = Table::open(files, 8, 0).unwrap();
    table.write_row(0, b"abcdefgh").unwrap();

    let mut buf = [0u8; 8];
    assert!(table.read_row(0, &mut buf).unwrap_err().is_bad_data());
    assert!(table.read_rows(0, &mut buf).unwrap_err().is_bad_data());
}

#[test]
fn test_shrink_counts_failures() {
    let (files, faulty) = faulty_replicas(&[&[], &[]]);
    let table = Table::open(files, 4, 0).unwrap();
    table.write_rows(0, b"aaaabbbb").unwrap();

    faulty[1].set_fail_truncate(true);
    assert!(table.shrink(1).unwrap_err().is_too_many_fails());
}

#[test]
fn test_table_on_disk_replicas() {
    let dir = TempDir::new().unwrap();
    let config = ReplicaConfig::new()
        .with_path(dir.path().join("a.tbl"))
        .with_path(dir.path().join("b.tbl"))
        .with_allowfails(1);

    {
        let table = Table::open_files(&config, 6).unwrap();
        table.write_rows(0, b"row000row001row002").unwrap();
    }

    // damage one replica on disk; the other still serves every row
    let raw = std::fs::read(dir.path().join("a.tbl")).unwrap();
    let mut damaged = raw.clone();
    damaged[11] ^= 0xff;
    std::fs::write(dir.path().join("a.tbl"), &damaged).unwrap();

    let table = Table::open_files(&config, 6).unwrap();
    assert_eq!(table.rows().unwrap(), 3);
    let mut bufs = [0u8; 18];
    table.read_rows(0, &mut bufs).unwrap();
    assert_eq!(&bufs, b"row000row001row002");
}

// ============================================================================
// Array
// ============================================================================

#[test]
fn test_array_survives_corrupted_replicas() {
    let (files, _) = faulty_replicas(&SCRIPTS);
    let table = Table::open(files, ROWLEN, 1).unwrap();
    let mut array = Array::open(table).unwrap();

    let mut realworld = vec![""; 10];
    let mut maxrow = 0;
    for (i, c) in CASES.iter().enumerate() {
        if c.data.len() == 1 {
            array.put(c.row, &row(c.data[0], ROWLEN)).unwrap();
        } else {
            array.puts(c.row, &rows(c.data, ROWLEN)).unwrap();
        }
        assert_eq!(array.len(), c.rows, "case {}", i);

        for (k, s) in c.data.iter().enumerate() {
            realworld[c.row + k] = s;
        }
        maxrow = maxrow.max(c.row + c.data.len());

        let mut buf = vec![0u8; ROWLEN];
        for (r, expect) in realworld.iter().enumerate().take(maxrow) {
            array.get(r, &mut buf).unwrap();
            assert_eq!(buf, row(expect, ROWLEN), "case {} row {}", i, r);
        }

        let mut bufs = vec![0u8; ROWLEN * maxrow];
        assert_eq!(array.gets(0, &mut bufs).unwrap(), maxrow);
        assert_eq!(bufs, rows(&realworld[..maxrow], ROWLEN));
    }
}

#[test]
fn test_array_reopen_after_corruption() {
    let mems = [Arc::new(MemFile::new()), Arc::new(MemFile::new())];
    {
        let table = Table::open(replica::from_files(mems.clone()), 4, 1).unwrap();
        let mut array = Array::open(table).unwrap();
        array.puts(0, b"aaaabbbbcccc").unwrap();
    }
    mems[0].with_bytes_mut(|d| d[1] ^= 0x01);

    let table = Table::open(replica::from_files(mems.clone()), 4, 1).unwrap();
    let mut array = Array::open(table).unwrap();
    let mut e = [0u8; 4];
    array.get(0, &mut e).unwrap();
    assert_eq!(&e, b"aaaa");
    assert_eq!(mems[1].len().unwrap(), 24);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_table_roundtrip_with_one_corrupt_replica(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 8), 1..20),
        victim in 0usize..3,
        flip in 0usize..12,
    ) {
        let mems: Vec<Arc<MemFile>> = (0..3).map(|_| Arc::new(MemFile::new())).collect();
        let table = Table::open(replica::from_files(mems.clone()), 8, 1).unwrap();
        let flat: Vec<u8> = payloads.concat();
        table.write_rows(0, &flat).unwrap();

        // corrupt one byte of every row on one replica
        mems[victim].with_bytes_mut(|d| {
            for chunk in d.chunks_exact_mut(12) {
                chunk[flip] ^= 0x5a;
            }
        });

        let mut bufs = vec![0u8; flat.len()];
        table.read_rows(0, &mut bufs).unwrap();
        prop_assert_eq!(&bufs, &flat);

        let mut buf = [0u8; 8];
        for (r, payload) in payloads.iter().enumerate() {
            table.read_row(r as u64, &mut buf).unwrap();
            prop_assert_eq!(&buf[..], &payload[..]);
        }
    }
}
