//! Replicated line log: torn tails, corrupt replicas and write failures

use reliant_core::{replica, Error, File, MemFile, Replica, ReplicaConfig};
use reliant_storage::log::MIN_LINE_MAX;
use reliant_storage::testing::{FaultyFile, WriteMode};
use reliant_storage::Logger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

use WriteMode::{Bad, Fail, Ok as Good, Short};

// ============================================================================
// Helpers
// ============================================================================

fn mems(n: usize) -> (Vec<Replica>, Vec<Arc<MemFile>>) {
    let files: Vec<Arc<MemFile>> = (0..n).map(|_| Arc::new(MemFile::new())).collect();
    (replica::from_files(files.clone()), files)
}

fn faulty(scripts: &[&[WriteMode]]) -> (Vec<Replica>, Vec<Arc<FaultyFile>>) {
    let files: Vec<Arc<FaultyFile>> = scripts
        .iter()
        .map(|modes| Arc::new(FaultyFile::new(modes.iter().copied())))
        .collect();
    (replica::from_files(files.clone()), files)
}

fn read_all(log: &Logger) -> Vec<String> {
    log.reader(0)
        .unwrap()
        .map(|line| String::from_utf8(line.unwrap()).unwrap())
        .collect()
}

// ============================================================================
// Torn tails
// ============================================================================

#[test]
fn test_torn_last_line_is_dropped_on_reopen() {
    let (files, raw) = mems(2);
    let log = Logger::open(files.clone(), 0, 1).unwrap();
    for msg in ["alpha", "beta", "gamma"] {
        log.log(msg.as_bytes()).unwrap();
    }
    let size = log.size();
    drop(log);

    // a write that died half way through
    for f in &raw {
        f.write_at(b"1a2b\tdel", size).unwrap();
    }

    let log = Logger::open(files.clone(), 0, 1).unwrap();
    assert_eq!(log.size(), size);
    assert_eq!(read_all(&log), ["alpha", "beta", "gamma"]);

    log.log(b"delta").unwrap();
    drop(log);
    let log = Logger::open(files, 0, 1).unwrap();
    assert_eq!(read_all(&log), ["alpha", "beta", "gamma", "delta"]);
}

#[test]
fn test_single_torn_line_resumes_at_zero() {
    let (files, raw) = mems(1);
    raw[0].write_at(b"3f\thalf a li", 0).unwrap();
    let log = Logger::open(files, 0, 0).unwrap();
    assert_eq!(log.size(), 0);
    assert!(read_all(&log).is_empty());
}

#[test]
fn test_reopen_takes_furthest_replica() {
    let (files, raw) = faulty(&[&[Good, Fail], &[Good, Good]]);
    let log = Logger::open(files.clone(), 0, 1).unwrap();
    log.log(b"first").unwrap();
    log.log(b"second").unwrap();
    let size = log.size();
    drop(log);
    assert!(raw[0].len().unwrap() < size);

    let log = Logger::open(files, 0, 1).unwrap();
    assert_eq!(log.size(), size);
    // the primary lacks the last line, the second replica serves it
    assert_eq!(read_all(&log), ["first", "second"]);
}

#[test]
fn test_tail_without_newline_beyond_linemax_fails_replica() {
    let (files, raw) = mems(2);
    raw[0].write_at(&vec![b'x'; MIN_LINE_MAX + 10], 0).unwrap();

    let err = Logger::open(files.clone(), 0, 0).unwrap_err();
    assert!(err.is_too_many_fails());

    let log = Logger::open(files, 0, 1).unwrap();
    assert_eq!(log.size(), 0);
}

// ============================================================================
// Corrupt replicas
// ============================================================================

#[test]
fn test_corrupt_line_repaired_from_later_replica() {
    let (files, _) = faulty(&[&[Good, Bad, Good], &[]]);
    let log = Logger::open(files, 0, 1).unwrap();
    log.log(b"line number one").unwrap();
    log.log(b"line number two").unwrap();
    log.log(b"line number three").unwrap();

    assert_eq!(
        read_all(&log),
        ["line number one", "line number two", "line number three"]
    );
}

#[test]
fn test_short_write_repaired_from_later_replica() {
    let (files, _) = faulty(&[&[Good, Short, Good], &[]]);
    let log = Logger::open(files, 0, 1).unwrap();
    for msg in ["one", "two is longer", "three"] {
        log.log(msg.as_bytes()).unwrap();
    }
    assert_eq!(read_all(&log), ["one", "two is longer", "three"]);
}

#[test]
fn test_corrupt_on_every_replica_is_bad_data() {
    let (files, _) = faulty(&[&[Good, Bad], &[Good, Bad]]);
    let log = Logger::open(files, 0, 1).unwrap();
    log.log(b"intact first line").unwrap();
    log.log(b"damaged everywhere").unwrap();

    let mut r = log.reader(0).unwrap();
    assert_eq!(r.next_line().unwrap().unwrap(), b"intact first line");
    let mark = r.tell();
    assert!(r.next_line().unwrap_err().is_bad_data());
    assert_eq!(r.tell(), mark);
}

#[test]
fn test_read_from_switches_replica_at_bad_line() {
    let (files, raw) = faulty(&[&[Good, Bad, Good], &[]]);
    let log = Logger::open(files, 0, 1).unwrap();
    log.log(b"line number one").unwrap();
    log.log(b"line number two").unwrap();
    log.log(b"line number three").unwrap();

    let mut buf = vec![0u8; 1024];
    let n = log.read_from(&mut buf, 0).unwrap();
    assert_eq!(n as u64, log.size());
    assert_eq!(&buf[..n], &raw[1].snapshot()[..]);

    let err = log.read_from(&mut buf, log.size()).unwrap_err();
    assert!(err.is_end_of_data());
}

#[test]
fn test_read_from_returns_whole_lines_only() {
    let (files, _) = mems(1);
    let log = Logger::open(files, 0, 0).unwrap();
    log.log(b"0123456789").unwrap();
    let first = log.size() as usize;
    log.log(b"abcdefghij").unwrap();

    let mut buf = vec![0u8; first + 5];
    assert_eq!(log.read_from(&mut buf, 0).unwrap(), first);
    let mut rest = vec![0u8; 64];
    let n = log.read_from(&mut rest, first as u64).unwrap();
    assert_eq!(n as u64, log.size() - first as u64);
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_too_many_fails_leaves_size() {
    let (files, _) = faulty(&[&[Good, Fail], &[Good, Fail]]);
    let log = Logger::open(files, 0, 1).unwrap();
    log.log(b"kept").unwrap();
    let size = log.size();

    assert!(log.log(b"lost").unwrap_err().is_too_many_fails());
    assert_eq!(log.size(), size);
    assert_eq!(read_all(&log), ["kept"]);
}

#[test]
fn test_line_too_long() {
    let (files, raw) = mems(1);
    let log = Logger::open(files, 16, 0).unwrap();
    assert_eq!(log.line_max(), MIN_LINE_MAX);

    let err = log.log(&vec![b'a'; MIN_LINE_MAX]).unwrap_err();
    assert!(matches!(err, Error::LineTooLong { max: MIN_LINE_MAX, .. }));
    assert!(raw[0].snapshot().is_empty());
}

#[test]
fn test_newline_in_message_rejected() {
    let (files, _) = mems(1);
    let log = Logger::open(files, 0, 0).unwrap();
    assert!(matches!(log.log(b"two\nlines"), Err(Error::InvalidArgs(_))));
    assert_eq!(log.size(), 0);
}

#[test]
fn test_reader_is_a_snapshot() {
    let (files, _) = mems(2);
    let log = Logger::open(files, 0, 1).unwrap();
    log.log(b"before").unwrap();
    let mut r = log.reader(0).unwrap();
    log.log(b"after").unwrap();

    assert_eq!(r.next_line().unwrap().unwrap(), b"before");
    assert!(r.next_line().unwrap().is_none());

    let tail: Vec<_> = log.reader(r.tell()).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(tail, vec![b"after".to_vec()]);
}

// ============================================================================
// JSON records on real files
// ============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Event {
    seq: u64,
    kind: String,
}

#[test]
fn test_json_records_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = ReplicaConfig::new()
        .with_allowfails(1)
        .with_path(dir.path().join("events.log.0"))
        .with_path(dir.path().join("events.log.1"));

    {
        let log = Logger::open_files(&config, 0).unwrap();
        for seq in 0..50 {
            let kind = if seq % 2 == 0 { "put" } else { "delete\nmulti" };
            log.log_json(&Event { seq, kind: kind.into() }).unwrap();
        }
    }

    let log = Logger::open_files(&config, 0).unwrap();
    let mut r = log.reader(0).unwrap();
    let mut seen = 0;
    while let Some(event) = r.read_json::<Event>().unwrap() {
        assert_eq!(event.seq, seen);
        seen += 1;
    }
    assert_eq!(seen, 50);
    assert_eq!(r.tell(), log.size());
}
