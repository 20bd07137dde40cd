//! BigArray must be indistinguishable from Array through the RowArray trait

use proptest::prelude::*;
use reliant_core::{replica, MemFile, ReplicaConfig};
use reliant_storage::{Array, BigArray, RowArray, Table};
use std::sync::Arc;
use tempfile::TempDir;

const ELEM: usize = 8;
const SPAN: usize = 8;

fn pair() -> (Array, BigArray, Arc<MemFile>, Arc<MemFile>) {
    let a_mem = Arc::new(MemFile::new());
    let b_mem = Arc::new(MemFile::new());
    let a = Array::open(Table::open(replica::from_files([a_mem.clone()]), ELEM, 0).unwrap()).unwrap();
    let b = BigArray::open(
        Table::open(replica::from_files([b_mem.clone()]), ELEM, 0).unwrap(),
        SPAN,
    )
    .unwrap();
    (a, b, a_mem, b_mem)
}

fn elem(v: u8) -> [u8; ELEM] {
    [v; ELEM]
}

fn dump<A: RowArray>(a: &mut A) -> Vec<u8> {
    let mut buf = vec![0u8; a.len() * a.elem_len()];
    if a.is_empty() {
        return buf;
    }
    let n = a.gets(0, &mut buf).unwrap();
    assert_eq!(n, a.len());
    buf
}

#[test]
fn test_span_boundaries() {
    let (mut a, mut b, a_mem, b_mem) = pair();
    for i in [SPAN - 1, SPAN, 2 * SPAN - 1, 2 * SPAN, 5 * SPAN + 3] {
        a.put(i, &elem(i as u8)).unwrap();
        b.put(i, &elem(i as u8)).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(dump(&mut a), dump(&mut b));
    }
    // same bytes on disk
    assert_eq!(a_mem.snapshot(), b_mem.snapshot());
}

#[test]
fn test_puts_across_spans() {
    let (mut a, mut b, _, _) = pair();
    let data: Vec<u8> = (0..3 * SPAN as u8).flat_map(elem).collect();
    a.puts(SPAN / 2, &data).unwrap();
    b.puts(SPAN / 2, &data).unwrap();
    assert_eq!(dump(&mut a), dump(&mut b));

    let mut ea = vec![0u8; 4 * ELEM];
    let mut eb = vec![0u8; 4 * ELEM];
    assert_eq!(a.gets(SPAN + 2, &mut ea).unwrap(), b.gets(SPAN + 2, &mut eb).unwrap());
    assert_eq!(ea, eb);
}

#[test]
fn test_shrink_mid_span_then_grow() {
    let (mut a, mut b, a_mem, b_mem) = pair();
    for i in 0..(2 * SPAN + 5) {
        a.put(i, &elem(i as u8 + 1)).unwrap();
        b.put(i, &elem(i as u8 + 1)).unwrap();
    }
    a.shrink(SPAN + 3).unwrap();
    b.shrink(SPAN + 3).unwrap();
    assert_eq!(b.len(), SPAN + 3);
    assert_eq!(dump(&mut a), dump(&mut b));

    a.put(SPAN + 6, &elem(0xee)).unwrap();
    b.put(SPAN + 6, &elem(0xee)).unwrap();
    assert_eq!(dump(&mut a), dump(&mut b));
    assert_eq!(a_mem.snapshot(), b_mem.snapshot());

    // dropped rows read back as zero after regrowth
    let mut e = [0xffu8; ELEM];
    b.get(SPAN + 4, &mut e).unwrap();
    assert_eq!(e, [0; ELEM]);
}

#[test]
fn test_reopen_from_disk() {
    let dir = TempDir::new().unwrap();
    let config = ReplicaConfig::single(dir.path().join("big.tbl"));
    {
        let mut b = BigArray::open_files(&config, ELEM, SPAN).unwrap();
        for i in 0..20 {
            b.put(i * 3, &elem(i as u8)).unwrap();
        }
    }

    let mut b = BigArray::open_files(&config, ELEM, SPAN).unwrap();
    let mut a = Array::open_files(&config, ELEM).unwrap();
    assert_eq!(b.len(), 58);
    assert_eq!(b.resident_spans(), 0);
    assert_eq!(dump(&mut a), dump(&mut b));
}

#[derive(Debug, Clone)]
enum Op {
    Put(usize, u8),
    Puts(usize, u8, usize),
    Shrink(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..60, any::<u8>()).prop_map(|(i, v)| Op::Put(i, v)),
        2 => (0usize..60, any::<u8>(), 1usize..12).prop_map(|(i, v, n)| Op::Puts(i, v, n)),
        1 => (0usize..60).prop_map(Op::Shrink),
    ]
}

proptest! {
    #[test]
    fn prop_big_array_matches_array(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let (mut a, mut b, a_mem, b_mem) = pair();
        for op in &ops {
            match *op {
                Op::Put(i, v) => {
                    a.put(i, &elem(v)).unwrap();
                    b.put(i, &elem(v)).unwrap();
                }
                Op::Puts(i, v, n) => {
                    let data: Vec<u8> = (0..n).flat_map(|k| elem(v.wrapping_add(k as u8))).collect();
                    a.puts(i, &data).unwrap();
                    b.puts(i, &data).unwrap();
                }
                Op::Shrink(n) => {
                    a.shrink(n).unwrap();
                    b.shrink(n).unwrap();
                }
            }
            prop_assert_eq!(a.len(), b.len());
        }
        prop_assert_eq!(dump(&mut a), dump(&mut b));
        prop_assert_eq!(a_mem.snapshot(), b_mem.snapshot());
    }
}
