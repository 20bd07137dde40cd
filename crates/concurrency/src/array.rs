//! Transactional row arrays
//!
//! Record payload:
//!
//! ```text
//! ┌──────────────────┬───────────────┬──────────────────────────────┐
//! │ old len (u32 LE) │ ielem (u32 LE)│ old elements at ielem ..     │
//! └──────────────────┴───────────────┴──────────────────────────────┘
//! ```
//!
//! Only elements that existed before the mutation are saved. Reverting
//! shrinks back to the old length and rewrites the saved elements.

use crate::transaction::{Component, Recorder, Transaction};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use reliant_core::{Error, Result};
use reliant_storage::RowArray;
use std::sync::Arc;

/// A [`RowArray`] whose mutations can be reverted
pub struct Array<A> {
    inner: Mutex<A>,
    recorder: Recorder,
}

impl<A> std::fmt::Debug for Array<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.recorder.id())
            .finish()
    }
}

fn to_u32(what: &str, v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::InvalidArgs(format!("{} {} exceeds u32", what, v)))
}

impl<A: RowArray + Send + 'static> Array<A> {
    /// Register `array` with `txn` under component `id`.
    pub fn open(txn: &Transaction, id: usize, array: A) -> Result<Arc<Self>> {
        txn.register(id, array, |inner, recorder| Array {
            inner: Mutex::new(inner),
            recorder,
        })
    }

    /// Bytes per element
    pub fn elem_len(&self) -> usize {
        self.inner.lock().elem_len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one element.
    pub fn get(&self, ielem: usize, elem: &mut [u8]) -> Result<()> {
        self.inner.lock().get(ielem, elem)
    }

    /// Read consecutive elements; returns how many were copied.
    pub fn gets(&self, ielem: usize, elems: &mut [u8]) -> Result<usize> {
        self.inner.lock().gets(ielem, elems)
    }

    /// Write one element.
    pub fn put(&self, ielem: usize, elem: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&mut inner, ielem, elem.len())?;
        inner.put(ielem, elem)
    }

    /// Write consecutive elements starting at `ielem`.
    pub fn puts(&self, ielem: usize, elems: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&mut inner, ielem, elems.len())?;
        inner.puts(ielem, elems)
    }

    /// Drop every element at or past `n`.
    pub fn shrink(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let len = inner.len();
        if n >= len {
            return Ok(());
        }
        let nbytes = (len - n) * inner.elem_len();
        self.save(&mut inner, n, nbytes)?;
        inner.shrink(n)
    }

    /// Record the elements a write of `nbytes` at `ielem` would overwrite.
    fn save(&self, inner: &mut A, ielem: usize, nbytes: usize) -> Result<()> {
        let elemlen = inner.elem_len();
        if nbytes % elemlen != 0 {
            return Err(Error::InvalidArgs(format!(
                "buffer of {} bytes is not a multiple of element length {}",
                nbytes, elemlen
            )));
        }

        let old_len = inner.len();
        let mut old = vec![0u8; nbytes];
        let n = if ielem < old_len && nbytes > 0 {
            inner.gets(ielem, &mut old)?
        } else {
            0
        };
        old.truncate(n * elemlen);

        let old_len32 = to_u32("array length", old_len)?;
        let ielem32 = to_u32("element index", ielem)?;
        self.recorder.record(|b| {
            let mut head = [0u8; 8];
            LittleEndian::write_u32(&mut head[..4], old_len32);
            LittleEndian::write_u32(&mut head[4..], ielem32);
            b.extend_from_slice(&head);
            b.extend_from_slice(&old);
        })
    }
}

impl<A: RowArray + Send> Component for Array<A> {
    fn do_act(&self, payload: &[u8]) -> Result<()> {
        if payload.len() < 8 {
            return Err(Error::BadData(format!(
                "array revert record of {} bytes",
                payload.len()
            )));
        }
        let old_len = LittleEndian::read_u32(&payload[..4]) as usize;
        let ielem = LittleEndian::read_u32(&payload[4..8]) as usize;

        let mut inner = self.inner.lock();
        inner.shrink(old_len)?;
        inner.puts(ielem, &payload[8..])
    }
}
