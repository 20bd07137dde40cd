//! Transactional bitmaps
//!
//! Record payload: the index of the first saved word (u32 LE) followed by the
//! saved words (u64 LE each). A mutation over bits `from..=to` saves words
//! `from >> 6 ..= to >> 6`, zero for words past the current end. Reverting
//! sets or clears every bit of those words that differs from the saved value.

use crate::transaction::{Component, Recorder, Transaction};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use reliant_bits::BitIndex;
use reliant_core::{Error, Result};
use reliant_storage::Underlayer;
use std::sync::Arc;

/// A [`BitIndex`] whose mutations can be reverted
pub struct Bitmap<B> {
    inner: Mutex<B>,
    recorder: Recorder,
}

impl<B> std::fmt::Debug for Bitmap<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("id", &self.recorder.id())
            .finish()
    }
}

impl<B> Bitmap<B>
where
    B: BitIndex + Underlayer + Send + 'static,
{
    /// Register `bitmap` with `txn` under component `id`.
    pub fn open(txn: &Transaction, id: usize, bitmap: B) -> Result<Arc<Self>> {
        txn.register(id, bitmap, |inner, recorder| Bitmap {
            inner: Mutex::new(inner),
            recorder,
        })
    }

    /// True if bit `idx` is set
    pub fn has(&self, idx: usize) -> bool {
        self.inner.lock().has(idx)
    }

    /// Copy of the bitmap's words
    pub fn words(&self) -> Vec<u64> {
        self.inner.lock().words().to_vec()
    }

    /// Set bit `idx`.
    pub fn set(&self, idx: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&inner, idx, idx)?;
        inner.set(idx)
    }

    /// Clear bit `idx`.
    pub fn clear(&self, idx: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&inner, idx, idx)?;
        inner.clear(idx)
    }

    /// Set bits `from..=to`.
    pub fn set_range(&self, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&inner, from, to)?;
        inner.set_range(from, to)
    }

    /// Clear bits `from..=to`.
    pub fn clear_range(&self, from: usize, to: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.save(&inner, from, to)?;
        inner.clear_range(from, to)
    }

    /// Lowest set bit; cleared (and recorded) if `do_clear`.
    pub fn find(&self, do_clear: bool) -> Result<usize> {
        let mut inner = self.inner.lock();
        let idx = inner.find(false)?;
        if do_clear {
            self.save(&inner, idx, idx)?;
            inner.clear(idx)?;
        }
        Ok(idx)
    }

    /// Lowest set bit at or after `from`; cleared (and recorded) if `do_clear`.
    pub fn find_from(&self, from: usize, do_clear: bool) -> Result<usize> {
        let mut inner = self.inner.lock();
        let idx = inner.find_from(from, false)?;
        if do_clear {
            self.save(&inner, idx, idx)?;
            inner.clear(idx)?;
        }
        Ok(idx)
    }

    fn save(&self, inner: &B, from: usize, to: usize) -> Result<()> {
        if from > to {
            return Err(Error::InvalidArgs(format!(
                "bit range {}..={} is reversed",
                from, to
            )));
        }
        let ifrom = from >> 6;
        let ito = to >> 6;
        let first = u32::try_from(ifrom)
            .map_err(|_| Error::InvalidArgs(format!("word index {} exceeds u32", ifrom)))?;

        let words = inner.words();
        self.recorder.record(|b| {
            let mut buf = [0u8; 8];
            LittleEndian::write_u32(&mut buf[..4], first);
            b.extend_from_slice(&buf[..4]);
            for i in ifrom..=ito {
                LittleEndian::write_u64(&mut buf, words.get(i).copied().unwrap_or(0));
                b.extend_from_slice(&buf);
            }
        })
    }
}

impl<B: BitIndex + Send> Component for Bitmap<B> {
    fn do_act(&self, payload: &[u8]) -> Result<()> {
        if payload.len() < 4 || (payload.len() - 4) % 8 != 0 {
            return Err(Error::BadData(format!(
                "bitmap revert record of {} bytes",
                payload.len()
            )));
        }
        let base = (LittleEndian::read_u32(&payload[..4]) as usize) << 6;

        let mut inner = self.inner.lock();
        for (k, chunk) in payload[4..].chunks_exact(8).enumerate() {
            let saved = LittleEndian::read_u64(chunk);
            for bit in 0..64 {
                let idx = base + k * 64 + bit;
                let want = (saved >> bit) & 1 == 1;
                if inner.has(idx) == want {
                    continue;
                }
                if want {
                    inner.set(idx)?;
                } else {
                    inner.clear(idx)?;
                }
            }
        }
        Ok(())
    }
}
