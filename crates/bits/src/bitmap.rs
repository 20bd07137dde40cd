//! Flat bitmap
//!
//! A growable `Vec<u64>` plus a free-word cursor `ifree`: no set bit exists
//! below word `ifree`. `find` starts scanning there and moves the cursor up to
//! the word it finds a bit in; any operation that may set a bit below the
//! cursor pulls it back down.

use crate::{apply_range, check_range, BitIndex};
use reliant_core::{Error, Result};

/// Flat, unbounded bitmap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u64>,
    ifree: usize,
}

impl Bitmap {
    /// Empty bitmap
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmap over existing words
    pub fn from_words(data: Vec<u64>) -> Self {
        Bitmap { data, ifree: 0 }
    }

    /// Take the backing words
    pub fn into_words(self) -> Vec<u64> {
        self.data
    }

    fn grow_to(&mut self, i: usize) {
        if i >= self.data.len() {
            self.data.resize(i + 1, 0);
        }
    }

    /// Take the lowest bit of word `i`, which must be nonzero.
    fn take_bit(&mut self, i: usize, v: u64, do_clear: bool) -> usize {
        let bit = v.trailing_zeros() as usize;
        if do_clear {
            self.data[i] &= !(1u64 << bit);
        }
        (i << 6) + bit
    }
}

impl BitIndex for Bitmap {
    fn has(&self, idx: usize) -> bool {
        match self.data.get(idx >> 6) {
            Some(w) => w & (1u64 << (idx & 63)) != 0,
            None => false,
        }
    }

    fn set(&mut self, idx: usize) -> Result<()> {
        let i = idx >> 6;
        self.grow_to(i);
        if i < self.ifree {
            self.ifree = i;
        }
        self.data[i] |= 1u64 << (idx & 63);
        Ok(())
    }

    fn clear(&mut self, idx: usize) -> Result<()> {
        if let Some(w) = self.data.get_mut(idx >> 6) {
            *w &= !(1u64 << (idx & 63));
        }
        Ok(())
    }

    fn set_range(&mut self, from: usize, to: usize) -> Result<()> {
        check_range(from, to)?;
        self.grow_to(to >> 6);
        if from >> 6 < self.ifree {
            self.ifree = from >> 6;
        }
        apply_range(&mut self.data, from, to, true);
        Ok(())
    }

    fn clear_range(&mut self, from: usize, to: usize) -> Result<()> {
        check_range(from, to)?;
        self.grow_to(to >> 6);
        apply_range(&mut self.data, from, to, false);
        Ok(())
    }

    fn find(&mut self, do_clear: bool) -> Result<usize> {
        for i in self.ifree..self.data.len() {
            let v = self.data[i];
            if v != 0 {
                self.ifree = i;
                return Ok(self.take_bit(i, v, do_clear));
            }
        }
        Err(Error::NotFound)
    }

    fn find_from(&mut self, from: usize, do_clear: bool) -> Result<usize> {
        let ifrom = from >> 6;
        let start = ifrom.max(self.ifree);
        for i in start..self.data.len() {
            let mut v = self.data[i];
            // only the word holding `from` has bits below it
            if i == ifrom {
                v &= !((1u64 << (from & 63)) - 1);
            }
            if v != 0 {
                return Ok(self.take_bit(i, v, do_clear));
            }
        }
        Err(Error::NotFound)
    }

    fn words(&self) -> &[u64] {
        &self.data
    }
}
