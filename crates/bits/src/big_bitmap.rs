//! Hierarchical bitmap with a 64-ary summary index
//!
//! # Layout
//!
//! `indexs` is an implicit 64-ary tree stored level by level:
//!
//! ```text
//! node 0                 root
//! nodes 1 ..= 64         level 1
//! nodes 65 ..= 4160      level 2
//! ...
//! nodes min ..           data words (virtual: data word w is node min + w)
//! ```
//!
//! The children of node `n` are `64n + 1 ..= 64n + 64`, the parent of node
//! `k` is `(k - 1) >> 6`. Bit `j` of node `n` is set iff child `64n + 1 + j`
//! is nonzero. Because every level starts at a multiple of 64 plus one, the
//! bit a node occupies in its parent equals its position within its own
//! level, masked to 6 bits.
//!
//! Capacity (`ncap` data words) is fixed at construction.

use crate::{apply_range, check_range, BitIndex};
use reliant_core::{Error, Result};

/// Smallest supported capacity in bits
pub const MIN_CAP_BITS: usize = 1 << 12;

/// Fixed-capacity bitmap with O(log64 N) first-set-bit search
#[derive(Debug, Clone)]
pub struct BigBitmap {
    data: Vec<u64>,
    indexs: Vec<u64>,
    min: usize,
    ncap: usize,
}

/// `(min, ncap)` for a bitmap able to hold `maxbits` bits.
fn capacity_for(maxbits: usize) -> (usize, usize) {
    let maxbits = maxbits.max(MIN_CAP_BITS);
    let level = floor_log2((maxbits - 1) as u64) / 6;

    let mut min = 1usize;
    for _ in 2..=level {
        min = (min << 6) + 1;
    }
    let max = (min << 6) + 1;
    (min, max - min)
}

#[inline]
fn floor_log2(v: u64) -> usize {
    63 - v.leading_zeros() as usize
}

impl BigBitmap {
    /// Bitmap able to hold at least `maxbits` bits, seeded with `data`.
    ///
    /// `maxbits` below 4096 is raised to 4096. Seeding more words than the
    /// resulting capacity fails with `OutOfRange`.
    pub fn new(data: Vec<u64>, maxbits: usize) -> Result<Self> {
        let (min, ncap) = capacity_for(maxbits);
        if data.len() > ncap {
            return Err(Error::OutOfRange {
                index: data.len() - 1,
                capacity: ncap,
            });
        }

        let mut bitmap = BigBitmap {
            data,
            indexs: vec![0; min],
            min,
            ncap,
        };
        if !bitmap.data.is_empty() {
            let last = bitmap.data.len() - 1;
            bitmap.update_range(0, last);
        }
        Ok(bitmap)
    }

    /// Empty bitmap able to hold at least `maxbits` bits
    pub fn with_capacity(maxbits: usize) -> Self {
        let (min, ncap) = capacity_for(maxbits);
        BigBitmap {
            data: Vec::new(),
            indexs: vec![0; min],
            min,
            ncap,
        }
    }

    /// Capacity in words of a bitmap built for `maxbits` bits
    pub fn words_for(maxbits: usize) -> usize {
        capacity_for(maxbits).1
    }

    /// Capacity in words
    pub fn capacity_words(&self) -> usize {
        self.ncap
    }

    /// Capacity in bits
    pub fn capacity_bits(&self) -> usize {
        self.ncap << 6
    }

    /// Take the backing words
    pub fn into_words(self) -> Vec<u64> {
        self.data
    }

    // ========================================================================
    // Growth
    // ========================================================================

    /// Make word `i` addressable. Grows in 64-word steps, never past capacity.
    fn grow_to(&mut self, i: usize) -> Result<()> {
        if i < self.data.len() {
            return Ok(());
        }
        if i >= self.ncap {
            return Err(Error::OutOfRange {
                index: i,
                capacity: self.ncap,
            });
        }
        let want = i + 1 - self.data.len();
        let len = (self.data.len() + ((want + 63) & !63)).min(self.ncap);
        self.data.resize(len, 0);
        Ok(())
    }

    // ========================================================================
    // Summary maintenance
    // ========================================================================

    /// Mark node `i` nonzero in its ancestors. Stops as soon as an ancestor
    /// was already nonzero before the update.
    fn set_flag(&mut self, mut oldv: u64, mut i: usize, mut idx: usize) {
        while oldv == 0 && i > 0 {
            i = (i - 1) >> 6;
            idx >>= 6;
            oldv = self.indexs[i];
            self.indexs[i] |= 1u64 << (idx & 63);
        }
    }

    /// Mark node `i` zero in its ancestors, continuing while each visited
    /// ancestor became zero too.
    fn clear_flag(&mut self, mut i: usize, mut idx: usize) {
        loop {
            i = (i - 1) >> 6;
            idx >>= 6;
            self.indexs[i] &= !(1u64 << (idx & 63));
            if i == 0 || self.indexs[i] != 0 {
                break;
            }
        }
    }

    /// Re-derive the summary words covering data words `ifrom..=ito`, then
    /// walk up, stopping at the first level where nothing changed.
    fn update_range(&mut self, mut ifrom: usize, mut ito: usize) {
        // `min` is the first node of the level being summarized; the source
        // words of that level are `data` at the bottom, `indexs[min..]` above.
        let mut min = self.min;
        let mut bottom = true;

        loop {
            let mut changed: Option<(usize, usize)> = None;
            for span in (ifrom >> 6)..=(ito >> 6) {
                let base = span << 6;
                let summary = {
                    let src: &[u64] = if bottom {
                        &self.data
                    } else {
                        &self.indexs[min..]
                    };
                    summarize(src, base)
                };
                let parent = (min + base - 1) >> 6;
                if self.indexs[parent] != summary {
                    self.indexs[parent] = summary;
                    changed = Some(match changed {
                        Some((first, _)) => (first, parent),
                        None => (parent, parent),
                    });
                }
            }

            let (first, last) = match changed {
                Some((first, last)) if first > 0 => (first, last),
                _ => break,
            };
            min = (min - 1) >> 6;
            bottom = false;
            ifrom = first - min;
            ito = last - min;
        }
    }

    /// Lowest set bit in the subtree rooted at node `i`.
    fn find_in(&mut self, mut i: usize, do_clear: bool) -> Result<usize> {
        while i < self.min {
            let v = self.indexs[i];
            if v == 0 {
                return Err(Error::NotFound);
            }
            i = (i << 6) + 1 + v.trailing_zeros() as usize;
        }
        let w = i - self.min;
        let v = self.data[w];
        Ok(self.take_bit(w, v, do_clear))
    }

    /// Take the lowest bit of `v`, a (possibly masked) nonzero view of word `w`.
    fn take_bit(&mut self, w: usize, v: u64, do_clear: bool) -> usize {
        let bit = v.trailing_zeros() as usize;
        let idx = (w << 6) + bit;
        if do_clear {
            self.data[w] &= !(1u64 << bit);
            if self.data[w] == 0 {
                self.clear_flag(self.min + w, idx);
            }
        }
        idx
    }
}

/// Summary word for the 64 source words starting at `base`.
fn summarize(src: &[u64], base: usize) -> u64 {
    let end = src.len().min(base + 64);
    let mut summary = 0u64;
    for (j, &w) in src.get(base..end).unwrap_or(&[]).iter().enumerate() {
        if w != 0 {
            summary |= 1u64 << j;
        }
    }
    summary
}

impl BitIndex for BigBitmap {
    fn has(&self, idx: usize) -> bool {
        match self.data.get(idx >> 6) {
            Some(w) => w & (1u64 << (idx & 63)) != 0,
            None => false,
        }
    }

    fn set(&mut self, idx: usize) -> Result<()> {
        let i = idx >> 6;
        self.grow_to(i)?;
        let oldv = self.data[i];
        self.data[i] |= 1u64 << (idx & 63);
        self.set_flag(oldv, self.min + i, idx);
        Ok(())
    }

    fn clear(&mut self, idx: usize) -> Result<()> {
        let i = idx >> 6;
        let mask = 1u64 << (idx & 63);
        if i >= self.data.len() || self.data[i] & mask == 0 {
            return Ok(());
        }
        self.data[i] &= !mask;
        if self.data[i] == 0 {
            self.clear_flag(self.min + i, idx);
        }
        Ok(())
    }

    fn set_range(&mut self, from: usize, to: usize) -> Result<()> {
        check_range(from, to)?;
        self.grow_to(to >> 6)?;
        apply_range(&mut self.data, from, to, true);
        self.update_range(from >> 6, to >> 6);
        Ok(())
    }

    fn clear_range(&mut self, from: usize, to: usize) -> Result<()> {
        check_range(from, to)?;
        self.grow_to(to >> 6)?;
        apply_range(&mut self.data, from, to, false);
        self.update_range(from >> 6, to >> 6);
        Ok(())
    }

    fn find(&mut self, do_clear: bool) -> Result<usize> {
        self.find_in(0, do_clear)
    }

    fn find_from(&mut self, from: usize, do_clear: bool) -> Result<usize> {
        let mut i = from >> 6;
        if i >= self.data.len() {
            return Err(Error::NotFound);
        }

        let v = self.data[i] & !((1u64 << (from & 63)) - 1);
        if v != 0 {
            return Ok(self.take_bit(i, v, do_clear));
        }

        // Climb: at each level look for a later sibling in the same parent
        // word; if none, move to the parent and repeat.
        let mut max = self.min;
        while max > 0 {
            let pmin = (max - 1) >> 6;
            let next = i + 1;
            i = next >> 6;
            if pmin + i >= max {
                break;
            }
            let v = self.indexs[pmin + i] & !((1u64 << (next & 63)) - 1);
            if v == 0 {
                max = pmin;
                continue;
            }
            let child = ((pmin + i) << 6) + 1 + v.trailing_zeros() as usize;
            return self.find_in(child, do_clear);
        }
        Err(Error::NotFound)
    }

    fn words(&self) -> &[u64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_pins() {
        assert_eq!(capacity_for(1), (1, 64));
        assert_eq!(capacity_for(4096), (1, 64));
        assert_eq!(capacity_for(4097), (65, 4096));
        assert_eq!(capacity_for(1 << 18), (65, 4096));
        assert_eq!(capacity_for((1 << 18) + 1), (4161, 262_144));
        assert_eq!(capacity_for(100_000_000), (266_305, 16_777_216));
    }

    #[test]
    fn test_new_rejects_oversized_seed() {
        let err = BigBitmap::new(vec![0; 65], 4096).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { capacity: 64, .. }));
    }

    #[test]
    fn test_seed_builds_index() {
        let mut data = vec![0u64; 100];
        data[77] = 1 << 9;
        let mut b = BigBitmap::new(data, 1 << 18).unwrap();
        assert_eq!(b.find(false).unwrap(), 77 * 64 + 9);
        assert!(b.find_from(77 * 64 + 10, false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_out_of_range() {
        let mut b = BigBitmap::with_capacity(4096);
        assert!(b.set(4095).is_ok());
        assert!(matches!(b.set(4096), Err(Error::OutOfRange { .. })));
        assert!(matches!(
            b.set_range(4000, 4096),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_growth_steps_and_clamp() {
        let mut b = BigBitmap::with_capacity(4097);
        b.set(0).unwrap();
        assert_eq!(b.words().len(), 64);
        b.set(64 * 64 + 1).unwrap();
        assert_eq!(b.words().len(), 128);

        let mut small = BigBitmap::new(vec![0; 10], 4096).unwrap();
        small.set(63 * 64).unwrap();
        assert_eq!(small.words().len(), 64);
    }

    #[test]
    fn test_clear_propagates_to_root() {
        let mut b = BigBitmap::with_capacity(1 << 20);
        b.set(123_456).unwrap();
        assert_eq!(b.find(true).unwrap(), 123_456);
        assert!(b.indexs.iter().all(|&w| w == 0));
        assert!(b.find(false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_find_from_climbs_levels() {
        let mut b = BigBitmap::with_capacity(100_000_000);
        b.set(5).unwrap();
        b.set(64 * 64 * 64 * 3 + 17).unwrap();
        assert_eq!(b.find_from(6, false).unwrap(), 64 * 64 * 64 * 3 + 17);
        assert_eq!(b.find_from(0, false).unwrap(), 5);
    }

    #[test]
    fn test_range_updates_index() {
        let mut b = BigBitmap::with_capacity(1 << 20);
        b.set_range(1000, 200_000).unwrap();
        assert_eq!(b.find(false).unwrap(), 1000);
        b.clear_range(0, 150_000).unwrap();
        assert_eq!(b.find(false).unwrap(), 150_001);
        b.clear_range(150_001, 200_000).unwrap();
        assert!(b.find(false).unwrap_err().is_not_found());
        assert!(b.indexs.iter().all(|&w| w == 0));
    }
}
