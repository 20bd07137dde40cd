//! In-memory bit indices for reliant
//!
//! Two implementations of the same [`BitIndex`] contract:
//! - [`Bitmap`]: flat, unbounded, linear scan from a free-word cursor
//! - [`BigBitmap`]: fixed capacity with a 64-ary summary tree, O(log64 N) search
//!
//! Both are pure memory structures. Persistence lives in `reliant-storage`,
//! which wraps either one behind the same trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod big_bitmap;
pub mod bitmap;
pub mod count;

pub use big_bitmap::BigBitmap;
pub use bitmap::Bitmap;
pub use count::count;

use reliant_core::Result;

/// Bit set with "first set bit" search.
///
/// Indices are bit positions; word `idx >> 6` holds bit `idx & 63`.
/// Ranges are inclusive on both ends and fail with `InvalidArgs` when
/// `from > to`.
pub trait BitIndex {
    /// True if bit `idx` is set. Bits past the end read as clear.
    fn has(&self, idx: usize) -> bool;

    /// Set bit `idx`, growing as needed.
    fn set(&mut self, idx: usize) -> Result<()>;

    /// Clear bit `idx`. Clearing past the end is a no-op.
    fn clear(&mut self, idx: usize) -> Result<()>;

    /// Set bits `from..=to`.
    fn set_range(&mut self, from: usize, to: usize) -> Result<()>;

    /// Clear bits `from..=to`.
    fn clear_range(&mut self, from: usize, to: usize) -> Result<()>;

    /// Lowest set bit, optionally clearing it. `NotFound` if none.
    fn find(&mut self, do_clear: bool) -> Result<usize>;

    /// Lowest set bit `>= from`, optionally clearing it. `NotFound` if none.
    fn find_from(&mut self, from: usize, do_clear: bool) -> Result<usize>;

    /// Backing words
    fn words(&self) -> &[u64];
}

/// Masks for an inclusive bit range inside words `from >> 6 ..= to >> 6`.
///
/// Returns `(mfrom, mto)`: `mfrom` covers the bits *below* `from` in the first
/// word, `mto` the bits *up to and including* `to` in the last word.
#[inline]
pub(crate) fn range_masks(from: usize, to: usize) -> (u64, u64) {
    let mfrom = (1u64 << (from & 63)) - 1;
    let mut mto = (1u64 << ((to + 1) & 63)).wrapping_sub(1);
    if mto == 0 {
        mto = !0;
    }
    (mfrom, mto)
}

/// Apply a set or clear over `words[ifrom..=ito]` with the given masks.
pub(crate) fn apply_range(words: &mut [u64], from: usize, to: usize, set: bool) {
    let ifrom = from >> 6;
    let ito = to >> 6;
    let (mfrom, mto) = range_masks(from, to);

    if ifrom == ito {
        if set {
            words[ito] |= mfrom ^ mto;
        } else {
            words[ito] &= !(mfrom ^ mto);
        }
        return;
    }

    if set {
        words[ifrom] |= !mfrom;
        words[ifrom + 1..ito].fill(!0);
        words[ito] |= mto;
    } else {
        words[ifrom] &= mfrom;
        words[ifrom + 1..ito].fill(0);
        words[ito] &= !mto;
    }
}

pub(crate) fn check_range(from: usize, to: usize) -> Result<()> {
    if from > to {
        return Err(reliant_core::Error::InvalidArgs(format!(
            "bit range {}..={} is reversed",
            from, to
        )));
    }
    Ok(())
}
