//! Bit population over a range of words

use crate::{check_range, range_masks};
use reliant_core::Result;

/// Count set and clear bits in `from..=to`.
///
/// Returns `(ones, zeros)`. Bits past the end of `words` count as zeros.
pub fn count(words: &[u64], from: usize, to: usize) -> Result<(usize, usize)> {
    check_range(from, to)?;

    let ifrom = from >> 6;
    let (mfrom, mut mto) = range_masks(from, to);
    let mut ito = to >> 6;
    if ito >= words.len() {
        if words.is_empty() {
            return Ok((0, to - from + 1));
        }
        ito = words.len() - 1;
        mto = !0;
    }

    let mut ones = 0usize;
    for (i, &word) in words.iter().enumerate().take(ito + 1).skip(ifrom) {
        let mut v = word;
        if i == ifrom {
            v &= !mfrom;
        }
        if i == ito {
            v &= mto;
        }
        ones += v.count_ones() as usize;
    }
    Ok((ones, to - from + 1 - ones))
}
