//! Constant masks for vectorized decode and scan.
//!
//! A W-bit field of value `i` starts at bit `W * i`, i.e. at byte
//! `W * i / 8` with padding `W * i % 8` inside that byte. Since `8 * W`
//! bits is always a whole number of bytes, the byte/padding pattern
//! repeats every 8 values. Two 4-lane mask sets (or one 8-lane set)
//! therefore cover every lane group:
//!
//! - shuffle mask moves the 4 bytes starting at a field's first byte
//!   into one 32-bit lane.
//! - shift multiplier moves the field's top bit to bit 31, so a fixed
//!   right shift by `32 - W` leaves the value at bit 0.
//! - clean mask keeps the field in place, which is enough for equality
//!   tests against a predicate shifted the same way.
//!
//! All functions are pure. Kernels materialize them as vector constants
//! once per call.

use crate::compression::bitpacking::CodeWidth;

/// Lanes covered by one mask period.
pub const MASK_LANES: usize = 8;

/// Alignment of a predicate mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateForm {
    /// Key shifted by lane padding, to compare against cleaned lanes.
    InPlace,
    /// Key broadcast as is, to compare against realigned lanes.
    Realigned,
}

/// Number of values after which the byte alignment repeats:
/// `lcm(8, W) / W`.
#[inline]
pub fn mask_period(width: CodeWidth) -> usize {
    let w = width.bits();
    let mut a = w;
    let mut b = 8;
    while b != 0 {
        (a, b) = (b, a % b);
    }
    8 / a
}

/// Byte of the first bit of each lane.
#[inline]
pub fn byte_offsets(width: CodeWidth) -> [usize; MASK_LANES] {
    std::array::from_fn(|i| width.bits() * i / 8)
}

/// Bit offset of each lane within its first byte.
#[inline]
pub fn bit_paddings(width: CodeWidth) -> [u32; MASK_LANES] {
    std::array::from_fn(|i| (width.bits() * i % 8) as u32)
}

#[inline]
fn fill_lane(mask: &mut [u8], lane: usize, offset: usize) {
    for (j, b) in mask[lane * 4..lane * 4 + 4].iter_mut().enumerate() {
        *b = (offset + j) as u8;
    }
}

/// Byte shuffle masks for lanes 0-3 and lanes 4-7.
///
/// The second mask is relative to the byte where lane 4 starts, so each
/// mask applies to a 128-bit register loaded at its lane group's first
/// byte.
#[inline]
pub fn shuffle_masks(width: CodeWidth) -> [[u8; 16]; 2] {
    let offsets = byte_offsets(width);
    let correction = offsets[4];
    let mut res = [[0u8; 16]; 2];
    for lane in 0..4 {
        fill_lane(&mut res[0], lane, offsets[lane]);
        fill_lane(&mut res[1], lane, offsets[lane + 4] - correction);
    }
    res
}

/// Byte shuffle mask of 8 lanes, for a 256-bit register whose low half
/// is loaded at lane 0 and high half at lane 4.
#[inline]
pub fn shuffle_mask_256(width: CodeWidth) -> [u8; 32] {
    let [lo, hi] = shuffle_masks(width);
    let mut res = [0u8; 32];
    res[..16].copy_from_slice(&lo);
    res[16..].copy_from_slice(&hi);
    res
}

/// Multipliers that left shift each lane so that its field ends at bit 31.
#[inline]
pub fn shift_multipliers(width: CodeWidth) -> [u32; MASK_LANES] {
    let free_bits = width.free_bits();
    bit_paddings(width).map(|pad| 1u32 << (free_bits - pad))
}

/// Per-lane right shift amounts, used with variable shift instructions.
#[inline]
pub fn shift_amounts(width: CodeWidth) -> [u32; MASK_LANES] {
    bit_paddings(width)
}

/// Per-lane AND masks keeping the field at its original position.
#[inline]
pub fn clean_masks(width: CodeWidth) -> [u32; MASK_LANES] {
    let mask = width.value_mask();
    bit_paddings(width).map(|pad| mask << pad)
}

/// Per-lane predicate values.
///
/// Key must be less than 2^W; larger keys never match any value and are
/// filtered before kernels run.
#[inline]
pub fn predicate_masks(width: CodeWidth, key: u32, form: PredicateForm) -> [u32; MASK_LANES] {
    debug_assert!(key <= width.value_mask());
    match form {
        PredicateForm::InPlace => bit_paddings(width).map(|pad| key << pad),
        PredicateForm::Realigned => [key; MASK_LANES],
    }
}

/// Shuffle mask and multipliers of 4 lanes starting at value `first`,
/// for a 128-bit register loaded at byte `base`.
///
/// Used when masks are regenerated for every lane group instead of
/// relying on the period of 8.
#[inline]
pub fn window_masks(width: CodeWidth, first: usize, base: usize) -> ([u8; 16], [u32; 4]) {
    let free_bits = width.free_bits();
    let mut shuffle = [0u8; 16];
    let mut mult = [0u32; 4];
    for lane in 0..4 {
        let bit = width.bits() * (first + lane);
        let offset = bit / 8 - base;
        debug_assert!(offset + 3 < 16);
        fill_lane(&mut shuffle, lane, offset);
        mult[lane] = 1u32 << (free_bits - (bit % 8) as u32);
    }
    (shuffle, mult)
}
