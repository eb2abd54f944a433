//! Bitpacking compression
//!
//! Values are packed with a fixed code width of 1 to 16 bits into
//! little-endian 64-bit words. A value may straddle two words: its low
//! bits fill the top of the current word and its high bits start the
//! next one.
//!
//! The buffer is padded so that vector kernels can issue full 128-bit
//! and 256-bit loads at any position up to the last value.

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Bits of a packing word.
pub const WORD_BITS: usize = 64;

/// Words of one 256-bit block.
pub const BLOCK_WORDS: usize = 4;

/// Trailing bytes kept past the live words for vector loads.
pub const VECTOR_PADDING: usize = 32;

/// Number of bits used by every value in a compressed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CodeWidth(u8);

impl CodeWidth {
    pub const MIN: usize = 1;
    pub const MAX: usize = 16;

    /// Create a code width, returns error if not within [1, 16].
    #[inline]
    pub fn new(bits: usize) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&bits) {
            Ok(CodeWidth(bits as u8))
        } else {
            Err(Error::InvalidCodeWidth(bits))
        }
    }

    /// Returns the smallest width able to hold given value.
    #[inline]
    pub fn for_max_value(max: u32) -> Result<Self> {
        let bits = (32 - max.leading_zeros() as usize).max(Self::MIN);
        Self::new(bits)
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0 as usize
    }

    /// Mask of the low W bits.
    #[inline]
    pub const fn value_mask(self) -> u32 {
        (1u32 << self.0) - 1
    }

    /// Unused high bits of a 32-bit lane holding one value.
    #[inline]
    pub const fn free_bits(self) -> u32 {
        32 - self.0 as u32
    }
}

impl TryFrom<u8> for CodeWidth {
    type Error = Error;
    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        CodeWidth::new(value as usize)
    }
}

impl From<CodeWidth> for u8 {
    #[inline]
    fn from(value: CodeWidth) -> u8 {
        value.0
    }
}

/// Returns number of live words for n values.
#[inline]
pub const fn packed_words(width: CodeWidth, n: usize) -> usize {
    (width.bits() * n).div_ceil(WORD_BITS)
}

/// Returns minimum byte length of a compressed buffer for n values.
#[inline]
pub const fn compressed_size(width: CodeWidth, n: usize) -> usize {
    (width.bits() * n).div_ceil(8) + VECTOR_PADDING
}

/// Returns byte length of decode output for n values.
#[inline]
pub const fn decoded_size(n: usize) -> usize {
    n * 4 + 32
}

/// Returns entry count of decode output for n values.
/// Kernels store whole lane groups and may write up to 8 entries past n.
#[inline]
pub const fn decoded_len(n: usize) -> usize {
    decoded_size(n) / 4
}

/// 256-bit aligned block of packed words.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Block([u64; BLOCK_WORDS]);

// SAFETY: Block is four u64 with size equal to its alignment, so it has
// no padding bytes and every bit pattern is valid.
unsafe impl Zeroable for Block {}
unsafe impl Pod for Block {}

/// Compressed buffer.
///
/// Live words are rounded up to whole 256-bit blocks, followed by one
/// zeroed padding block. The buffer does not record width or value
/// count, both must be supplied by caller on every decode or scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBuf {
    blocks: Box<[Block]>,
}

impl CompressedBuf {
    /// Create a zeroed buffer able to hold given number of live words.
    #[inline]
    pub fn zeroed(words: usize) -> Self {
        let n_blocks = words.div_ceil(BLOCK_WORDS) + VECTOR_PADDING / 32;
        CompressedBuf {
            blocks: vec![Block::default(); n_blocks].into_boxed_slice(),
        }
    }

    /// Returns the buffer as 64-bit words.
    #[inline]
    pub fn words(&self) -> &[u64] {
        bytemuck::cast_slice(&self.blocks)
    }

    #[inline]
    fn words_mut(&mut self) -> &mut [u64] {
        bytemuck::cast_slice_mut(&mut self.blocks)
    }

    /// Returns the buffer as bytes, 32-byte aligned.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    /// Total byte length including padding.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len() * 32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Data type that supports bitpacking.
pub trait BitPackable: Copy {
    fn to_code(self) -> u64;
}

macro_rules! impl_bit_packable {
    ($($t:ty),*) => {
        $(
            impl BitPackable for $t {
                #[inline(always)]
                fn to_code(self) -> u64 {
                    self as u64
                }
            }
        )*
    }
}

impl_bit_packable!(u8, u16, u32, u64, usize);

/// Returns the smallest code width covering all input values.
/// Returns None if input is empty or any value needs more than 16 bits.
#[inline]
pub fn min_code_width<T: BitPackable>(input: &[T]) -> Option<CodeWidth> {
    let max = input.iter().map(|v| v.to_code()).max()?;
    if max >= 1 << CodeWidth::MAX {
        return None;
    }
    CodeWidth::for_max_value(max as u32).ok()
}

/// Pack values with given code width.
/// User has to guarantee all values are less than 2^W.
#[inline]
pub fn pack<T: BitPackable>(input: &[T], width: CodeWidth) -> CompressedBuf {
    let mut res = CompressedBuf::zeroed(packed_words(width, input.len()));
    pack_into(input, width, res.words_mut());
    log::debug!(
        "bitpacking: packed {} values, width={}, bytes={}",
        input.len(),
        width.bits(),
        res.len()
    );
    res
}

/// Pack values into pre-allocated words.
/// Words must be zeroed and hold at least `packed_words(width, input.len())`.
#[inline]
pub fn pack_into<T: BitPackable>(input: &[T], width: CodeWidth, words: &mut [u64]) {
    debug_assert!(words.len() >= packed_words(width, input.len()));
    let bits = width.bits();
    let mut word_idx = 0;
    let mut remaining = WORD_BITS;
    for v in input {
        let code = v.to_code();
        debug_assert!(code <= width.value_mask() as u64);
        // bits exceeding the word are dropped here and written below.
        words[word_idx] |= code << (WORD_BITS - remaining);
        if remaining > bits {
            remaining -= bits;
        } else if remaining == bits {
            word_idx += 1;
            remaining = WORD_BITS;
        } else {
            // value straddles two words.
            word_idx += 1;
            words[word_idx] |= code >> remaining;
            remaining = WORD_BITS - (bits - remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn width(bits: usize) -> CodeWidth {
        CodeWidth::new(bits).unwrap()
    }

    /// Reads value at idx bit by bit.
    fn read_bits(words: &[u64], width: CodeWidth, idx: usize) -> u64 {
        let start = idx * width.bits();
        (0..width.bits())
            .map(|i| {
                let pos = start + i;
                ((words[pos / 64] >> (pos % 64)) & 1) << i
            })
            .sum()
    }

    #[test]
    fn test_code_width() {
        assert!(CodeWidth::new(0).is_err());
        assert!(CodeWidth::new(17).is_err());
        let w = width(9);
        assert_eq!(w.bits(), 9);
        assert_eq!(w.value_mask(), 0x1FF);
        assert_eq!(w.free_bits(), 23);
        assert_eq!(CodeWidth::for_max_value(0).unwrap().bits(), 1);
        assert_eq!(CodeWidth::for_max_value(511).unwrap().bits(), 9);
        assert_eq!(CodeWidth::for_max_value(512).unwrap().bits(), 10);
        assert!(CodeWidth::for_max_value(1 << 16).is_err());
        assert!(CodeWidth::try_from(16u8).is_ok());
        assert_eq!(u8::from(w), 9);
    }

    #[test]
    fn test_sizes() {
        let w = width(9);
        assert_eq!(packed_words(w, 0), 0);
        assert_eq!(packed_words(w, 7), 1);
        assert_eq!(packed_words(w, 8), 2);
        assert_eq!(compressed_size(w, 12), 14 + 32);
        assert_eq!(decoded_size(12), 80);
        assert_eq!(decoded_len(12), 20);
        for n in [0, 1, 7, 8, 100, 509, 1000] {
            for bits in 1..=16 {
                let w = width(bits);
                let buf = CompressedBuf::zeroed(packed_words(w, n));
                assert!(buf.len() >= compressed_size(w, n));
                assert_eq!(buf.len() % 32, 0);
                assert_eq!(buf.as_bytes().as_ptr() as usize % 32, 0);
            }
        }
    }

    #[test]
    fn test_min_code_width() {
        assert!(min_code_width::<u16>(&[]).is_none());
        assert_eq!(min_code_width(&[0u16, 0]).unwrap().bits(), 1);
        assert_eq!(min_code_width(&[3u16, 300, 7]).unwrap().bits(), 9);
        assert_eq!(min_code_width(&[u16::MAX]).unwrap().bits(), 16);
        assert!(min_code_width(&[1u32 << 16]).is_none());
    }

    #[test]
    fn test_pack_layout() {
        // 9-bit values: value 7 straddles word 0 and word 1.
        let input: Vec<u16> = (0..16).map(|i| 0x100 | i).collect();
        let buf = pack(&input, width(9));
        let words = buf.words();
        for (i, v) in input.iter().enumerate() {
            assert_eq!(read_bits(words, width(9), i), *v as u64);
        }
        // low 1 bit of value 7 is top bit of word 0.
        assert_eq!(words[0] >> 63, 0x107 & 1);
        assert_eq!(words[1] & 0xFF, 0x107 >> 1);
        // padding stays zero.
        assert!(words[3..].iter().all(|w| *w == 0));
    }

    #[test]
    fn test_pack_exact_word_fill() {
        // 16-bit and 8-bit values fill words exactly.
        let input: Vec<u16> = (0..9).map(|i| 0xF000 + i).collect();
        let buf = pack(&input, width(16));
        assert_eq!(buf.words()[0], 0xF003_F002_F001_F000);
        assert_eq!(buf.words()[2], 0xF008);

        let input: Vec<u8> = (1..=8).collect();
        let buf = pack(&input, width(8));
        assert_eq!(buf.words()[0], u64::from_le_bytes([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(buf.words()[1], 0);
    }

    #[test]
    fn test_pack_all_widths() {
        for bits in 1..=16 {
            let w = width(bits);
            for n in [1, 63, 64, 65, 509] {
                let input: Vec<u32> = (0..n)
                    .map(|_| rand::random_range(0..=w.value_mask()))
                    .collect();
                let buf = pack(&input, w);
                for (i, v) in input.iter().enumerate() {
                    assert_eq!(read_bits(buf.words(), w, i), *v as u64);
                }
                // the last value ends inside the live words.
                let live = packed_words(w, n);
                assert!(buf.words()[live..].iter().all(|w| *w == 0));
            }
        }
    }
}
