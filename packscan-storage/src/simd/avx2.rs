//! 256-bit kernels.
//!
//! A lane group is 8 values, i.e. one full mask period. The low 128-bit
//! half is loaded at the byte of value 0 and the high half at the byte
//! of value 4, so the concatenated shuffle mask never indexes past its
//! own half for any width up to 16.
//!
//! # Safety
//! All kernels require AVX2. Size requirements are the same as the
//! 128-bit kernels.

use crate::compression::bitpacking::CodeWidth;
use crate::compression::mask::{self, PredicateForm};
use crate::compression::scalar::CodeIter;
use crate::shared::MatchSink;
use crate::simd::valid_bits;
use std::arch::x86_64::*;

const GROUP: usize = 8;
const UNROLL: usize = 4;

#[derive(Clone, Copy)]
struct Masks {
    shuffle: __m256i,
    mult: __m256i,
    shift: __m256i,
    clean: __m256i,
    value_mask: __m256i,
    free_bits: __m128i,
}

impl Masks {
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn new(width: CodeWidth) -> Self {
        let shuffle = mask::shuffle_mask_256(width);
        Masks {
            shuffle: _mm256_loadu_si256(shuffle.as_ptr() as *const __m256i),
            mult: load_u32x8(&mask::shift_multipliers(width)),
            shift: load_u32x8(&mask::shift_amounts(width)),
            clean: load_u32x8(&mask::clean_masks(width)),
            value_mask: _mm256_set1_epi32(width.value_mask() as i32),
            free_bits: _mm_cvtsi32_si128(width.free_bits() as i32),
        }
    }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn load_u32x8(src: &[u32; 8]) -> __m256i {
    _mm256_loadu_si256(src.as_ptr() as *const __m256i)
}

/// Loads the two halves of the group starting at value idx.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn load_group(input: &[u8], bits: usize, idx: usize) -> __m256i {
    let lo = idx * bits / 8;
    let hi = (idx + 4) * bits / 8;
    debug_assert!(hi + 16 <= input.len());
    let ptr = input.as_ptr();
    _mm256_loadu2_m128i(ptr.add(hi) as *const __m128i, ptr.add(lo) as *const __m128i)
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn store_at(res: &mut [u32], idx: usize, v: __m256i) {
    debug_assert!(idx + GROUP <= res.len());
    _mm256_storeu_si256(res.as_mut_ptr().add(idx) as *mut __m256i, v)
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn realign(src: __m256i, masks: &Masks) -> __m256i {
    let b = _mm256_shuffle_epi8(src, masks.shuffle);
    let c = _mm256_mullo_epi32(b, masks.mult);
    _mm256_srl_epi32(c, masks.free_bits)
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn match_bits(src: __m256i, masks: &Masks, pred: __m256i) -> u32 {
    let b = _mm256_shuffle_epi8(src, masks.shuffle);
    let c = _mm256_and_si256(b, masks.clean);
    let e = _mm256_cmpeq_epi32(c, pred);
    _mm256_movemask_ps(_mm256_castsi256_ps(e)) as u32
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn equal_bits(v: __m256i, key: __m256i) -> u32 {
    _mm256_movemask_ps(_mm256_castsi256_ps(_mm256_cmpeq_epi32(v, key))) as u32
}

/// Decode 8 values per iteration with multiply + fixed shift.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn decode(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    let masks = Masks::new(width);
    let bits = width.bits();
    let mut idx = 0;
    while idx < n {
        let v = realign(load_group(input, bits, idx), &masks);
        store_at(res, idx, v);
        idx += GROUP;
    }
}

/// Decode 8 values per iteration with per-lane variable shift.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn decode_shift(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    let masks = Masks::new(width);
    let bits = width.bits();
    let mut idx = 0;
    while idx < n {
        let b = _mm256_shuffle_epi8(load_group(input, bits, idx), masks.shuffle);
        let c = _mm256_srlv_epi32(b, masks.shift);
        store_at(res, idx, _mm256_and_si256(c, masks.value_mask));
        idx += GROUP;
    }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn scan_from(
    input: &[u8],
    width: CodeWidth,
    masks: &Masks,
    pred: __m256i,
    mut idx: usize,
    n: usize,
    res: &mut [u8],
) -> usize {
    let bits = width.bits();
    let mut hits = 0;
    while idx < n {
        let m = match_bits(load_group(input, bits, idx), masks, pred) & valid_bits(idx, n, GROUP);
        res[idx / 8] = m as u8;
        hits += m.count_ones() as usize;
        idx += GROUP;
    }
    hits
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn predicate(width: CodeWidth, key: u32) -> __m256i {
    load_u32x8(&mask::predicate_masks(width, key, PredicateForm::InPlace))
}

/// Scan 8 values per iteration.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn scan(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    key: u32,
    res: &mut [u8],
) -> usize {
    let masks = Masks::new(width);
    scan_from(input, width, &masks, predicate(width, key), 0, n, res)
}

/// Scan 32 values per iteration.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn scan_unrolled(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    key: u32,
    res: &mut [u8],
) -> usize {
    let masks = Masks::new(width);
    let pred = predicate(width, key);
    let bits = width.bits();
    let mut hits = 0;
    let mut idx = 0;
    while idx + GROUP * UNROLL <= n {
        let mut out_word = 0u32;
        for step in 0..UNROLL {
            let m = match_bits(load_group(input, bits, idx + step * GROUP), &masks, pred);
            out_word |= m << (step * GROUP);
        }
        res[idx / 8..idx / 8 + 4].copy_from_slice(&out_word.to_le_bytes());
        hits += out_word.count_ones() as usize;
        idx += GROUP * UNROLL;
    }
    hits + scan_from(input, width, &masks, pred, idx, n, res)
}

/// Decode each group of 8 once and compare with every key.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn shared_scan_vertical<S: MatchSink>(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    keys: &[u32],
    sink: &mut S,
    counts: &mut [usize],
) {
    let masks = Masks::new(width);
    let key_vecs: Vec<__m256i> = keys.iter().map(|k| _mm256_set1_epi32(*k as i32)).collect();
    let bits = width.bits();
    let mut idx = 0;
    while idx < n {
        let v = realign(load_group(input, bits, idx), &masks);
        let valid = valid_bits(idx, n, GROUP);
        for (key_idx, key) in key_vecs.iter().enumerate() {
            let m = equal_bits(v, *key) & valid;
            sink.put_byte(key_idx, idx / 8, m as u8);
            counts[key_idx] += m.count_ones() as usize;
        }
        idx += GROUP;
    }
}

#[inline]
#[target_feature(enable = "avx2")]
unsafe fn flush_horizontal<S: MatchSink>(
    acc: __m256i,
    key_base: usize,
    group_len: usize,
    word_idx: usize,
    n_bytes: usize,
    sink: &mut S,
    counts: &mut [usize],
) {
    let mut lanes = [0u32; 8];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, acc);
    for (j, bits) in lanes[..group_len].iter().enumerate() {
        sink.put_word(key_base + j, word_idx, *bits, n_bytes);
        counts[key_base + j] += bits.count_ones() as usize;
    }
}

/// Shared scan with up to 8 keys per register.
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn shared_scan_horizontal<S: MatchSink>(
    words: &[u64],
    width: CodeWidth,
    n: usize,
    keys: &[u32],
    sink: &mut S,
    counts: &mut [usize],
) {
    for (group_idx, group) in keys.chunks(8).enumerate() {
        let key_base = group_idx * 8;
        let mut lanes = [u32::MAX; 8];
        lanes[..group.len()].copy_from_slice(group);
        let key_vec = load_u32x8(&lanes);
        let mut acc = _mm256_setzero_si256();
        for (idx, code) in CodeIter::new(words, width, n).enumerate() {
            let e = _mm256_cmpeq_epi32(_mm256_set1_epi32(code as i32), key_vec);
            let bit = _mm256_set1_epi32((1u32 << (idx % 32)) as i32);
            acc = _mm256_or_si256(acc, _mm256_and_si256(e, bit));
            if idx % 32 == 31 {
                flush_horizontal(acc, key_base, group.len(), idx / 32, 4, sink, counts);
                acc = _mm256_setzero_si256();
            }
        }
        if n % 32 != 0 {
            let n_bytes = (n % 32).div_ceil(8);
            flush_horizontal(acc, key_base, group.len(), n / 32, n_bytes, sink, counts);
        }
    }
}
