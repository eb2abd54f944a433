//! 128-bit kernels.
//!
//! A lane group is 4 values. Each group is loaded with one unaligned
//! 16-byte load at the byte of its first value, shuffled so that every
//! 32-bit lane holds the 4 bytes covering one value, then either
//! realigned (multiply + shift) or cleaned (AND) for comparison.
//!
//! Since the byte pattern repeats every 8 values, groups at even
//! positions use mask set 0 and odd positions use mask set 1.
//!
//! # Safety
//! All kernels require SSSE3 and SSE4.1. Input must hold at least
//! `compressed_size(W, n)` bytes and outputs the sizes documented on
//! each strategy.

use crate::compression::bitpacking::CodeWidth;
use crate::compression::mask::{self, PredicateForm};
use crate::compression::scalar::CodeIter;
use crate::shared::MatchSink;
use crate::simd::valid_bits;
use std::arch::x86_64::*;

const GROUP: usize = 4;
const UNROLL: usize = 8;

/// Vector constants of one code width.
#[derive(Clone, Copy)]
struct Masks {
    shuffle: [__m128i; 2],
    mult: [__m128i; 2],
    clean: [__m128i; 2],
    free_bits: __m128i,
}

impl Masks {
    #[inline]
    #[target_feature(enable = "ssse3,sse4.1")]
    unsafe fn new(width: CodeWidth) -> Self {
        let shuffle = mask::shuffle_masks(width);
        let mult = mask::shift_multipliers(width);
        let clean = mask::clean_masks(width);
        Masks {
            shuffle: [load_u8x16(&shuffle[0]), load_u8x16(&shuffle[1])],
            mult: [load_u32x4(&mult[..4]), load_u32x4(&mult[4..])],
            clean: [load_u32x4(&clean[..4]), load_u32x4(&clean[4..])],
            free_bits: _mm_cvtsi32_si128(width.free_bits() as i32),
        }
    }

    /// In-place predicate of both mask sets.
    #[inline]
    #[target_feature(enable = "ssse3,sse4.1")]
    unsafe fn predicate(width: CodeWidth, key: u32) -> [__m128i; 2] {
        let pred = mask::predicate_masks(width, key, PredicateForm::InPlace);
        [load_u32x4(&pred[..4]), load_u32x4(&pred[4..])]
    }
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn load_u8x16(src: &[u8; 16]) -> __m128i {
    _mm_loadu_si128(src.as_ptr() as *const __m128i)
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn load_u32x4(src: &[u32]) -> __m128i {
    debug_assert!(src.len() >= 4);
    _mm_loadu_si128(src.as_ptr() as *const __m128i)
}

/// Unaligned 16-byte load at given byte offset.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn load_at(input: &[u8], offset: usize) -> __m128i {
    debug_assert!(offset + 16 <= input.len());
    _mm_loadu_si128(input.as_ptr().add(offset) as *const __m128i)
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn store_at(res: &mut [u32], idx: usize, v: __m128i) {
    debug_assert!(idx + GROUP <= res.len());
    _mm_storeu_si128(res.as_mut_ptr().add(idx) as *mut __m128i, v)
}

/// Shuffle + multiply + shift, every lane ends up holding one value.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn realign(src: __m128i, shuffle: __m128i, mult: __m128i, free_bits: __m128i) -> __m128i {
    let b = _mm_shuffle_epi8(src, shuffle);
    let c = _mm_mullo_epi32(b, mult);
    _mm_srl_epi32(c, free_bits)
}

/// Shuffle + clean + compare, returns 4 match bits.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn match_bits(src: __m128i, shuffle: __m128i, clean: __m128i, pred: __m128i) -> u32 {
    let b = _mm_shuffle_epi8(src, shuffle);
    let c = _mm_and_si128(b, clean);
    let e = _mm_cmpeq_epi32(c, pred);
    _mm_movemask_ps(_mm_castsi128_ps(e)) as u32
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn equal_bits(v: __m128i, key: __m128i) -> u32 {
    _mm_movemask_ps(_mm_castsi128_ps(_mm_cmpeq_epi32(v, key))) as u32
}

/// Returns `a:b >> count bytes`, low 16 bytes.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn alignr(hi: __m128i, lo: __m128i, count: usize) -> __m128i {
    macro_rules! alignr_match {
        ($($n:literal),*) => {
            match count {
                0 => lo,
                $($n => _mm_alignr_epi8::<$n>(hi, lo),)*
                _ => hi,
            }
        };
    }
    alignr_match!(1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15)
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn decode_from(
    input: &[u8],
    width: CodeWidth,
    masks: &Masks,
    mut idx: usize,
    n: usize,
    res: &mut [u32],
) {
    let bits = width.bits();
    while idx < n {
        let phase = (idx / GROUP) & 1;
        let src = load_at(input, idx * bits / 8);
        let v = realign(src, masks.shuffle[phase], masks.mult[phase], masks.free_bits);
        store_at(res, idx, v);
        idx += GROUP;
    }
}

/// Decode with two precomputed mask sets and one load per group.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn decode(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    let masks = Masks::new(width);
    decode_from(input, width, &masks, 0, n, res)
}

/// Decode 32 values per iteration, then finish group by group.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn decode_unrolled(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    let masks = Masks::new(width);
    let bits = width.bits();
    let mut idx = 0;
    while idx + GROUP * UNROLL <= n {
        for step in 0..UNROLL {
            let i = idx + step * GROUP;
            let phase = step & 1;
            let src = load_at(input, i * bits / 8);
            let v = realign(src, masks.shuffle[phase], masks.mult[phase], masks.free_bits);
            store_at(res, i, v);
        }
        idx += GROUP * UNROLL;
    }
    decode_from(input, width, &masks, idx, n, res)
}

/// Decode with masks regenerated for every group.
///
/// The loaded window is kept as long as the next group still fits in
/// it, so sequential groups may share one load.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn decode_sweep(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    let bits = width.bits();
    let free_bits = _mm_cvtsi32_si128(width.free_bits() as i32);
    let mut base = 0;
    let mut src = load_at(input, 0);
    let mut idx = 0;
    while idx < n {
        let last = (idx + GROUP - 1) * bits / 8 - base;
        if last + 3 >= 16 {
            base = idx * bits / 8;
            src = load_at(input, base);
        }
        let (shuffle, mult) = mask::window_masks(width, idx, base);
        let v = realign(src, load_u8x16(&shuffle), load_u32x4(&mult), free_bits);
        store_at(res, idx, v);
        idx += GROUP;
    }
}

/// Decode from aligned 16-byte blocks.
///
/// The two blocks covering current position are cached, and the window
/// of a group is cut out of them with a byte align.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn decode_aligned(input: &[u8], width: CodeWidth, n: usize, res: &mut [u32]) {
    debug_assert!(input.as_ptr() as usize % 16 == 0);
    debug_assert!(input.len() >= 32);
    let masks = Masks::new(width);
    let bits = width.bits();
    let blocks = input.as_ptr() as *const __m128i;
    let n_blocks = input.len() / 16;
    let mut block_idx = 0;
    let mut current = _mm_load_si128(blocks);
    let mut next = _mm_load_si128(blocks.add(1));
    let mut idx = 0;
    while idx < n {
        let offset = idx * bits / 8;
        while offset / 16 != block_idx {
            block_idx += 1;
            debug_assert!(block_idx + 1 < n_blocks);
            current = next;
            next = _mm_load_si128(blocks.add(block_idx + 1));
        }
        let phase = (idx / GROUP) & 1;
        let src = alignr(next, current, offset % 16);
        let v = realign(src, masks.shuffle[phase], masks.mult[phase], masks.free_bits);
        store_at(res, idx, v);
        idx += GROUP;
    }
}

#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn scan_from(
    input: &[u8],
    width: CodeWidth,
    masks: &Masks,
    pred: &[__m128i; 2],
    mut idx: usize,
    n: usize,
    res: &mut [u8],
) -> usize {
    let bits = width.bits();
    let mut hits = 0;
    while idx < n {
        let lo = match_bits(
            load_at(input, idx * bits / 8),
            masks.shuffle[0],
            masks.clean[0],
            pred[0],
        );
        let hi = match_bits(
            load_at(input, (idx + GROUP) * bits / 8),
            masks.shuffle[1],
            masks.clean[1],
            pred[1],
        );
        let out_byte = ((lo | (hi << 4)) & valid_bits(idx, n, 8)) as u8;
        res[idx / 8] = out_byte;
        hits += out_byte.count_ones() as usize;
        idx += 2 * GROUP;
    }
    hits
}

/// Scan 8 values per iteration, one bitmap byte per iteration.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn scan(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    key: u32,
    res: &mut [u8],
) -> usize {
    let masks = Masks::new(width);
    let pred = Masks::predicate(width, key);
    scan_from(input, width, &masks, &pred, 0, n, res)
}

/// Scan 32 values per iteration, one bitmap word per iteration.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn scan_unrolled(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    key: u32,
    res: &mut [u8],
) -> usize {
    let masks = Masks::new(width);
    let pred = Masks::predicate(width, key);
    let bits = width.bits();
    let mut hits = 0;
    let mut idx = 0;
    while idx + GROUP * UNROLL <= n {
        let mut out_word = 0u32;
        for step in 0..UNROLL {
            let i = idx + step * GROUP;
            let phase = step & 1;
            let m = match_bits(
                load_at(input, i * bits / 8),
                masks.shuffle[phase],
                masks.clean[phase],
                pred[phase],
            );
            out_word |= m << (step * GROUP);
        }
        res[idx / 8..idx / 8 + 4].copy_from_slice(&out_word.to_le_bytes());
        hits += out_word.count_ones() as usize;
        idx += GROUP * UNROLL;
    }
    hits + scan_from(input, width, &masks, &pred, idx, n, res)
}

/// Decode each group of 8 once and compare with every key.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn vertical_scan<S: MatchSink, K: AsRef<[__m128i]>>(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    key_vecs: K,
    sink: &mut S,
    counts: &mut [usize],
) {
    let key_vecs = key_vecs.as_ref();
    debug_assert!(counts.len() >= key_vecs.len());
    let masks = Masks::new(width);
    let bits = width.bits();
    let mut idx = 0;
    while idx < n {
        let lo = realign(
            load_at(input, idx * bits / 8),
            masks.shuffle[0],
            masks.mult[0],
            masks.free_bits,
        );
        let hi = realign(
            load_at(input, (idx + GROUP) * bits / 8),
            masks.shuffle[1],
            masks.mult[1],
            masks.free_bits,
        );
        let valid = valid_bits(idx, n, 8);
        for (key_idx, key) in key_vecs.iter().enumerate() {
            let m = (equal_bits(lo, *key) | (equal_bits(hi, *key) << 4)) & valid;
            sink.put_byte(key_idx, idx / 8, m as u8);
            counts[key_idx] += m.count_ones() as usize;
        }
        idx += 2 * GROUP;
    }
}

/// Shared scan over any number of keys.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn shared_scan_vertical<S: MatchSink>(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    keys: &[u32],
    sink: &mut S,
    counts: &mut [usize],
) {
    let key_vecs: Vec<__m128i> = keys.iter().map(|k| _mm_set1_epi32(*k as i32)).collect();
    vertical_scan(input, width, n, key_vecs, sink, counts)
}

/// Shared scan over exactly K keys, key loop is unrolled at compile time.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn shared_scan_vertical_fixed<S: MatchSink, const K: usize>(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    keys: &[u32; K],
    sink: &mut S,
    counts: &mut [usize],
) {
    let mut key_vecs = [_mm_setzero_si128(); K];
    for (tgt, key) in key_vecs.iter_mut().zip(keys) {
        *tgt = _mm_set1_epi32(*key as i32);
    }
    vertical_scan(input, width, n, key_vecs, sink, counts)
}

/// Flush one 32-value word of every key in the group.
#[inline]
#[target_feature(enable = "ssse3,sse4.1")]
unsafe fn flush_horizontal<S: MatchSink>(
    acc: __m128i,
    key_base: usize,
    group_len: usize,
    word_idx: usize,
    n_bytes: usize,
    sink: &mut S,
    counts: &mut [usize],
) {
    let mut lanes = [0u32; 4];
    _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, acc);
    for (j, bits) in lanes[..group_len].iter().enumerate() {
        sink.put_word(key_base + j, word_idx, *bits, n_bytes);
        counts[key_base + j] += bits.count_ones() as usize;
    }
}

/// Shared scan with up to 4 keys per register.
///
/// Values are streamed by the scalar bit cursor. Each value is broadcast
/// and compared with all keys at once, lane j of the accumulator
/// collects the match bits of key j.
#[target_feature(enable = "ssse3,sse4.1")]
pub(crate) unsafe fn shared_scan_horizontal<S: MatchSink>(
    words: &[u64],
    width: CodeWidth,
    n: usize,
    keys: &[u32],
    sink: &mut S,
    counts: &mut [usize],
) {
    for (group_idx, group) in keys.chunks(4).enumerate() {
        let key_base = group_idx * 4;
        // unused lanes never match a value below 2^16.
        let mut lanes = [u32::MAX; 4];
        lanes[..group.len()].copy_from_slice(group);
        let key_vec = _mm_loadu_si128(lanes.as_ptr() as *const __m128i);
        let mut acc = _mm_setzero_si128();
        for (idx, code) in CodeIter::new(words, width, n).enumerate() {
            let e = _mm_cmpeq_epi32(_mm_set1_epi32(code as i32), key_vec);
            let bit = _mm_set1_epi32((1u32 << (idx % 32)) as i32);
            acc = _mm_or_si128(acc, _mm_and_si128(e, bit));
            if idx % 32 == 31 {
                flush_horizontal(acc, key_base, group.len(), idx / 32, 4, sink, counts);
                acc = _mm_setzero_si128();
            }
        }
        if n % 32 != 0 {
            let n_bytes = (n % 32).div_ceil(8);
            flush_horizontal(acc, key_base, group.len(), n / 32, n_bytes, sink, counts);
        }
    }
}
