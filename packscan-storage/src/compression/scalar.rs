//! Scalar decode and scan over packed words.
//!
//! This is the reference implementation every vector kernel is checked
//! against, and the fallback on targets without SIMD support.

use crate::compression::bitpacking::{CodeWidth, WORD_BITS};

/// Bit cursor over packed words.
///
/// Keeps a 64-bit shift register of the current word. When fewer than W
/// unread bits remain, the straddling value is completed with the low
/// bits of the next word and the consumed bits are skipped there.
pub struct CodeIter<'a> {
    words: &'a [u64],
    bits: usize,
    mask: u64,
    word_idx: usize,
    current: u64,
    unread: usize,
    remaining: usize,
}

impl<'a> CodeIter<'a> {
    #[inline]
    pub fn new(words: &'a [u64], width: CodeWidth, n: usize) -> Self {
        CodeIter {
            words,
            bits: width.bits(),
            mask: width.value_mask() as u64,
            word_idx: 0,
            current: 0,
            unread: 0,
            remaining: n,
        }
    }
}

impl Iterator for CodeIter<'_> {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.unread < self.bits {
            let next = self.words[self.word_idx];
            self.word_idx += 1;
            if self.unread == 0 {
                self.current = next;
                self.unread = WORD_BITS;
            } else {
                // straddling value, low part is already in current.
                let overflow_bits = self.bits - self.unread;
                let code = (self.current | (next << self.unread)) & self.mask;
                self.current = next >> overflow_bits;
                self.unread = WORD_BITS - overflow_bits;
                return Some(code as u32);
            }
        }
        let code = self.current & self.mask;
        self.current >>= self.bits;
        self.unread -= self.bits;
        Some(code as u32)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for CodeIter<'_> {}

/// Decode first n values into output.
#[inline]
pub fn decode(words: &[u64], width: CodeWidth, n: usize, res: &mut [u32]) {
    debug_assert!(res.len() >= n);
    for (tgt, code) in res.iter_mut().zip(CodeIter::new(words, width, n)) {
        *tgt = code;
    }
}

/// Compare first n values with key, write match bitmap and return
/// number of matches.
#[inline]
pub fn scan(words: &[u64], width: CodeWidth, n: usize, key: u32, res: &mut [u8]) -> usize {
    debug_assert!(res.len() >= n.div_ceil(8));
    let mut hits = 0;
    let mut out_byte = 0u8;
    for (idx, code) in CodeIter::new(words, width, n).enumerate() {
        out_byte |= ((code == key) as u8) << (idx % 8);
        if idx % 8 == 7 {
            res[idx / 8] = out_byte;
            hits += out_byte.count_ones() as usize;
            out_byte = 0;
        }
    }
    if n % 8 != 0 {
        res[n / 8] = out_byte;
        hits += out_byte.count_ones() as usize;
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{new_bitmap, Bitmap};
    use crate::compression::bitpacking::pack;

    fn width(bits: usize) -> CodeWidth {
        CodeWidth::new(bits).unwrap()
    }

    #[test]
    fn test_scalar_round_trip_509() {
        let input: Vec<u16> = (1..=509).collect();
        let buf = pack(&input, width(9));
        let mut res = vec![0u32; input.len()];
        decode(buf.words(), width(9), input.len(), &mut res);
        assert!(input.iter().zip(&res).all(|(a, b)| *a as u32 == *b));
    }

    #[test]
    fn test_scalar_round_trip_all_widths() {
        for bits in 1..=16 {
            let w = width(bits);
            for n in [0, 1, 5, 64, 65, 127, 1000] {
                let input: Vec<u32> = (0..n)
                    .map(|_| rand::random_range(0..=w.value_mask()))
                    .collect();
                let buf = pack(&input, w);
                let mut res = vec![u32::MAX; n];
                decode(buf.words(), w, n, &mut res);
                assert_eq!(input, res);
                assert_eq!(CodeIter::new(buf.words(), w, n).len(), n);
            }
        }
    }

    #[test]
    fn test_scalar_scan() {
        let input: Vec<u16> = vec![1, 2, 3, 3, 2, 1, 1, 2, 3, 1, 2, 3];
        let buf = pack(&input, width(9));
        let mut bm = new_bitmap(input.len());
        let hits = scan(buf.words(), width(9), input.len(), 3, &mut bm);
        assert_eq!(hits, 4);
        let matched: Vec<_> = bm.bitmap_true_index_iter(input.len()).collect();
        assert_eq!(matched, vec![2, 3, 8, 11]);
        assert_eq!(bm.bitmap_count(input.len()), hits);
    }

    #[test]
    fn test_scalar_scan_no_match() {
        let input: Vec<u16> = (0..100).map(|i| i % 7).collect();
        let buf = pack(&input, width(3));
        let mut bm = new_bitmap(input.len());
        assert_eq!(scan(buf.words(), width(3), input.len(), 7, &mut bm), 0);
        assert!(bm.iter().all(|b| *b == 0));
        let hits = scan(buf.words(), width(3), 0, 1, &mut bm);
        assert_eq!(hits, 0);
    }
}
