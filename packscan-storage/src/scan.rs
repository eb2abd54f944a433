//! Single-key scan strategies.
//!
//! A scan compares every value with one key and writes a match bitmap,
//! see [`crate::bitmap`] for bit order. Bits past n in the last byte are
//! cleared, bytes past `ceil(n / 8)` are untouched.

use crate::compression::bitpacking::{compressed_size, CodeWidth, CompressedBuf};
use crate::compression::scalar;
use crate::error::{Error, Result};
use crate::simd::SimdLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    Scalar,
    /// 8 values per bitmap byte.
    Sse128,
    /// 32 values per bitmap word.
    Sse128Unrolled,
    Avx256,
    Avx256Unrolled,
}

impl ScanStrategy {
    pub const ALL: [ScanStrategy; 5] = [
        ScanStrategy::Scalar,
        ScanStrategy::Sse128,
        ScanStrategy::Sse128Unrolled,
        ScanStrategy::Avx256,
        ScanStrategy::Avx256Unrolled,
    ];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            ScanStrategy::Scalar => "scalar",
            ScanStrategy::Sse128 => "sse128",
            ScanStrategy::Sse128Unrolled => "sse128_unrolled",
            ScanStrategy::Avx256 => "avx256",
            ScanStrategy::Avx256Unrolled => "avx256_unrolled",
        }
    }

    #[inline]
    pub fn required_level(self) -> SimdLevel {
        match self {
            ScanStrategy::Scalar => SimdLevel::Scalar,
            ScanStrategy::Sse128 | ScanStrategy::Sse128Unrolled => SimdLevel::Sse41,
            ScanStrategy::Avx256 | ScanStrategy::Avx256Unrolled => SimdLevel::Avx2,
        }
    }

    #[inline]
    pub fn is_supported(self) -> bool {
        SimdLevel::detect().supports(self.required_level())
    }

    #[inline]
    pub fn best(level: SimdLevel) -> Self {
        match level {
            SimdLevel::Scalar => ScanStrategy::Scalar,
            SimdLevel::Sse41 => ScanStrategy::Sse128Unrolled,
            SimdLevel::Avx2 => ScanStrategy::Avx256Unrolled,
        }
    }

    /// Scan first n values for key, write match bitmap into res and
    /// return number of matches.
    ///
    /// Panics if buffer or bitmap is smaller than required for n values.
    pub fn scan(
        self,
        key: u32,
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut [u8],
    ) -> Result<usize> {
        assert!(buf.len() >= compressed_size(width, n), "compressed buffer too small");
        let n_bytes = n.div_ceil(8);
        assert!(res.len() >= n_bytes, "bitmap too small");
        if !self.is_supported() {
            return Err(Error::NotSupported(self.name()));
        }
        if key > width.value_mask() {
            // no value can be that large.
            res[..n_bytes].fill(0);
            return Ok(0);
        }
        if n == 0 {
            return Ok(0);
        }
        self.scan_impl(key, buf, width, n, res)
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    fn scan_impl(
        self,
        key: u32,
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut [u8],
    ) -> Result<usize> {
        use crate::simd::{avx2, sse};
        let input = buf.as_bytes();
        // SAFETY: SIMD level and sizes are checked by caller.
        let hits = unsafe {
            match self {
                ScanStrategy::Scalar => scalar::scan(buf.words(), width, n, key, res),
                ScanStrategy::Sse128 => sse::scan(input, width, n, key, res),
                ScanStrategy::Sse128Unrolled => sse::scan_unrolled(input, width, n, key, res),
                ScanStrategy::Avx256 => avx2::scan(input, width, n, key, res),
                ScanStrategy::Avx256Unrolled => avx2::scan_unrolled(input, width, n, key, res),
            }
        };
        Ok(hits)
    }

    #[cfg(not(target_arch = "x86_64"))]
    #[inline]
    fn scan_impl(
        self,
        key: u32,
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut [u8],
    ) -> Result<usize> {
        match self {
            ScanStrategy::Scalar => Ok(scalar::scan(buf.words(), width, n, key, res)),
            _ => Err(Error::NotSupported(self.name())),
        }
    }
}

impl fmt::Display for ScanStrategy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{new_bitmap, Bitmap};
    use crate::compression::bitpacking::pack;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn width(bits: usize) -> CodeWidth {
        CodeWidth::new(bits).unwrap()
    }

    fn supported() -> impl Iterator<Item = ScanStrategy> {
        ScanStrategy::ALL.into_iter().filter(|s| s.is_supported())
    }

    #[test]
    fn test_scan_small_column() {
        let input: Vec<u16> = vec![1, 2, 3, 3, 2, 1, 1, 2, 3, 1, 2, 3];
        let buf = pack(&input, width(9));
        for strategy in supported() {
            let mut bm = new_bitmap(input.len());
            let hits = strategy.scan(3, &buf, width(9), input.len(), &mut bm).unwrap();
            assert_eq!(hits, 4, "strategy={}", strategy);
            let matched: Vec<_> = bm.bitmap_true_index_iter(input.len()).collect();
            assert_eq!(matched, vec![2, 3, 8, 11]);
            // bits past n are cleared.
            assert_eq!(bm[1] & 0xF0, 0);
        }
    }

    #[test]
    fn test_scan_all_widths_match_scalar() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for bits in 1..=16 {
            let w = width(bits);
            // small alphabet so keys actually hit.
            let max = w.value_mask().min(5);
            for n in [1, 7, 8, 9, 31, 32, 33, 64, 200, 1001] {
                let input: Vec<u32> = (0..n).map(|_| rng.random_range(0..=max)).collect();
                let buf = pack(&input, w);
                for key in 0..=max {
                    let mut expected = new_bitmap(n);
                    let expected_hits =
                        ScanStrategy::Scalar.scan(key, &buf, w, n, &mut expected).unwrap();
                    assert_eq!(expected_hits, input.iter().filter(|v| **v == key).count());
                    for strategy in supported() {
                        let mut bm = new_bitmap(n);
                        let hits = strategy.scan(key, &buf, w, n, &mut bm).unwrap();
                        assert_eq!(hits, expected_hits, "strategy={}, width={}", strategy, bits);
                        assert_eq!(bm, expected, "strategy={}, width={}, n={}", strategy, bits, n);
                    }
                }
            }
        }
    }

    #[test]
    fn test_scan_key_out_of_range() {
        let input: Vec<u16> = (0..100).map(|i| i % 8).collect();
        let buf = pack(&input, width(3));
        for strategy in supported() {
            let mut bm = vec![0xFFu8; 20];
            let hits = strategy.scan(8, &buf, width(3), 100, &mut bm).unwrap();
            assert_eq!(hits, 0);
            assert!(bm[..13].iter().all(|b| *b == 0));
            assert!(bm[13..].iter().all(|b| *b == 0xFF));
        }
    }

    #[test]
    fn test_scan_zero_key_tail() {
        // zero padding after the last value must not match key 0.
        let input: Vec<u16> = vec![0; 13];
        let buf = pack(&input, width(5));
        for strategy in supported() {
            let mut bm = new_bitmap(13);
            assert_eq!(strategy.scan(0, &buf, width(5), 13, &mut bm).unwrap(), 13);
            assert_eq!(bm[..2], [0xFF, 0x1F]);
        }
    }

    #[test]
    fn test_scan_empty() {
        let buf = pack::<u8>(&[], width(4));
        for strategy in supported() {
            let mut bm = new_bitmap(0);
            assert_eq!(strategy.scan(1, &buf, width(4), 0, &mut bm).unwrap(), 0);
        }
    }
}
