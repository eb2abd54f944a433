//! Shared scans: many keys evaluated over one compressed stream.
//!
//! Every strategy produces, for each key, exactly the bitmap a
//! single-key [`ScanStrategy`] would produce. They differ in how the
//! cost of unpacking is amortized:
//!
//! - sequential runs one full scan per key.
//! - vertical decodes every lane group once and compares it with each
//!   broadcast key.
//! - horizontal puts several keys into one register and compares each
//!   value against all of them.
//! - threaded spreads keys over worker threads, each running
//!   single-key scans into its own bitmaps.

use crate::compression::bitpacking::{compressed_size, CodeWidth, CompressedBuf};
use crate::error::{Error, Result};
use crate::scan::ScanStrategy;
use crate::simd::SimdLevel;
use easy_parallel::Parallel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination of per-key match bits.
pub trait MatchSink {
    /// Write match bits of values `[8 * byte_idx, 8 * byte_idx + 8)` for key.
    fn put_byte(&mut self, key_idx: usize, byte_idx: usize, bits: u8);

    /// Write match bits of values starting at `32 * word_idx` for key.
    /// Only the first n_bytes bytes of bits are written.
    #[inline]
    fn put_word(&mut self, key_idx: usize, word_idx: usize, bits: u32, n_bytes: usize) {
        for (i, b) in bits.to_le_bytes()[..n_bytes].iter().enumerate() {
            self.put_byte(key_idx, word_idx * 4 + i, *b);
        }
    }
}

/// One bitmap per key.
pub(crate) struct SeparateSink<'a> {
    bitmaps: &'a mut [Vec<u8>],
}

impl MatchSink for SeparateSink<'_> {
    #[inline]
    fn put_byte(&mut self, key_idx: usize, byte_idx: usize, bits: u8) {
        self.bitmaps[key_idx][byte_idx] = bits;
    }

    #[inline]
    fn put_word(&mut self, key_idx: usize, word_idx: usize, bits: u32, n_bytes: usize) {
        let start = word_idx * 4;
        self.bitmaps[key_idx][start..start + n_bytes]
            .copy_from_slice(&bits.to_le_bytes()[..n_bytes]);
    }
}

/// All keys in one buffer, byte `g * keys + j` is group g of key j.
pub(crate) struct InterleavedSink<'a> {
    keys: usize,
    bytes: &'a mut [u8],
}

impl MatchSink for InterleavedSink<'_> {
    #[inline]
    fn put_byte(&mut self, key_idx: usize, byte_idx: usize, bits: u8) {
        self.bytes[byte_idx * self.keys + key_idx] = bits;
    }
}

/// Memory layout of shared scan output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitmapLayout {
    #[default]
    Separate,
    Interleaved,
}

/// Output bitmaps of a shared scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedBitmaps {
    Separate(Vec<Vec<u8>>),
    Interleaved { keys: usize, bytes: Vec<u8> },
}

impl SharedBitmaps {
    /// Create zeroed bitmaps for given number of keys and values.
    #[inline]
    pub fn new(layout: BitmapLayout, keys: usize, n: usize) -> Self {
        match layout {
            BitmapLayout::Separate => {
                SharedBitmaps::Separate(vec![crate::bitmap::new_bitmap(n); keys])
            }
            BitmapLayout::Interleaved => SharedBitmaps::Interleaved {
                keys,
                bytes: vec![0u8; crate::bitmap::interleaved_bitmap_size(n, keys)],
            },
        }
    }

    #[inline]
    pub fn layout(&self) -> BitmapLayout {
        match self {
            SharedBitmaps::Separate(_) => BitmapLayout::Separate,
            SharedBitmaps::Interleaved { .. } => BitmapLayout::Interleaved,
        }
    }

    /// Number of keys these bitmaps hold.
    #[inline]
    pub fn keys(&self) -> usize {
        match self {
            SharedBitmaps::Separate(bitmaps) => bitmaps.len(),
            SharedBitmaps::Interleaved { keys, .. } => *keys,
        }
    }

    /// Returns whether value idx matched key key_idx.
    #[inline]
    pub fn key_bit(&self, key_idx: usize, idx: usize) -> bool {
        let byte = match self {
            SharedBitmaps::Separate(bitmaps) => bitmaps[key_idx][idx / 8],
            SharedBitmaps::Interleaved { keys, bytes } => bytes[idx / 8 * keys + key_idx],
        };
        byte & (1 << (idx % 8)) != 0
    }

    /// Copy out the bitmap of one key in single-key form, `ceil(n / 8)` bytes.
    #[inline]
    pub fn key_bitmap(&self, key_idx: usize, n: usize) -> Vec<u8> {
        let n_bytes = n.div_ceil(8);
        match self {
            SharedBitmaps::Separate(bitmaps) => bitmaps[key_idx][..n_bytes].to_vec(),
            SharedBitmaps::Interleaved { keys, bytes } => {
                (0..n_bytes).map(|g| bytes[g * keys + key_idx]).collect()
            }
        }
    }

    /// Check output is large enough for keys and n values.
    fn check_size(&self, keys: usize, n: usize) {
        let n_bytes = n.div_ceil(8);
        match self {
            SharedBitmaps::Separate(bitmaps) => {
                assert!(bitmaps.len() >= keys, "not enough bitmaps");
                assert!(bitmaps[..keys].iter().all(|bm| bm.len() >= n_bytes), "bitmap too small");
            }
            SharedBitmaps::Interleaved { keys: k, bytes } => {
                assert_eq!(*k, keys, "interleaved stride differs from key count");
                assert!(bytes.len() >= n_bytes * keys, "bitmap too small");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SharedScanStrategy {
    /// One single-key scan per key.
    Sequential { scan: ScanStrategy },
    /// Decode once, compare with every key, 128-bit lanes.
    Vertical,
    /// Decode once, compare with every key, 256-bit lanes.
    Vertical256,
    /// `Vertical` specialized for 1, 2, 4 or 8 keys.
    VerticalFixed,
    /// Up to 4 keys per register.
    Horizontal128,
    /// Up to 8 keys per register.
    Horizontal256,
    /// Keys partitioned over worker threads. Separate layout only.
    Threaded { threads: usize, scan: ScanStrategy },
}

impl SharedScanStrategy {
    /// Key counts supported by [`SharedScanStrategy::VerticalFixed`].
    pub const FIXED_KEY_COUNTS: [usize; 4] = [1, 2, 4, 8];

    /// All strategies, with given single-key scan and thread count for
    /// the variants that take them.
    #[inline]
    pub fn all(scan: ScanStrategy, threads: usize) -> [SharedScanStrategy; 7] {
        [
            SharedScanStrategy::Sequential { scan },
            SharedScanStrategy::Vertical,
            SharedScanStrategy::Vertical256,
            SharedScanStrategy::VerticalFixed,
            SharedScanStrategy::Horizontal128,
            SharedScanStrategy::Horizontal256,
            SharedScanStrategy::Threaded { threads, scan },
        ]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            SharedScanStrategy::Sequential { .. } => "sequential",
            SharedScanStrategy::Vertical => "vertical",
            SharedScanStrategy::Vertical256 => "vertical256",
            SharedScanStrategy::VerticalFixed => "vertical_fixed",
            SharedScanStrategy::Horizontal128 => "horizontal128",
            SharedScanStrategy::Horizontal256 => "horizontal256",
            SharedScanStrategy::Threaded { .. } => "threaded",
        }
    }

    #[inline]
    pub fn required_level(self) -> SimdLevel {
        match self {
            SharedScanStrategy::Sequential { scan } | SharedScanStrategy::Threaded { scan, .. } => {
                scan.required_level()
            }
            SharedScanStrategy::Vertical
            | SharedScanStrategy::VerticalFixed
            | SharedScanStrategy::Horizontal128 => SimdLevel::Sse41,
            SharedScanStrategy::Vertical256 | SharedScanStrategy::Horizontal256 => SimdLevel::Avx2,
        }
    }

    #[inline]
    pub fn is_supported(self) -> bool {
        SimdLevel::detect().supports(self.required_level())
    }

    #[inline]
    pub fn best(level: SimdLevel) -> Self {
        match level {
            SimdLevel::Scalar => SharedScanStrategy::Sequential {
                scan: ScanStrategy::Scalar,
            },
            SimdLevel::Sse41 => SharedScanStrategy::Vertical,
            SimdLevel::Avx2 => SharedScanStrategy::Vertical256,
        }
    }

    /// Returns whether this strategy can write given layout.
    #[inline]
    pub fn supports_layout(self, layout: BitmapLayout) -> bool {
        !matches!(
            (self, layout),
            (SharedScanStrategy::Threaded { .. }, BitmapLayout::Interleaved)
        )
    }

    /// Scan first n values for every key, write bitmaps into res and
    /// return match count per key.
    ///
    /// Panics if buffer or bitmaps are smaller than required.
    pub fn scan(
        self,
        keys: &[u32],
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut SharedBitmaps,
    ) -> Result<Vec<usize>> {
        assert!(buf.len() >= compressed_size(width, n), "compressed buffer too small");
        res.check_size(keys.len(), n);
        if !self.is_supported() {
            return Err(Error::NotSupported(self.name()));
        }
        if !self.supports_layout(res.layout()) {
            return Err(Error::NotSupported("interleaved layout of threaded shared scan"));
        }
        if self == SharedScanStrategy::VerticalFixed
            && !Self::FIXED_KEY_COUNTS.contains(&keys.len())
        {
            return Err(Error::UnsupportedPredicateCount(keys.len()));
        }
        let mut counts = vec![0usize; keys.len()];
        if keys.is_empty() || n == 0 {
            return Ok(counts);
        }
        match self {
            SharedScanStrategy::Sequential { scan } => {
                sequential_scan(scan, keys, buf, width, n, res, &mut counts)?
            }
            SharedScanStrategy::Threaded { threads, scan } => {
                let SharedBitmaps::Separate(bitmaps) = res else {
                    return Err(Error::NotSupported("interleaved layout of threaded shared scan"));
                };
                counts = threaded_scan(scan, threads, keys, buf, width, n, bitmaps)?;
            }
            _ => match res {
                SharedBitmaps::Separate(bitmaps) => {
                    let mut sink = SeparateSink { bitmaps };
                    self.simd_scan(keys, buf, width, n, &mut sink, &mut counts)?
                }
                SharedBitmaps::Interleaved { keys: k, bytes } => {
                    let mut sink = InterleavedSink { keys: *k, bytes };
                    self.simd_scan(keys, buf, width, n, &mut sink, &mut counts)?
                }
            },
        }
        Ok(counts)
    }

    #[cfg(target_arch = "x86_64")]
    fn simd_scan<S: MatchSink>(
        self,
        keys: &[u32],
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        sink: &mut S,
        counts: &mut [usize],
    ) -> Result<()> {
        use crate::simd::{avx2, sse};
        let input = buf.as_bytes();
        // SAFETY: SIMD level and sizes are checked by caller.
        unsafe {
            match self {
                SharedScanStrategy::Vertical => {
                    sse::shared_scan_vertical(input, width, n, keys, sink, counts)
                }
                SharedScanStrategy::Vertical256 => {
                    avx2::shared_scan_vertical(input, width, n, keys, sink, counts)
                }
                SharedScanStrategy::VerticalFixed => match keys.len() {
                    1 => vertical_fixed::<S, 1>(input, width, n, keys, sink, counts)?,
                    2 => vertical_fixed::<S, 2>(input, width, n, keys, sink, counts)?,
                    4 => vertical_fixed::<S, 4>(input, width, n, keys, sink, counts)?,
                    8 => vertical_fixed::<S, 8>(input, width, n, keys, sink, counts)?,
                    k => return Err(Error::UnsupportedPredicateCount(k)),
                },
                SharedScanStrategy::Horizontal128 => {
                    sse::shared_scan_horizontal(buf.words(), width, n, keys, sink, counts)
                }
                SharedScanStrategy::Horizontal256 => {
                    avx2::shared_scan_horizontal(buf.words(), width, n, keys, sink, counts)
                }
                SharedScanStrategy::Sequential { .. } | SharedScanStrategy::Threaded { .. } => {
                    return Err(Error::InvalidArgument)
                }
            }
        }
        Ok(())
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn simd_scan<S: MatchSink>(
        self,
        _keys: &[u32],
        _buf: &CompressedBuf,
        _width: CodeWidth,
        _n: usize,
        _sink: &mut S,
        _counts: &mut [usize],
    ) -> Result<()> {
        Err(Error::NotSupported(self.name()))
    }
}

impl fmt::Display for SharedScanStrategy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedScanStrategy::Sequential { scan } => write!(f, "sequential({})", scan),
            SharedScanStrategy::Threaded { threads, scan } => {
                write!(f, "threaded({}, threads={})", scan, threads)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// # Safety
/// Requires SSE4.1, see [`crate::simd::sse`].
#[cfg(target_arch = "x86_64")]
#[inline]
unsafe fn vertical_fixed<S: MatchSink, const K: usize>(
    input: &[u8],
    width: CodeWidth,
    n: usize,
    keys: &[u32],
    sink: &mut S,
    counts: &mut [usize],
) -> Result<()> {
    let keys: &[u32; K] = keys
        .try_into()
        .map_err(|_| Error::UnsupportedPredicateCount(keys.len()))?;
    crate::simd::sse::shared_scan_vertical_fixed::<S, K>(input, width, n, keys, sink, counts);
    Ok(())
}

#[inline]
fn sequential_scan(
    scan: ScanStrategy,
    keys: &[u32],
    buf: &CompressedBuf,
    width: CodeWidth,
    n: usize,
    res: &mut SharedBitmaps,
    counts: &mut [usize],
) -> Result<()> {
    match res {
        SharedBitmaps::Separate(bitmaps) => {
            for ((key, bm), count) in keys.iter().zip(bitmaps.iter_mut()).zip(counts.iter_mut()) {
                *count = scan.scan(*key, buf, width, n, bm)?;
            }
        }
        SharedBitmaps::Interleaved { keys: k, bytes } => {
            let mut sink = InterleavedSink { keys: *k, bytes };
            let mut bm = crate::bitmap::new_bitmap(n);
            for (key_idx, (key, count)) in keys.iter().zip(counts.iter_mut()).enumerate() {
                *count = scan.scan(*key, buf, width, n, &mut bm)?;
                for (byte_idx, b) in bm[..n.div_ceil(8)].iter().enumerate() {
                    sink.put_byte(key_idx, byte_idx, *b);
                }
            }
        }
    }
    Ok(())
}

#[inline]
fn threaded_scan(
    scan: ScanStrategy,
    threads: usize,
    keys: &[u32],
    buf: &CompressedBuf,
    width: CodeWidth,
    n: usize,
    bitmaps: &mut [Vec<u8>],
) -> Result<Vec<usize>> {
    let chunk = keys.len().div_ceil(threads.max(1));
    log::debug!(
        "shared scan: {} keys over {} threads, {} keys per thread",
        keys.len(),
        keys.len().div_ceil(chunk),
        chunk
    );
    let res: Vec<Result<Vec<usize>>> = Parallel::new()
        .each(
            keys.chunks(chunk).zip(bitmaps.chunks_mut(chunk)),
            |(keys, bitmaps)| {
                keys.iter()
                    .zip(bitmaps.iter_mut())
                    .map(|(key, bm)| scan.scan(*key, buf, width, n, bm))
                    .collect::<Result<Vec<_>>>()
            },
        )
        .run();
    let mut counts = Vec::with_capacity(keys.len());
    for r in res {
        counts.extend(r?);
    }
    Ok(counts)
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

    fn all_supported() -> Vec<SharedScanStrategy> {
        let scan = ScanStrategy::best(SimdLevel::detect());
        SharedScanStrategy::all(scan, 3)
            .into_iter()
            .filter(|s| s.is_supported())
            .collect()
    }

    #[test]
    fn test_shared_scan_three_keys() {
        let input: Vec<u16> = vec![1, 2, 3, 3, 2, 1, 1, 2, 3, 1, 2, 3];
        let n = input.len();
        let buf = pack(&input, width(9));
        let keys = [1, 2, 3];
        for strategy in all_supported() {
            if strategy == SharedScanStrategy::VerticalFixed {
                continue;
            }
            for layout in [BitmapLayout::Separate, BitmapLayout::Interleaved] {
                if !strategy.supports_layout(layout) {
                    continue;
                }
                let mut res = SharedBitmaps::new(layout, keys.len(), n);
                let counts = strategy.scan(&keys, &buf, width(9), n, &mut res).unwrap();
                assert_eq!(counts, vec![4, 4, 4], "strategy={}, layout={:?}", strategy, layout);
                for (j, key) in keys.iter().enumerate() {
                    for (i, v) in input.iter().enumerate() {
                        assert_eq!(res.key_bit(j, i), *v as u32 == *key);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shared_scan_match_single_scan() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for bits in [1, 3, 7, 8, 9, 12, 15, 16] {
            let w = width(bits);
            let max = w.value_mask().min(9);
            for n in [1, 13, 32, 70, 513] {
                let input: Vec<u32> = (0..n).map(|_| rng.random_range(0..=max)).collect();
                let buf = pack(&input, w);
                for k in [1, 2, 4, 5, 8, 11] {
                    let keys: Vec<u32> = (0..k).map(|_| rng.random_range(0..=max + 1)).collect();
                    let expected: Vec<(Vec<u8>, usize)> = keys
                        .iter()
                        .map(|key| {
                            let mut bm = new_bitmap(n);
                            let c = ScanStrategy::Scalar.scan(*key, &buf, w, n, &mut bm).unwrap();
                            (bm[..n.div_ceil(8)].to_vec(), c)
                        })
                        .collect();
                    for strategy in all_supported() {
                        if strategy == SharedScanStrategy::VerticalFixed
                            && !SharedScanStrategy::FIXED_KEY_COUNTS.contains(&k)
                        {
                            continue;
                        }
                        for layout in [BitmapLayout::Separate, BitmapLayout::Interleaved] {
                            if !strategy.supports_layout(layout) {
                                continue;
                            }
                            let mut res = SharedBitmaps::new(layout, k, n);
                            let counts = strategy.scan(&keys, &buf, w, n, &mut res).unwrap();
                            for (j, (bm, c)) in expected.iter().enumerate() {
                                assert_eq!(counts[j], *c, "strategy={}, width={}", strategy, bits);
                                assert_eq!(&res.key_bitmap(j, n), bm, "strategy={}", strategy);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_vertical_fixed_key_count() {
        if !SharedScanStrategy::VerticalFixed.is_supported() {
            return;
        }
        let input: Vec<u16> = (0..40).map(|i| i % 4).collect();
        let buf = pack(&input, width(2));
        let mut res = SharedBitmaps::new(BitmapLayout::Separate, 3, input.len());
        let r = SharedScanStrategy::VerticalFixed.scan(&[0, 1, 2], &buf, width(2), 40, &mut res);
        assert!(matches!(r, Err(Error::UnsupportedPredicateCount(3))));

        let mut res = SharedBitmaps::new(BitmapLayout::Separate, 4, input.len());
        let counts = SharedScanStrategy::VerticalFixed
            .scan(&[0, 1, 2, 3], &buf, width(2), 40, &mut res)
            .unwrap();
        assert_eq!(counts, vec![10; 4]);
        if let SharedBitmaps::Separate(bitmaps) = &res {
            assert_eq!(bitmaps[1].bitmap_true_index_iter(40).next(), Some(1));
        }
    }

    #[test]
    fn test_threaded_layout() {
        let strategy = SharedScanStrategy::Threaded {
            threads: 2,
            scan: ScanStrategy::Scalar,
        };
        let input: Vec<u16> = (0..100).collect();
        let buf = pack(&input, width(7));
        let mut res = SharedBitmaps::new(BitmapLayout::Interleaved, 2, 100);
        let r = strategy.scan(&[1, 2], &buf, width(7), 100, &mut res);
        assert!(matches!(r, Err(Error::NotSupported(_))));

        // more threads than keys.
        let strategy = SharedScanStrategy::Threaded {
            threads: 16,
            scan: ScanStrategy::Scalar,
        };
        let mut res = SharedBitmaps::new(BitmapLayout::Separate, 3, 100);
        let counts = strategy.scan(&[5, 50, 500], &buf, width(7), 100, &mut res).unwrap();
        assert_eq!(counts, vec![1, 1, 0]);
        assert!(res.key_bit(0, 5));
        assert!(res.key_bit(1, 50));
    }

    #[test]
    fn test_shared_scan_empty() {
        let buf = pack::<u16>(&[], width(9));
        for strategy in all_supported() {
            let mut res = SharedBitmaps::new(BitmapLayout::Separate, 2, 0);
            let counts = strategy.scan(&[1, 2], &buf, width(9), 0, &mut res).unwrap();
            assert_eq!(counts, vec![0, 0]);
        }
        let input: Vec<u16> = (0..10).collect();
        let buf = pack(&input, width(4));
        let mut res = SharedBitmaps::new(BitmapLayout::Separate, 0, 10);
        let strategy = SharedScanStrategy::Sequential {
            scan: ScanStrategy::Scalar,
        };
        assert!(strategy.scan(&[], &buf, width(4), 10, &mut res).unwrap().is_empty());
    }
}
