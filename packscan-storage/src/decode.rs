//! Decode strategies.
//!
//! Every strategy produces output identical to [`DecodeStrategy::Scalar`].
//! Vector strategies write whole lane groups, so the output slice must
//! hold at least `decoded_len(n)` entries; entries past n are
//! unspecified.

use crate::compression::bitpacking::{compressed_size, decoded_len, CodeWidth, CompressedBuf};
use crate::compression::scalar;
use crate::error::{Error, Result};
use crate::simd::SimdLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Bit cursor over 64-bit words.
    Scalar,
    /// Masks regenerated per group, window reloaded only when exhausted.
    Sse128Sweep,
    /// Two precomputed mask sets, one unaligned load per group.
    Sse128,
    /// Aligned block loads combined with byte align.
    Sse128Aligned,
    /// `Sse128` with 32 values per iteration.
    Sse128Unrolled,
    /// 8 lanes, multiply and fixed shift.
    Avx256,
    /// 8 lanes, variable shift and mask.
    Avx2Shift,
}

impl DecodeStrategy {
    pub const ALL: [DecodeStrategy; 7] = [
        DecodeStrategy::Scalar,
        DecodeStrategy::Sse128Sweep,
        DecodeStrategy::Sse128,
        DecodeStrategy::Sse128Aligned,
        DecodeStrategy::Sse128Unrolled,
        DecodeStrategy::Avx256,
        DecodeStrategy::Avx2Shift,
    ];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            DecodeStrategy::Scalar => "scalar",
            DecodeStrategy::Sse128Sweep => "sse128_sweep",
            DecodeStrategy::Sse128 => "sse128",
            DecodeStrategy::Sse128Aligned => "sse128_aligned",
            DecodeStrategy::Sse128Unrolled => "sse128_unrolled",
            DecodeStrategy::Avx256 => "avx256",
            DecodeStrategy::Avx2Shift => "avx2_shift",
        }
    }

    /// SIMD level this strategy needs.
    #[inline]
    pub fn required_level(self) -> SimdLevel {
        match self {
            DecodeStrategy::Scalar => SimdLevel::Scalar,
            DecodeStrategy::Sse128Sweep
            | DecodeStrategy::Sse128
            | DecodeStrategy::Sse128Aligned
            | DecodeStrategy::Sse128Unrolled => SimdLevel::Sse41,
            DecodeStrategy::Avx256 | DecodeStrategy::Avx2Shift => SimdLevel::Avx2,
        }
    }

    #[inline]
    pub fn is_supported(self) -> bool {
        SimdLevel::detect().supports(self.required_level())
    }

    /// Returns the fastest strategy for given level.
    #[inline]
    pub fn best(level: SimdLevel) -> Self {
        match level {
            SimdLevel::Scalar => DecodeStrategy::Scalar,
            SimdLevel::Sse41 => DecodeStrategy::Sse128Unrolled,
            SimdLevel::Avx2 => DecodeStrategy::Avx256,
        }
    }

    /// Decode first n values of buffer into res.
    ///
    /// Panics if buffer or output is smaller than required for n values.
    /// Returns error if current CPU lacks instructions of this strategy.
    pub fn decode(
        self,
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut [u32],
    ) -> Result<()> {
        assert!(buf.len() >= compressed_size(width, n), "compressed buffer too small");
        if n == 0 {
            return Ok(());
        }
        if self == DecodeStrategy::Scalar {
            assert!(res.len() >= n, "decode output too small");
            scalar::decode(buf.words(), width, n, res);
            return Ok(());
        }
        assert!(res.len() >= decoded_len(n), "decode output too small");
        if !self.is_supported() {
            return Err(Error::NotSupported(self.name()));
        }
        self.decode_simd(buf, width, n, res)
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    fn decode_simd(
        self,
        buf: &CompressedBuf,
        width: CodeWidth,
        n: usize,
        res: &mut [u32],
    ) -> Result<()> {
        use crate::simd::{avx2, sse};
        let input = buf.as_bytes();
        // SAFETY: required SIMD level is checked by caller, sizes of
        // input and output are asserted above, and input is 32-byte
        // aligned.
        unsafe {
            match self {
                DecodeStrategy::Scalar => scalar::decode(buf.words(), width, n, res),
                DecodeStrategy::Sse128Sweep => sse::decode_sweep(input, width, n, res),
                DecodeStrategy::Sse128 => sse::decode(input, width, n, res),
                DecodeStrategy::Sse128Aligned => sse::decode_aligned(input, width, n, res),
                DecodeStrategy::Sse128Unrolled => sse::decode_unrolled(input, width, n, res),
                DecodeStrategy::Avx256 => avx2::decode(input, width, n, res),
                DecodeStrategy::Avx2Shift => avx2::decode_shift(input, width, n, res),
            }
        }
        Ok(())
    }

    #[cfg(not(target_arch = "x86_64"))]
    #[inline]
    fn decode_simd(
        self,
        _buf: &CompressedBuf,
        _width: CodeWidth,
        _n: usize,
        _res: &mut [u32],
    ) -> Result<()> {
        Err(Error::NotSupported(self.name()))
    }
}

impl fmt::Display for DecodeStrategy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
