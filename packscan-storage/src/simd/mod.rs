//! SIMD capability detection and vector kernels.
//!
//! Kernels are `unsafe fn` compiled with `#[target_feature]`. Callers
//! must check [`SimdLevel::detect`] before invoking them, which is done
//! once per call by the strategy enums in `decode`, `scan` and `shared`.
//!
//! | Level   | Features           | Registers |
//! |---------|--------------------|-----------|
//! | Scalar  | -                  | u64       |
//! | Sse41   | SSSE3, SSE4.1      | 128-bit   |
//! | Avx2    | AVX2               | 256-bit   |

#[cfg(target_arch = "x86_64")]
pub(crate) mod avx2;
#[cfg(target_arch = "x86_64")]
pub(crate) mod sse;

use serde::{Deserialize, Serialize};
use std::fmt;

/// SIMD capability level, ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SimdLevel {
    Scalar,
    /// SSSE3 byte shuffle and SSE4.1 32-bit multiply.
    Sse41,
    /// 256-bit integer lanes.
    Avx2,
}

impl SimdLevel {
    /// Detect the highest level supported by current CPU.
    #[inline]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                return SimdLevel::Avx2;
            }
            if is_x86_feature_detected!("ssse3") && is_x86_feature_detected!("sse4.1") {
                return SimdLevel::Sse41;
            }
        }
        SimdLevel::Scalar
    }

    /// Returns whether this level covers the required one.
    #[inline]
    pub fn supports(self, required: SimdLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for SimdLevel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimdLevel::Scalar => "scalar",
            SimdLevel::Sse41 => "sse4.1",
            SimdLevel::Avx2 => "avx2",
        };
        f.write_str(s)
    }
}

/// Bits of the last group that belong to values below n.
#[inline]
pub(crate) const fn valid_bits(idx: usize, n: usize, group: usize) -> u32 {
    if idx + group <= n {
        u32::MAX
    } else {
        (1u32 << (n - idx)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simd_level_order() {
        assert!(SimdLevel::Avx2.supports(SimdLevel::Sse41));
        assert!(SimdLevel::Sse41.supports(SimdLevel::Scalar));
        assert!(!SimdLevel::Scalar.supports(SimdLevel::Sse41));
        assert!(SimdLevel::detect().supports(SimdLevel::Scalar));
        assert_eq!(SimdLevel::Sse41.to_string(), "sse4.1");
    }

    #[test]
    fn test_valid_bits() {
        assert_eq!(valid_bits(0, 100, 8), u32::MAX);
        assert_eq!(valid_bits(96, 100, 8), 0xF);
        assert_eq!(valid_bits(96, 97, 32), 1);
    }
}
