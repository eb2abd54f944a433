//! Bit-packed integer columns with SIMD decode and predicate scans.
//!
//! Values of a column are packed with one code width of 1 to 16 bits.
//! The packed stream can be decoded back, scanned for one key, or
//! scanned for many keys at once, each through a family of strategies
//! ranging from a scalar bit cursor to 256-bit kernels.
pub mod bitmap;
pub mod column;
pub mod compression;
pub mod config;
pub mod decode;
pub mod error;
pub mod scan;
pub mod scanner;
pub mod shared;
pub mod simd;

pub mod prelude {
    pub use crate::bitmap::*;
    pub use crate::column::*;
    pub use crate::compression::bitpacking::*;
    pub use crate::config::*;
    pub use crate::decode::*;
    pub use crate::error::*;
    pub use crate::scan::*;
    pub use crate::scanner::*;
    pub use crate::shared::*;
    pub use crate::simd::SimdLevel;
}
