//! Compression algorithms.
//!
//! Fixed-width bitpacking of small integers, the scalar codec over the
//! packed words, and the constant masks used by vector kernels.
pub mod bitpacking;
pub mod mask;
pub mod scalar;
