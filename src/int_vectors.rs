//! Packed integer arrays.
//!
//! [`CompactVector`] stores each integer in the minimum fixed number of bits,
//! packed into 64-bit words, with constant-time read and write by index and
//! no materialized decoded array. Grammar rules, expansion lengths, samples,
//! and permutations are all held this way.
pub mod compact_vector;

pub use compact_vector::CompactVector;
