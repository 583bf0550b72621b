//! Random access queries over compressed text representations.
//!
//! Every accessor here answers the same two questions about the text its
//! compressed input derives, without ever materializing that text:
//!
//! - [`RandomAccess::at()`] returns the byte at one position.
//! - [`RandomAccess::substr()`] extracts a run of bytes into a buffer.
//!
//! [`NaiveGrammar`] walks the grammar from the start rule on every query,
//! [`SampledScanGrammar`] shortcuts the walk with position samples, and
//! [`LzEnd`] jumps between phrases of an LZ-End parse through a succinct
//! index.
pub mod lzend;
pub mod naive;
pub mod sampled_scan;

pub use lzend::LzEnd;
pub use naive::NaiveGrammar;
pub use sampled_scan::{
    SampledScanGrammar, SampledScanGrammar25600, SampledScanGrammar512, SampledScanGrammar6400,
};

/// Interface for random access into the text derived by a compressed
/// representation.
///
/// All queries take `&self` and share no mutable state, so a built accessor
/// may be queried from multiple threads.
pub trait RandomAccess {
    /// Returns the length of the derived text.
    fn source_length(&self) -> usize;

    /// Returns the byte at position `i` of the derived text, or [`None`] if
    /// `i` is out of bounds.
    fn at(&self, i: usize) -> Option<u8>;

    /// Writes the derived text starting at position `i` into `buf`, stopping
    /// at the end of the buffer or of the text, and returns the number of
    /// bytes written.
    fn substr(&self, i: usize, buf: &mut [u8]) -> usize;
}
