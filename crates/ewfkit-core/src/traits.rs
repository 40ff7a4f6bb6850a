//! Capability traits for ewfkit

use crate::error::Result;

/// DEFLATE compression as an injected capability.
///
/// The chunk codec never talks to a compression library directly; it is
/// parameterised over this pair of traits so tests can substitute an
/// identity implementation.
pub trait Compressor {
    /// Compress `data` at `level` (1 = fastest, 9 = best).
    ///
    /// Returns the compressed stream, or an error when the output would not
    /// fit the codec's scratch budget.
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>>;
}

/// Decompression side of the [`Compressor`] capability
pub trait Decompressor {
    /// Decompress `data` into a buffer of at most `expected_size` bytes.
    ///
    /// The returned buffer may be shorter than `expected_size` (last chunk of
    /// the media), never longer.
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}
