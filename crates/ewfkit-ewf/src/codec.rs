//! Chunk codec: packed chunk bytes <-> plaintext media bytes
//!
//! Decode handles pattern-fill expansion, zlib decompression, and checksum
//! verification; encode handles pattern-fill detection, optional
//! compression with raw fallback, and checksum stamping. DEFLATE itself is
//! an injected capability so tests can stub it.

use std::io::{Cursor, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use ewfkit_core::{CompressionLevel, Compressor, Decompressor, Error, Result};

use crate::checksum::ewf_checksum;
use crate::chunk_table::RangeFlags;

/// Size of the checksum trailer on raw chunks
pub const CHECKSUM_SIZE: usize = 4;
/// On-disk size of a pattern-fill chunk payload
pub const PATTERN_FILL_SIZE: usize = 16;

/// flate2-backed production implementation of the compression capability
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCodec;

impl Compressor for ZlibCodec {
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::invalid_argument(format!("deflate: {}", e)))
    }
}

impl Decompressor for ZlibCodec {
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(Cursor::new(data));
        let mut output = Vec::with_capacity(expected_size);
        decoder
            .by_ref()
            .take(expected_size as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| Error::invalid_argument(format!("inflate: {}", e)))?;
        if output.len() > expected_size {
            return Err(Error::invalid_argument(
                "inflated data exceeds chunk size".to_string(),
            ));
        }
        Ok(output)
    }
}

/// Write-path knobs, fixed when the writer is configured
#[derive(Debug, Clone)]
pub struct CodecOptions {
    pub compression: CompressionLevel,
    /// Emit 16-byte pattern-fill chunks when the plaintext allows it
    pub pattern_fill: bool,
    /// Compress all-zero chunks even at [`CompressionLevel::None`]
    pub compress_empty_block: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::None,
            pattern_fill: false,
            compress_empty_block: false,
        }
    }
}

/// Result of encoding one chunk
#[derive(Debug, Clone)]
pub struct PackedChunk {
    pub data: Vec<u8>,
    pub flags: RangeFlags,
}

/// Result of decoding one chunk
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub data: Vec<u8>,
    /// The raw-chunk checksum failed; data is the unverified payload
    pub corrupted: bool,
}

/// Detect an 8-byte-periodic plaintext, the precondition for pattern fill
pub fn detect_pattern(buf: &[u8]) -> Option<[u8; 8]> {
    if buf.len() < 8 || buf.len() % 8 != 0 {
        return None;
    }
    let pattern: [u8; 8] = buf[..8].try_into().unwrap();
    for window in buf[8..].chunks_exact(8) {
        if window != pattern {
            return None;
        }
    }
    Some(pattern)
}

/// The chunk codec, parameterised over the DEFLATE capability
pub struct ChunkCodec<C = ZlibCodec> {
    deflate: C,
}

impl Default for ChunkCodec<ZlibCodec> {
    fn default() -> Self {
        Self { deflate: ZlibCodec }
    }
}

impl<C: Compressor + Decompressor> ChunkCodec<C> {
    pub fn new(deflate: C) -> Self {
        Self { deflate }
    }

    /// Turn packed chunk bytes into plaintext media bytes.
    ///
    /// `declared_size` is the chunk size from the media model (the last
    /// chunk of the media may inflate to less). A checksum mismatch on a
    /// raw chunk is reported via [`DecodedChunk::corrupted`], not an error;
    /// a DEFLATE failure is a [`Error::ChecksumOrDecompress`].
    pub fn decode(
        &self,
        bytes: &[u8],
        flags: RangeFlags,
        declared_size: usize,
        chunk_index: u64,
    ) -> Result<DecodedChunk> {
        if flags.is_sparse() {
            // Sparse ranges are expanded by the caller from zero fill and
            // must never reach the codec.
            return Err(Error::invalid_argument(format!(
                "sparse chunk {} reached the codec",
                chunk_index
            )));
        }
        if flags.uses_pattern_fill() {
            if bytes.len() != PATTERN_FILL_SIZE {
                return Err(Error::chunk(
                    chunk_index,
                    format!("pattern fill payload of {} bytes", bytes.len()),
                ));
            }
            let pattern: [u8; 8] = bytes[..8].try_into().unwrap();
            let count = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
            let length = count * 8;
            if length > declared_size {
                return Err(Error::chunk(
                    chunk_index,
                    format!("pattern fill expands to {} > chunk size", length),
                ));
            }
            let mut data = Vec::with_capacity(length);
            for _ in 0..count {
                data.extend_from_slice(&pattern);
            }
            return Ok(DecodedChunk {
                data,
                corrupted: false,
            });
        }
        if flags.is_compressed() {
            // The zlib stream carries its own Adler-32 trailer; inflate
            // verifies it, so no separate checksum pass is needed.
            let data = self
                .deflate
                .decompress(bytes, declared_size)
                .map_err(|e| Error::chunk(chunk_index, e.to_string()))?;
            return Ok(DecodedChunk {
                data,
                corrupted: false,
            });
        }
        if flags.has_checksum() {
            if bytes.len() < CHECKSUM_SIZE {
                return Err(Error::chunk(
                    chunk_index,
                    format!("raw chunk of {} bytes", bytes.len()),
                ));
            }
            let payload = &bytes[..bytes.len() - CHECKSUM_SIZE];
            let stored = u32::from_le_bytes(bytes[bytes.len() - CHECKSUM_SIZE..].try_into().unwrap());
            let corrupted = ewf_checksum(payload) != stored;
            return Ok(DecodedChunk {
                data: payload.to_vec(),
                corrupted,
            });
        }
        Ok(DecodedChunk {
            data: bytes.to_vec(),
            corrupted: false,
        })
    }

    /// Turn plaintext media bytes into packed chunk bytes
    pub fn encode(&self, buf: &[u8], options: &CodecOptions) -> Result<PackedChunk> {
        if options.pattern_fill {
            if let Some(pattern) = detect_pattern(buf) {
                let mut data = Vec::with_capacity(PATTERN_FILL_SIZE);
                data.extend_from_slice(&pattern);
                data.extend_from_slice(&((buf.len() / 8) as u64).to_le_bytes());
                return Ok(PackedChunk {
                    data,
                    flags: RangeFlags(
                        RangeFlags::USES_PATTERN_FILL | RangeFlags::HAS_CHECKSUM,
                    ),
                });
            }
        }
        let compress = match options.compression {
            CompressionLevel::None => {
                options.compress_empty_block && buf.iter().all(|&b| b == 0)
            }
            _ => true,
        };
        if compress {
            let level = match options.compression {
                CompressionLevel::Best => CompressionLevel::Best.zlib_level(),
                _ => CompressionLevel::Fast.zlib_level(),
            };
            let compressed = self.deflate.compress(buf, level)?;
            if compressed.len() < buf.len() + CHECKSUM_SIZE {
                return Ok(PackedChunk {
                    data: compressed,
                    flags: RangeFlags(RangeFlags::IS_COMPRESSED),
                });
            }
            // Incompressible chunk: store raw with a checksum trailer
        }
        let mut data = Vec::with_capacity(buf.len() + CHECKSUM_SIZE);
        data.extend_from_slice(buf);
        data.extend_from_slice(&ewf_checksum(buf).to_le_bytes());
        Ok(PackedChunk {
            data,
            flags: RangeFlags(RangeFlags::HAS_CHECKSUM),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ChunkCodec {
        ChunkCodec::default()
    }

    #[test]
    fn test_raw_roundtrip() {
        let plaintext = b"raw chunk payload".to_vec();
        let packed = codec()
            .encode(&plaintext, &CodecOptions::default())
            .unwrap();
        assert_eq!(packed.data.len(), plaintext.len() + CHECKSUM_SIZE);
        assert!(packed.flags.has_checksum());

        let decoded = codec()
            .decode(&packed.data, packed.flags, plaintext.len(), 0)
            .unwrap();
        assert!(!decoded.corrupted);
        assert_eq!(decoded.data, plaintext);
    }

    #[test]
    fn test_raw_checksum_mismatch_reported() {
        let plaintext = b"raw chunk payload".to_vec();
        let mut packed = codec()
            .encode(&plaintext, &CodecOptions::default())
            .unwrap();
        packed.data[3] ^= 0xff;

        let decoded = codec()
            .decode(&packed.data, packed.flags, plaintext.len(), 7)
            .unwrap();
        assert!(decoded.corrupted);
        assert_eq!(decoded.data.len(), plaintext.len());
    }

    #[test]
    fn test_compressed_roundtrip() {
        let plaintext = vec![0x5au8; 32768];
        let options = CodecOptions {
            compression: CompressionLevel::Best,
            ..Default::default()
        };
        let packed = codec().encode(&plaintext, &options).unwrap();
        assert!(packed.flags.is_compressed());
        assert!(packed.data.len() < plaintext.len());

        let decoded = codec()
            .decode(&packed.data, packed.flags, plaintext.len(), 0)
            .unwrap();
        assert_eq!(decoded.data, plaintext);
    }

    #[test]
    fn test_incompressible_falls_back_to_raw() {
        // A short high-entropy buffer will not shrink under deflate
        let plaintext: Vec<u8> = (0u32..64)
            .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
            .collect();
        let options = CodecOptions {
            compression: CompressionLevel::Fast,
            ..Default::default()
        };
        let packed = codec().encode(&plaintext, &options).unwrap();
        if !packed.flags.is_compressed() {
            assert_eq!(packed.data.len(), plaintext.len() + CHECKSUM_SIZE);
        }
        let decoded = codec()
            .decode(&packed.data, packed.flags, plaintext.len(), 0)
            .unwrap();
        assert_eq!(decoded.data, plaintext);
    }

    #[test]
    fn test_corrupted_deflate_stream_is_error() {
        let plaintext = vec![0u8; 4096];
        let options = CodecOptions {
            compression: CompressionLevel::Fast,
            ..Default::default()
        };
        let mut packed = codec().encode(&plaintext, &options).unwrap();
        assert!(packed.flags.is_compressed());
        let middle = packed.data.len() / 2;
        packed.data[middle] ^= 0xff;

        let result = codec().decode(&packed.data, packed.flags, plaintext.len(), 42);
        assert!(matches!(
            result,
            Err(Error::ChecksumOrDecompress { chunk_index: 42, .. })
        ));
    }

    #[test]
    fn test_pattern_fill_roundtrip() {
        let pattern = [0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xba, 0xbe];
        let plaintext: Vec<u8> = pattern.iter().cycle().take(32768).copied().collect();
        let options = CodecOptions {
            compression: CompressionLevel::Best,
            pattern_fill: true,
            ..Default::default()
        };
        let packed = codec().encode(&plaintext, &options).unwrap();
        assert_eq!(packed.data.len(), PATTERN_FILL_SIZE);
        assert!(packed.flags.uses_pattern_fill());

        let decoded = codec()
            .decode(&packed.data, packed.flags, plaintext.len(), 0)
            .unwrap();
        assert_eq!(decoded.data, plaintext);
    }

    #[test]
    fn test_pattern_detection_rejects_aperiodic() {
        assert!(detect_pattern(&[1, 2, 3]).is_none());
        let mut buf: Vec<u8> = [7u8; 8].iter().cycle().take(64).copied().collect();
        assert!(detect_pattern(&buf).is_some());
        buf[33] = 8;
        assert!(detect_pattern(&buf).is_none());
        // length not a multiple of the pattern
        assert!(detect_pattern(&[7u8; 12]).is_none());
    }

    #[test]
    fn test_sparse_chunk_rejected() {
        let result = codec().decode(&[], RangeFlags(RangeFlags::IS_SPARSE), 512, 3);
        assert!(result.is_err());
    }

    #[test]
    fn test_compress_empty_block_option() {
        let zeros = vec![0u8; 4096];
        let options = CodecOptions {
            compression: CompressionLevel::None,
            compress_empty_block: true,
            ..Default::default()
        };
        let packed = codec().encode(&zeros, &options).unwrap();
        assert!(packed.flags.is_compressed());
        assert!(packed.data.len() < zeros.len());
    }

    #[test]
    fn test_short_last_chunk_decompresses() {
        let plaintext = vec![0x11u8; 100];
        let options = CodecOptions {
            compression: CompressionLevel::Fast,
            ..Default::default()
        };
        let packed = codec().encode(&plaintext, &options).unwrap();
        // declared chunk size is larger than the final short chunk
        let decoded = codec()
            .decode(&packed.data, packed.flags, 512, 0)
            .unwrap();
        assert_eq!(decoded.data.len(), 100);
    }
}
