//! Media model and volume-section codec
//!
//! The media model is what makes random access well-defined: chunk size,
//! sector size, chunk and sector counts. It is populated by the first
//! `volume`/`disk` section on read (and must match every later `data`
//! section), or by the caller before the first written chunk. After that it
//! is frozen.

use ewfkit_core::{CompressionLevel, Error, MediaFlags, MediaType, Result};

use crate::checksum::ewf_checksum;

/// Size of the E01-family volume section body
pub const VOLUME_BODY_SIZE_E01: usize = 1052;
/// Size of the EWF-S01 volume section body
pub const VOLUME_BODY_SIZE_S01: usize = 94;

/// Media geometry and identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaModel {
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub bytes_per_sector: u32,
    pub sectors_per_chunk: u32,
    pub number_of_chunks: u64,
    pub number_of_sectors: u64,
    pub compression_level: Option<CompressionLevel>,
    /// Error granularity in sectors
    pub error_granularity: u32,
    /// Segment set identifier
    pub guid: [u8; 16],
}

impl Default for MediaModel {
    fn default() -> Self {
        Self {
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::default(),
            bytes_per_sector: 0,
            sectors_per_chunk: 0,
            number_of_chunks: 0,
            number_of_sectors: 0,
            compression_level: None,
            error_granularity: 0,
            guid: [0u8; 16],
        }
    }
}

impl MediaModel {
    /// Whether a volume definition has been observed or configured
    pub fn is_defined(&self) -> bool {
        self.bytes_per_sector != 0 && self.sectors_per_chunk != 0
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> u32 {
        self.sectors_per_chunk.saturating_mul(self.bytes_per_sector)
    }

    /// Total media size in bytes
    pub fn media_size(&self) -> u64 {
        self.number_of_sectors * self.bytes_per_sector as u64
    }

    /// Validate the §3 invariants
    pub fn validate(&self) -> Result<()> {
        if self.bytes_per_sector == 0 || self.bytes_per_sector > i32::MAX as u32 {
            return Err(Error::OutOfRange {
                field: "bytes_per_sector",
                value: self.bytes_per_sector as u64,
                limit: i32::MAX as u64,
            });
        }
        if self.sectors_per_chunk == 0 || self.sectors_per_chunk > i32::MAX as u32 {
            return Err(Error::OutOfRange {
                field: "sectors_per_chunk",
                value: self.sectors_per_chunk as u64,
                limit: i32::MAX as u64,
            });
        }
        let chunk_size = self.bytes_per_sector as u64 * self.sectors_per_chunk as u64;
        if chunk_size > i32::MAX as u64 {
            return Err(Error::OutOfRange {
                field: "chunk_size",
                value: chunk_size,
                limit: i32::MAX as u64,
            });
        }
        if self.media_size() > chunk_size << 32 {
            return Err(Error::OutOfRange {
                field: "media_size",
                value: self.media_size(),
                limit: chunk_size << 32,
            });
        }
        Ok(())
    }

    /// Derived chunk count for a given media size
    pub fn chunks_for_media_size(&self, media_size: u64) -> u64 {
        let chunk_size = self.chunk_size() as u64;
        if chunk_size == 0 {
            0
        } else {
            media_size.div_ceil(chunk_size)
        }
    }

    /// Check a later volume/data definition against this one
    pub fn check_consistent(&self, other: &MediaModel) -> Result<()> {
        if self.bytes_per_sector != other.bytes_per_sector {
            return Err(Error::InconsistentVolume {
                field: "bytes_per_sector",
            });
        }
        if self.sectors_per_chunk != other.sectors_per_chunk {
            return Err(Error::InconsistentVolume {
                field: "sectors_per_chunk",
            });
        }
        if self.number_of_sectors != other.number_of_sectors {
            return Err(Error::InconsistentVolume {
                field: "number_of_sectors",
            });
        }
        if self.media_type != other.media_type {
            return Err(Error::InconsistentVolume { field: "media_type" });
        }
        if self.guid != other.guid {
            return Err(Error::InconsistentVolume { field: "guid" });
        }
        Ok(())
    }

    /// Parse the 1052-byte E01-family volume body
    pub fn parse_e01(body: &[u8]) -> Result<Self> {
        if body.len() < VOLUME_BODY_SIZE_E01 {
            return Err(Error::invalid_format(
                "volume section",
                format!("{} bytes, need {}", body.len(), VOLUME_BODY_SIZE_E01),
            ));
        }
        let stored = u32::from_le_bytes(body[1048..1052].try_into().unwrap());
        if ewf_checksum(&body[..1048]) != stored {
            return Err(Error::invalid_format("volume section", "checksum mismatch"));
        }
        let compression_level = match body[52] {
            0x00 => Some(CompressionLevel::None),
            0x01 => Some(CompressionLevel::Fast),
            0x02 => Some(CompressionLevel::Best),
            _ => None,
        };
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&body[64..80]);

        Ok(Self {
            media_type: MediaType::from(body[0]),
            media_flags: MediaFlags(body[36]),
            number_of_chunks: u32::from_le_bytes(body[4..8].try_into().unwrap()) as u64,
            sectors_per_chunk: u32::from_le_bytes(body[8..12].try_into().unwrap()),
            bytes_per_sector: u32::from_le_bytes(body[12..16].try_into().unwrap()),
            number_of_sectors: u64::from_le_bytes(body[16..24].try_into().unwrap()),
            compression_level,
            error_granularity: u32::from_le_bytes(body[56..60].try_into().unwrap()),
            guid,
        })
    }

    /// Serialise the 1052-byte E01-family volume body
    pub fn to_e01_bytes(&self) -> Vec<u8> {
        let mut body = vec![0u8; VOLUME_BODY_SIZE_E01];
        body[0] = self.media_type.to_byte();
        body[4..8].copy_from_slice(&(self.number_of_chunks.min(u32::MAX as u64) as u32).to_le_bytes());
        body[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        body[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        body[16..24].copy_from_slice(&self.number_of_sectors.to_le_bytes());
        body[36] = self.media_flags.0;
        body[52] = match self.compression_level {
            Some(CompressionLevel::Fast) => 0x01,
            Some(CompressionLevel::Best) => 0x02,
            _ => 0x00,
        };
        body[56..60].copy_from_slice(&self.error_granularity.to_le_bytes());
        body[64..80].copy_from_slice(&self.guid);
        let checksum = ewf_checksum(&body[..1048]);
        body[1048..1052].copy_from_slice(&checksum.to_le_bytes());
        body
    }

    /// Parse the 94-byte EWF-S01 volume body
    pub fn parse_s01(body: &[u8]) -> Result<Self> {
        if body.len() < VOLUME_BODY_SIZE_S01 {
            return Err(Error::invalid_format(
                "volume section",
                format!("{} bytes, need {}", body.len(), VOLUME_BODY_SIZE_S01),
            ));
        }
        let stored = u32::from_le_bytes(body[90..94].try_into().unwrap());
        if ewf_checksum(&body[..90]) != stored {
            return Err(Error::invalid_format("volume section", "checksum mismatch"));
        }
        Ok(Self {
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::default(),
            number_of_chunks: u32::from_le_bytes(body[4..8].try_into().unwrap()) as u64,
            sectors_per_chunk: u32::from_le_bytes(body[8..12].try_into().unwrap()),
            bytes_per_sector: u32::from_le_bytes(body[12..16].try_into().unwrap()),
            number_of_sectors: u32::from_le_bytes(body[16..20].try_into().unwrap()) as u64,
            compression_level: None,
            error_granularity: 0,
            guid: [0u8; 16],
        })
    }

    /// Serialise the 94-byte EWF-S01 volume body
    pub fn to_s01_bytes(&self) -> Vec<u8> {
        let mut body = vec![0u8; VOLUME_BODY_SIZE_S01];
        body[0..4].copy_from_slice(&1u32.to_le_bytes());
        body[4..8].copy_from_slice(&(self.number_of_chunks.min(u32::MAX as u64) as u32).to_le_bytes());
        body[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        body[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        body[16..20]
            .copy_from_slice(&(self.number_of_sectors.min(u32::MAX as u64) as u32).to_le_bytes());
        let checksum = ewf_checksum(&body[..90]);
        body[90..94].copy_from_slice(&checksum.to_le_bytes());
        body
    }
}
