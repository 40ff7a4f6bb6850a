//! Section descriptor types
//!
//! A segment file is a 16-byte file header followed by a singly linked list
//! of sections. Each section starts with a 76-byte descriptor:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0x00    16    type (ASCII, zero-padded)
//! 0x10    8     next section offset (u64 LE, absolute)
//! 0x18    8     section size including descriptor (u64 LE)
//! 0x20    40    padding
//! 0x48    4     checksum over bytes 0..72 (u32 LE)
//! ```

use crate::checksum::ewf_checksum;
use ewfkit_core::{Error, Result};

/// Section type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Case metadata, zlib-compressed windows-1252 text
    Header,
    /// Case metadata, zlib-compressed UTF-16LE text
    Header2,
    /// Case metadata, zlib-compressed UTF-8 XML
    Xheader,
    /// Media geometry
    Volume,
    /// Media geometry (SMART-era alias)
    Disk,
    /// Copy of the volume block in segments >= 2
    Data,
    /// Chunk offset index
    Table,
    /// Backup copy of the preceding table
    Table2,
    /// Concatenated packed chunk payloads
    Sectors,
    /// Logical evidence tree (recognised, not expanded)
    Ltree,
    /// CD/DVD session start sectors
    Session,
    /// Acquiry-error sector ranges
    Error2,
    /// MD5 of the media
    Hash,
    /// MD5 + SHA1 of the media
    Digest,
    /// Hashes as XML
    Xhash,
    /// Chunk rebinding inside a delta segment
    DeltaChunk,
    /// End of segment, continue in the next file
    Next,
    /// End of the image set
    Done,
    /// Unrecognised tag, skipped via the descriptor chain
    Unknown([u8; 16]),
}

impl SectionKind {
    /// Parse the 16-byte zero-padded ASCII type field
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let tag = match std::str::from_utf8(bytes) {
            Ok(s) => s.trim_end_matches('\0'),
            Err(_) => return Self::Unknown(*bytes),
        };
        match tag {
            "header" => Self::Header,
            "header2" => Self::Header2,
            "xheader" => Self::Xheader,
            "volume" => Self::Volume,
            "disk" => Self::Disk,
            "data" => Self::Data,
            "table" => Self::Table,
            "table2" => Self::Table2,
            "sectors" => Self::Sectors,
            "ltree" => Self::Ltree,
            "session" => Self::Session,
            "error2" => Self::Error2,
            "hash" => Self::Hash,
            "digest" => Self::Digest,
            "xhash" => Self::Xhash,
            "delta_chunk" => Self::DeltaChunk,
            "next" => Self::Next,
            "done" => Self::Done,
            _ => Self::Unknown(*bytes),
        }
    }

    /// Serialise back to the 16-byte type field
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        let tag: &[u8] = match self {
            Self::Header => b"header",
            Self::Header2 => b"header2",
            Self::Xheader => b"xheader",
            Self::Volume => b"volume",
            Self::Disk => b"disk",
            Self::Data => b"data",
            Self::Table => b"table",
            Self::Table2 => b"table2",
            Self::Sectors => b"sectors",
            Self::Ltree => b"ltree",
            Self::Session => b"session",
            Self::Error2 => b"error2",
            Self::Hash => b"hash",
            Self::Digest => b"digest",
            Self::Xhash => b"xhash",
            Self::DeltaChunk => b"delta_chunk",
            Self::Next => b"next",
            Self::Done => b"done",
            Self::Unknown(raw) => return *raw,
        };
        bytes[..tag.len()].copy_from_slice(tag);
        bytes
    }

    /// Terminal descriptors end the walk over a segment file
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Next | Self::Done)
    }
}

/// Parsed 76-byte section descriptor
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub kind: SectionKind,
    /// Absolute file offset of the next descriptor
    pub next_offset: u64,
    /// Section size including the 76 descriptor bytes
    pub size: u64,
    /// Stored checksum
    pub checksum: u32,
    /// Whether the stored checksum matched the descriptor bytes
    pub checksum_valid: bool,
}

impl SectionDescriptor {
    /// Size of the on-disk descriptor
    pub const SIZE: usize = 76;

    /// Parse a descriptor from its 76 on-disk bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::invalid_format(
                "section descriptor",
                format!("{} bytes, need {}", data.len(), Self::SIZE),
            ));
        }
        let mut type_bytes = [0u8; 16];
        type_bytes.copy_from_slice(&data[0..16]);
        let kind = SectionKind::from_bytes(&type_bytes);

        let next_offset = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let checksum = u32::from_le_bytes(data[72..76].try_into().unwrap());
        let checksum_valid = ewf_checksum(&data[0..72]) == checksum;

        Ok(Self {
            kind,
            next_offset,
            size,
            checksum,
            checksum_valid,
        })
    }

    /// Serialise a descriptor, computing the checksum field
    pub fn to_bytes(kind: SectionKind, next_offset: u64, size: u64) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..16].copy_from_slice(&kind.to_bytes());
        bytes[16..24].copy_from_slice(&next_offset.to_le_bytes());
        bytes[24..32].copy_from_slice(&size.to_le_bytes());
        let checksum = ewf_checksum(&bytes[0..72]);
        bytes[72..76].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let kinds = [
            SectionKind::Header,
            SectionKind::Header2,
            SectionKind::Xheader,
            SectionKind::Volume,
            SectionKind::Disk,
            SectionKind::Data,
            SectionKind::Table,
            SectionKind::Table2,
            SectionKind::Sectors,
            SectionKind::Session,
            SectionKind::Error2,
            SectionKind::Hash,
            SectionKind::Digest,
            SectionKind::Xhash,
            SectionKind::DeltaChunk,
            SectionKind::Next,
            SectionKind::Done,
        ];
        for kind in kinds {
            assert_eq!(SectionKind::from_bytes(&kind.to_bytes()), kind);
        }
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let mut raw = [0u8; 16];
        raw[..5].copy_from_slice(b"weird");
        let kind = SectionKind::from_bytes(&raw);
        assert_eq!(kind, SectionKind::Unknown(raw));
        assert_eq!(kind.to_bytes(), raw);
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let bytes = SectionDescriptor::to_bytes(SectionKind::Volume, 1200, 1128);
        let desc = SectionDescriptor::parse(&bytes).unwrap();
        assert_eq!(desc.kind, SectionKind::Volume);
        assert_eq!(desc.next_offset, 1200);
        assert_eq!(desc.size, 1128);
        assert!(desc.checksum_valid);
    }

    #[test]
    fn test_descriptor_checksum_mismatch() {
        let mut bytes = SectionDescriptor::to_bytes(SectionKind::Table, 500, 100);
        bytes[20] ^= 0xff;
        let desc = SectionDescriptor::parse(&bytes).unwrap();
        assert!(!desc.checksum_valid);
    }

    #[test]
    fn test_descriptor_too_short() {
        assert!(SectionDescriptor::parse(&[0u8; 40]).is_err());
    }
}
