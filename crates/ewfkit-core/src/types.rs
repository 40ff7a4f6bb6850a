//! Shared enums for ewfkit

use serde::{Deserialize, Serialize};

/// Chunk compression level used by the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionLevel {
    /// Store chunks raw with a trailing checksum
    None,
    /// zlib level 1
    Fast,
    /// zlib level 9
    Best,
}

impl CompressionLevel {
    /// The zlib level this maps to (0 for raw storage)
    pub fn zlib_level(&self) -> u32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 9,
        }
    }

    /// The value stored in the `r` / compression_type header column
    pub fn header_value(&self) -> &'static str {
        match self {
            CompressionLevel::None => "n",
            CompressionLevel::Fast => "f",
            CompressionLevel::Best => "b",
        }
    }
}

/// Media type stored in the volume section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    /// Removable media (floppy, USB, etc.)
    Removable,
    /// Fixed disk (hard drive)
    Fixed,
    /// Optical media (CD, DVD)
    Optical,
    /// Single files (logical evidence)
    SingleFiles,
    /// Memory (RAM)
    Memory,
    /// Unknown media type
    Unknown(u8),
}

impl From<u8> for MediaType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Removable,
            0x01 => Self::Fixed,
            0x03 => Self::Optical,
            0x0e => Self::SingleFiles,
            0x10 => Self::Memory,
            v => Self::Unknown(v),
        }
    }
}

impl MediaType {
    /// The byte stored in the volume section
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Removable => 0x00,
            Self::Fixed => 0x01,
            Self::Optical => 0x03,
            Self::SingleFiles => 0x0e,
            Self::Memory => 0x10,
            Self::Unknown(v) => *v,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removable => write!(f, "removable disk"),
            Self::Fixed => write!(f, "fixed disk"),
            Self::Optical => write!(f, "optical disk"),
            Self::SingleFiles => write!(f, "single files"),
            Self::Memory => write!(f, "memory"),
            Self::Unknown(v) => write!(f, "unknown (0x{:02x})", v),
        }
    }
}

/// Media flags stored in the volume section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaFlags(pub u8);

impl MediaFlags {
    /// Bit 1: physical device (as opposed to a logical volume)
    pub const PHYSICAL: u8 = 0x02;
    /// Bit 2: Fastbloc write blocker was in use
    pub const FASTBLOC: u8 = 0x04;
    /// Bit 3: Tableau write blocker was in use
    pub const TABLEAU: u8 = 0x08;

    pub fn is_physical(&self) -> bool {
        self.0 & Self::PHYSICAL != 0
    }
}

/// Format family of an opened image, derived from header-section shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EwfFormat {
    /// Original EWF (FTK-era SMART sibling)
    Ewf,
    /// EWF-S01 written by ASR Data SMART
    Smart,
    /// FTK Imager
    Ftk,
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Linen5,
    Linen6,
    /// Logical evidence (L01)
    Lvf,
    /// ewfacquire native with xheader/xhash
    Ewfx,
    /// EnCase 7 EVF2 family
    Ex01,
}

impl EwfFormat {
    /// True for formats using the EWF-S01 volume and table layout
    pub fn is_smart_family(&self) -> bool {
        matches!(self, EwfFormat::Ewf | EwfFormat::Smart)
    }

    /// True for formats whose chunk tables use the v2 (16-byte) encoding
    pub fn uses_v2_tables(&self) -> bool {
        matches!(self, EwfFormat::Ex01)
    }

    /// True for formats carrying a `digest` (MD5+SHA1) section
    pub fn has_digest_section(&self) -> bool {
        matches!(
            self,
            EwfFormat::Encase6 | EwfFormat::Linen6 | EwfFormat::Ewfx | EwfFormat::Ex01
        )
    }

    /// Table sections of these formats do not carry an entries footer checksum
    pub fn omits_table_footer(&self) -> bool {
        self.is_smart_family()
    }
}

impl std::fmt::Display for EwfFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EwfFormat::Ewf => "EWF",
            EwfFormat::Smart => "SMART",
            EwfFormat::Ftk => "FTK",
            EwfFormat::Encase1 => "EnCase 1",
            EwfFormat::Encase2 => "EnCase 2",
            EwfFormat::Encase3 => "EnCase 3",
            EwfFormat::Encase4 => "EnCase 4",
            EwfFormat::Encase5 => "EnCase 5",
            EwfFormat::Encase6 => "EnCase 6",
            EwfFormat::Linen5 => "linen 5",
            EwfFormat::Linen6 => "linen 6",
            EwfFormat::Lvf => "logical evidence",
            EwfFormat::Ewfx => "EWFX",
            EwfFormat::Ex01 => "EnCase 7 (Ex01)",
        };
        write!(f, "{}", name)
    }
}

/// How the section reader reacts to descriptor checksum mismatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tolerance {
    /// Any descriptor corruption fails the open
    Strict,
    /// Log and continue via the stored next-offset
    #[default]
    Compensate,
}

/// Handle access mode requested at init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode {
    pub read: bool,
    pub write: bool,
}

impl AccessMode {
    pub const READ: AccessMode = AccessMode {
        read: true,
        write: false,
    };
    pub const WRITE: AccessMode = AccessMode {
        read: false,
        write: true,
    };
    pub const READ_WRITE: AccessMode = AccessMode {
        read: true,
        write: true,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_roundtrip() {
        for byte in [0x00u8, 0x01, 0x03, 0x0e, 0x10, 0x77] {
            assert_eq!(MediaType::from(byte).to_byte(), byte);
        }
    }

    #[test]
    fn test_compression_zlib_levels() {
        assert_eq!(CompressionLevel::None.zlib_level(), 0);
        assert_eq!(CompressionLevel::Fast.zlib_level(), 1);
        assert_eq!(CompressionLevel::Best.zlib_level(), 9);
    }

    #[test]
    fn test_format_families() {
        assert!(EwfFormat::Smart.is_smart_family());
        assert!(EwfFormat::Smart.omits_table_footer());
        assert!(!EwfFormat::Encase5.is_smart_family());
        assert!(EwfFormat::Ex01.uses_v2_tables());
        assert!(!EwfFormat::Encase6.uses_v2_tables());
    }

    #[test]
    fn test_media_flags() {
        assert!(MediaFlags(0x03).is_physical());
        assert!(!MediaFlags(0x01).is_physical());
    }
}
