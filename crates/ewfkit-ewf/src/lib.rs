//! # ewfkit EWF engine
//!
//! Reads and writes the Expert Witness Compression Format — the segmented,
//! chunk-addressed container behind `.E01` / `.S01` / `.Ex01` forensic disk
//! images.
//!
//! # Structure
//!
//! ```text
//! ┌───────────────────────────┐
//! │  File Header (16 bytes)   │  EVF signature + segment number
//! ├───────────────────────────┤
//! │  header / header2 section │  Case metadata (zlib-compressed text)
//! ├───────────────────────────┤
//! │  volume section           │  Media geometry
//! ├───────────────────────────┤
//! │  sectors section          │  Packed chunk payloads
//! ├───────────────────────────┤
//! │  table / table2 sections  │  Chunk offset index + backup
//! ├───────────────────────────┤
//! │  hash / digest section    │  MD5 (and SHA1) of the media
//! ├───────────────────────────┤
//! │  next / done section      │  Segment chain terminator
//! └───────────────────────────┘
//! ```
//!
//! The public surface is [`Handle`]: open a segment-file family, read the
//! reconstructed media by logical offset, or write a new image set under the
//! format's constraints.

pub mod checksum;
pub mod chunk_table;
pub mod codec;
pub mod format;
pub mod handle;
pub mod header_values;
pub mod hash_values;
pub mod io_pool;
pub mod media;
pub mod section;
pub mod sector_table;
pub mod segment;

pub use checksum::ewf_checksum;
pub use chunk_table::{ChunkEntry, ChunkTable, RangeFlags};
pub use codec::{ChunkCodec, CodecOptions, DecodedChunk, PackedChunk, ZlibCodec};
pub use format::{detect_format, FormatProbe};
pub use handle::{Handle, OpenOptions, WriterOptions};
pub use header_values::{HeaderValueId, HeaderValues};
pub use hash_values::{HashValueId, HashValues};
pub use io_pool::IoPool;
pub use media::MediaModel;
pub use section::{Section, SectionDescriptor, SectionKind};
pub use sector_table::{SectorRange, SectorTable};
pub use segment::{SegmentFileHeader, SegmentTable};

pub use ewfkit_core::{
    AccessMode, CompressionLevel, Error, EwfFormat, MediaFlags, MediaType, Result, Tolerance,
};
