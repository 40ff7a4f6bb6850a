//! Section stream reader/writer
//!
//! Sections inside a segment file form a singly linked list through each
//! descriptor's next-offset. The walker below follows that list, verifies
//! descriptor checksums (subject to [`Tolerance`]), and yields one
//! [`SectionInfo`] per section in file order. Payload parsing is dispatched
//! from the handle's open loop as a match over [`SectionKind`].

pub mod types;

pub use types::{SectionDescriptor, SectionKind};

use ewfkit_core::{Error, Result, Tolerance};
use tracing::{debug, warn};

use crate::io_pool::IoPool;

/// One section located inside a segment file
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub kind: SectionKind,
    /// File offset of the 76-byte descriptor
    pub start_offset: u64,
    /// File offset of the section body
    pub data_offset: u64,
    /// Body size in bytes (descriptor excluded)
    pub data_size: u64,
    /// File offset one past the section
    pub end_offset: u64,
    /// Stored next-descriptor offset
    pub next_offset: u64,
    /// Whether the descriptor checksum matched
    pub checksum_valid: bool,
}

/// Alias kept for re-export ergonomics; the payload dispatch itself lives in
/// the handle's open loop.
pub type Section = SectionInfo;

/// Walk the section descriptor chain of one segment file.
///
/// `start_offset` is the offset of the first descriptor (right after the
/// segment file header). The walk ends at a `next`/`done` descriptor or at
/// end of file.
pub fn walk_sections(
    pool: &mut IoPool,
    segment: usize,
    start_offset: u64,
    tolerance: Tolerance,
) -> Result<Vec<SectionInfo>> {
    let file_size = pool.file_size(segment)?;
    let mut sections = Vec::new();
    let mut offset = start_offset;

    loop {
        if offset + SectionDescriptor::SIZE as u64 > file_size {
            return Err(Error::invalid_format(
                format!("segment {}", segment),
                format!("section descriptor at {} runs past end of file", offset),
            ));
        }
        let mut descriptor_bytes = [0u8; SectionDescriptor::SIZE];
        pool.read_exact_at(segment, offset, &mut descriptor_bytes)?;
        let descriptor = SectionDescriptor::parse(&descriptor_bytes)?;

        if !descriptor.checksum_valid {
            match tolerance {
                Tolerance::Strict => {
                    return Err(Error::invalid_format(
                        format!("section descriptor at {}", offset),
                        "descriptor checksum mismatch",
                    ));
                }
                Tolerance::Compensate => {
                    warn!(
                        offset,
                        kind = ?descriptor.kind,
                        "section descriptor checksum mismatch, continuing via stored next-offset"
                    );
                }
            }
        }
        let size = descriptor.size.max(SectionDescriptor::SIZE as u64);
        let end_offset = offset + size;
        if end_offset > file_size && !descriptor.kind.is_terminal() {
            return Err(Error::invalid_format(
                format!("section at {}", offset),
                format!(
                    "declared size {} exceeds file size {}",
                    descriptor.size, file_size
                ),
            ));
        }
        debug!(offset, kind = ?descriptor.kind, size, "section");

        let info = SectionInfo {
            kind: descriptor.kind,
            start_offset: offset,
            data_offset: offset + SectionDescriptor::SIZE as u64,
            data_size: size - SectionDescriptor::SIZE as u64,
            end_offset,
            next_offset: descriptor.next_offset,
            checksum_valid: descriptor.checksum_valid,
        };
        let terminal = info.kind.is_terminal();
        let next_offset = info.next_offset;
        sections.push(info);

        if terminal {
            break;
        }
        // The stored next-offset must advance or the chain would loop
        if next_offset <= offset {
            return Err(Error::invalid_format(
                format!("section at {}", offset),
                format!("next-offset {} does not advance", next_offset),
            ));
        }
        offset = next_offset;
    }
    Ok(sections)
}

/// Read a section body into memory
pub fn read_body(pool: &mut IoPool, segment: usize, info: &SectionInfo) -> Result<Vec<u8>> {
    let mut body = vec![0u8; info.data_size as usize];
    pool.read_exact_at(segment, info.data_offset, &mut body)?;
    Ok(body)
}

/// Append a section (descriptor + body) at `offset`, returning the end offset
pub fn write_section(
    pool: &mut IoPool,
    segment: usize,
    offset: u64,
    kind: SectionKind,
    body: &[u8],
) -> Result<u64> {
    let size = SectionDescriptor::SIZE as u64 + body.len() as u64;
    let next_offset = offset + size;
    let descriptor = SectionDescriptor::to_bytes(kind, next_offset, size);
    pool.write_at(segment, offset, &descriptor)?;
    if !body.is_empty() {
        pool.write_at(segment, offset + SectionDescriptor::SIZE as u64, body)?;
    }
    Ok(next_offset)
}

/// Append a terminal `next`/`done` descriptor; its next-offset points at
/// itself, matching what existing tools emit.
pub fn write_terminal(
    pool: &mut IoPool,
    segment: usize,
    offset: u64,
    kind: SectionKind,
) -> Result<u64> {
    let descriptor = SectionDescriptor::to_bytes(kind, offset, SectionDescriptor::SIZE as u64);
    pool.write_at(segment, offset, &descriptor)?;
    Ok(offset + SectionDescriptor::SIZE as u64)
}
