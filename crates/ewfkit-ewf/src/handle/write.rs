//! Write path: fresh image sets and delta rebindings
//!
//! The writer appends chunks into an open `sectors` section, closes the
//! group with `table`/`table2` sections when the chunk budget is reached,
//! rolls to the next segment file when the size budget is reached, and
//! finalises the image with error registers, hash sections, and `done`.
//! Random-access writes on a read-write handle become `delta_chunk`
//! sections in a parallel `.d01` segment.

use std::path::{Path, PathBuf};

use chrono::Local;
use md5::{Digest, Md5};
use sha1::Sha1;
use tracing::debug;

use ewfkit_core::{CompressionLevel, Error, EwfFormat, Result};

use crate::chunk_table::{ChunkEntry, RangeFlags, TableSection};
use crate::codec::CodecOptions;
use crate::header_values::{self, HeaderStringType};
use crate::section::{self, SectionDescriptor, SectionKind};
use crate::segment::{NamingSchema, SegmentFileHeader, SIGNATURE_V1, SIGNATURE_V2};

use super::{Handle, HandleState};

/// Default segment size budget (1.4 GiB, the historical acquisition default)
pub const DEFAULT_SEGMENT_SIZE: u64 = 1_469_054_976;
/// Default chunk count per table section
pub const DEFAULT_CHUNKS_PER_SECTION: u32 = 16_375;

/// Write-mode parameters, fixed before `open`
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub format: EwfFormat,
    pub compression: CompressionLevel,
    /// Per-segment size budget in bytes
    pub segment_size: u64,
    /// Chunk bindings per table section
    pub chunks_per_section: u32,
    /// Emit 16-byte pattern-fill chunks where the plaintext allows
    pub pattern_fill: bool,
    /// Compress all-zero chunks even without compression
    pub compress_empty_block: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            format: EwfFormat::Encase6,
            compression: CompressionLevel::None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            chunks_per_section: DEFAULT_CHUNKS_PER_SECTION,
            pattern_fill: false,
            compress_empty_block: false,
        }
    }
}

/// Location of a volume/data body that must be rewritten at close, once the
/// final chunk and sector counts are known
struct VolumeFixup {
    segment: usize,
    body_offset: u64,
    smart_layout: bool,
}

/// State of the open chunks group
struct GroupState {
    sectors_descriptor_offset: u64,
    entries: Vec<(u64, u32, RangeFlags)>,
}

pub(super) struct WriterState {
    options: WriterOptions,
    schema: NamingSchema,
    basename: PathBuf,
    segment_number: u16,
    current_segment: usize,
    next_offset: u64,
    group: Option<GroupState>,
    chunk_buf: Vec<u8>,
    bytes_accepted: u64,
    chunks_written: u64,
    md5: Md5,
    sha1: Sha1,
    codec_options: CodecOptions,
    volume_fixups: Vec<VolumeFixup>,
    preamble_written: bool,
    timestamp: i64,
    failed: bool,
}

/// Delta-write state of a read-write handle
pub(super) struct DeltaState {
    segment: usize,
    next_offset: u64,
}

fn schema_for(path: &Path, format: EwfFormat) -> Result<NamingSchema> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let schema = NamingSchema::from_extension(extension)?;
    let compatible = match schema {
        NamingSchema::S01Upper | NamingSchema::S01Lower => format.is_smart_family(),
        NamingSchema::Ex01 => format.uses_v2_tables(),
        NamingSchema::E01Upper | NamingSchema::E01Lower => {
            !format.is_smart_family() && !format.uses_v2_tables()
        }
        NamingSchema::Delta => false,
    };
    if !compatible {
        return Err(Error::invalid_argument(format!(
            "extension {:?} does not fit format {}",
            extension, format
        )));
    }
    Ok(schema)
}

pub(super) fn open_writer(handle: &mut Handle, path: &Path) -> Result<WriterState> {
    let options = handle.options.writer.clone();
    if options.format == EwfFormat::Lvf {
        return Err(Error::invalid_argument(
            "writing logical evidence images is not supported",
        ));
    }
    let schema = schema_for(path, options.format)?;

    // Seed unset media values with the usual acquisition defaults
    if handle.media.bytes_per_sector == 0 {
        handle.media.bytes_per_sector = 512;
    }
    if handle.media.sectors_per_chunk == 0 {
        handle.media.sectors_per_chunk = 64;
    }
    if handle.media.error_granularity == 0 {
        handle.media.error_granularity = handle.media.sectors_per_chunk;
    }
    if handle.media.guid == [0u8; 16] {
        handle.media.guid = *uuid::Uuid::new_v4().as_bytes();
    }
    handle.media.compression_level = Some(options.compression);
    handle.format = Some(options.format);

    let segment = handle.pool.create(path)?;
    let signature = if options.format.uses_v2_tables() {
        SIGNATURE_V2
    } else {
        SIGNATURE_V1
    };
    handle
        .pool
        .write_at(segment, 0, &SegmentFileHeader::to_bytes(signature, 1))?;

    let codec_options = CodecOptions {
        compression: options.compression,
        pattern_fill: options.pattern_fill && options.format.uses_v2_tables(),
        compress_empty_block: options.compress_empty_block,
    };
    Ok(WriterState {
        options,
        schema,
        basename: path.to_path_buf(),
        segment_number: 1,
        current_segment: segment,
        next_offset: SegmentFileHeader::SIZE as u64,
        group: None,
        chunk_buf: Vec::new(),
        bytes_accepted: 0,
        chunks_written: 0,
        md5: Md5::new(),
        sha1: Sha1::new(),
        codec_options,
        volume_fixups: Vec::new(),
        preamble_written: false,
        timestamp: Local::now().timestamp(),
        failed: false,
    })
}

/// The header sections a format expects in its first segment
fn header_plan(format: EwfFormat) -> Vec<(SectionKind, HeaderStringType)> {
    use HeaderStringType as H;
    use SectionKind as S;
    match format {
        EwfFormat::Ewf => vec![(S::Header, H::Type1 { crlf: false })],
        EwfFormat::Smart | EwfFormat::Ftk => vec![(S::Header, H::Type2 { crlf: false })],
        EwfFormat::Encase1 => vec![
            (S::Header, H::Type1 { crlf: true }),
            (S::Header, H::Type1 { crlf: true }),
        ],
        EwfFormat::Encase2 | EwfFormat::Encase3 => vec![
            (S::Header, H::Type2 { crlf: true }),
            (S::Header, H::Type2 { crlf: true }),
        ],
        EwfFormat::Encase4 => vec![
            (S::Header2, H::Type4),
            (S::Header2, H::Type4),
            (S::Header, H::Type3),
        ],
        EwfFormat::Encase5 => vec![
            (S::Header2, H::Type5),
            (S::Header2, H::Type5),
            (S::Header, H::Type3),
        ],
        EwfFormat::Encase6 | EwfFormat::Ex01 => vec![
            (S::Header2, H::Type6),
            (S::Header2, H::Type6),
            (S::Header, H::Type3),
        ],
        EwfFormat::Linen5 => vec![(S::Header, H::Type7)],
        EwfFormat::Linen6 => vec![(S::Header, H::Type6)],
        EwfFormat::Ewfx => vec![(S::Header, H::Type1 { crlf: false })],
        EwfFormat::Lvf => Vec::new(),
    }
}

/// Write the first segment's header and volume sections
fn ensure_preamble(handle: &mut Handle) -> Result<()> {
    if handle.writer.as_ref().unwrap().preamble_written {
        return Ok(());
    }
    handle.media.validate()?;
    handle.media_frozen = true;

    let (format, compression, timestamp, segment) = {
        let writer = handle.writer.as_ref().unwrap();
        (
            writer.options.format,
            writer.options.compression,
            writer.timestamp,
            writer.current_segment,
        )
    };
    let mut offset = handle.writer.as_ref().unwrap().next_offset;

    for (kind, string_type) in header_plan(format) {
        let text = handle
            .header_values
            .generate(string_type, compression, timestamp);
        let body = match kind {
            SectionKind::Header2 => header_values::encode_header2_body(&text)?,
            _ => header_values::encode_header_body(&text)?,
        };
        offset = section::write_section(&mut handle.pool, segment, offset, kind, &body)?;
    }
    if format == EwfFormat::Ewfx {
        let xml = handle.header_values.generate_xml(timestamp);
        let body = header_values::encode_utf8_body(&xml)?;
        offset =
            section::write_section(&mut handle.pool, segment, offset, SectionKind::Xheader, &body)?;
    }

    let smart_layout = format.is_smart_family();
    let body = if smart_layout {
        handle.media.to_s01_bytes()
    } else {
        handle.media.to_e01_bytes()
    };
    let body_offset = offset + SectionDescriptor::SIZE as u64;
    offset = section::write_section(&mut handle.pool, segment, offset, SectionKind::Volume, &body)?;

    let writer = handle.writer.as_mut().unwrap();
    writer.volume_fixups.push(VolumeFixup {
        segment,
        body_offset,
        smart_layout,
    });
    writer.next_offset = offset;
    writer.preamble_written = true;
    Ok(())
}

/// Append plaintext at the current append point
pub(super) fn append(handle: &mut Handle, offset: u64, buf: &[u8]) -> Result<usize> {
    {
        let writer = handle.writer.as_ref().unwrap();
        if writer.failed {
            return Err(Error::invalid_argument(
                "writer is in a failed state after an earlier error",
            ));
        }
        if offset != writer.bytes_accepted {
            return Err(Error::invalid_argument(format!(
                "non-sequential write at {} (append point is {})",
                offset, writer.bytes_accepted
            )));
        }
    }
    let result = append_inner(handle, buf);
    if result.is_err() {
        handle.writer.as_mut().unwrap().failed = true;
    }
    result
}

fn append_inner(handle: &mut Handle, buf: &[u8]) -> Result<usize> {
    let chunk_size = handle.media.chunk_size().max(1) as usize;
    {
        let writer = handle.writer.as_mut().unwrap();
        writer.md5.update(buf);
        writer.sha1.update(buf);
        writer.bytes_accepted += buf.len() as u64;
    }
    let mut remaining = buf;
    while !remaining.is_empty() {
        let buffered = handle.writer.as_ref().unwrap().chunk_buf.len();
        let take = (chunk_size - buffered).min(remaining.len());
        handle
            .writer
            .as_mut()
            .unwrap()
            .chunk_buf
            .extend_from_slice(&remaining[..take]);
        remaining = &remaining[take..];
        if handle.writer.as_ref().unwrap().chunk_buf.len() == chunk_size {
            let plaintext = std::mem::take(&mut handle.writer.as_mut().unwrap().chunk_buf);
            flush_chunk(handle, &plaintext)?;
        }
    }
    Ok(buf.len())
}

/// Encode one chunk and append it to the open sectors section
fn flush_chunk(handle: &mut Handle, plaintext: &[u8]) -> Result<()> {
    ensure_preamble(handle)?;

    let codec_options = handle.writer.as_ref().unwrap().codec_options.clone();
    let packed = handle.codec.encode(plaintext, &codec_options)?;

    // Open a sectors section on the first chunk of the group
    if handle.writer.as_ref().unwrap().group.is_none() {
        let writer = handle.writer.as_mut().unwrap();
        let descriptor_offset = writer.next_offset;
        writer.group = Some(GroupState {
            sectors_descriptor_offset: descriptor_offset,
            entries: Vec::new(),
        });
        writer.next_offset += SectionDescriptor::SIZE as u64;
        // placeholder descriptor, rewritten when the group closes
        let segment = writer.current_segment;
        handle.pool.write_at(
            segment,
            descriptor_offset,
            &[0u8; SectionDescriptor::SIZE],
        )?;
    }
    let (segment, data_offset) = {
        let writer = handle.writer.as_ref().unwrap();
        (writer.current_segment, writer.next_offset)
    };
    handle.pool.write_at(segment, data_offset, &packed.data)?;
    {
        let writer = handle.writer.as_mut().unwrap();
        writer.next_offset += packed.data.len() as u64;
        writer
            .group
            .as_mut()
            .unwrap()
            .entries
            .push((data_offset, packed.data.len() as u32, packed.flags));
        writer.chunks_written += 1;
    }
    handle.chunk_table.bind(
        handle.writer.as_ref().unwrap().chunks_written - 1,
        ChunkEntry {
            segment,
            file_offset: data_offset,
            packed_size: packed.data.len() as u32,
            flags: packed.flags,
        },
    );

    let (entries_len, chunks_per_section) = {
        let writer = handle.writer.as_ref().unwrap();
        (
            writer.group.as_ref().unwrap().entries.len() as u32,
            writer.options.chunks_per_section,
        )
    };
    if entries_len >= chunks_per_section {
        close_group(handle)?;
    }
    // Roll the segment when the size budget is spent, leaving room for the
    // closing tables and the next/done descriptor
    let (next_offset, budget, pending) = {
        let writer = handle.writer.as_ref().unwrap();
        let pending = writer
            .group
            .as_ref()
            .map(|g| g.entries.len())
            .unwrap_or(0) as u64;
        (writer.next_offset, writer.options.segment_size, pending)
    };
    let reserve = 3 * SectionDescriptor::SIZE as u64 + 2 * (28 + 16 * (pending + 1));
    if next_offset + reserve >= budget {
        roll_segment(handle)?;
    }
    Ok(())
}

/// Close the open sectors section and emit its table/table2 pair
fn close_group(handle: &mut Handle) -> Result<()> {
    let Some(group) = handle.writer.as_mut().unwrap().group.take() else {
        return Ok(());
    };
    let (segment, sectors_end, v2, smart_layout) = {
        let writer = handle.writer.as_ref().unwrap();
        (
            writer.current_segment,
            writer.next_offset,
            writer.options.format.uses_v2_tables(),
            writer.options.format.is_smart_family(),
        )
    };
    // Fix up the sectors descriptor now that the body size is known
    let sectors_size = sectors_end - group.sectors_descriptor_offset;
    let descriptor = SectionDescriptor::to_bytes(SectionKind::Sectors, sectors_end, sectors_size);
    handle
        .pool
        .write_at(segment, group.sectors_descriptor_offset, &descriptor)?;

    let body = if v2 {
        let entries: Vec<(u64, u32, u32)> = group
            .entries
            .iter()
            .map(|(offset, size, flags)| (*offset, *size, flags.to_disk_v2()))
            .collect();
        TableSection::serialize_v2(&entries)
    } else {
        let base_offset = group.sectors_descriptor_offset;
        let entries: Vec<u32> = group
            .entries
            .iter()
            .map(|(offset, _, flags)| {
                let relative = (offset - base_offset) as u32;
                if flags.is_compressed() && relative <= 0x7fff_ffff {
                    relative | 0x8000_0000
                } else {
                    relative
                }
            })
            .collect();
        TableSection::serialize_v1(base_offset, &entries, !smart_layout)
    };
    let mut offset = sectors_end;
    offset = section::write_section(&mut handle.pool, segment, offset, SectionKind::Table, &body)?;
    offset = section::write_section(&mut handle.pool, segment, offset, SectionKind::Table2, &body)?;
    handle.writer.as_mut().unwrap().next_offset = offset;
    Ok(())
}

/// Terminate the current segment with `next` and open its successor
fn roll_segment(handle: &mut Handle) -> Result<()> {
    close_group(handle)?;
    let (segment, offset, number, format) = {
        let writer = handle.writer.as_ref().unwrap();
        (
            writer.current_segment,
            writer.next_offset,
            writer.segment_number,
            writer.options.format,
        )
    };
    section::write_terminal(&mut handle.pool, segment, offset, SectionKind::Next)?;
    handle.pool.flush(segment)?;

    let next_number = number + 1;
    let path = {
        let writer = handle.writer.as_ref().unwrap();
        writer.schema.segment_path(&writer.basename, next_number)?
    };
    debug!(path = %path.display(), "starting segment {}", next_number);
    let new_segment = handle.pool.create(&path)?;
    let signature = if format.uses_v2_tables() {
        SIGNATURE_V2
    } else {
        SIGNATURE_V1
    };
    handle.pool.write_at(
        new_segment,
        0,
        &SegmentFileHeader::to_bytes(signature, next_number),
    )?;
    let mut offset = SegmentFileHeader::SIZE as u64;

    // E01-family segments after the first open with a volume copy
    if !format.is_smart_family() {
        let body = handle.media.to_e01_bytes();
        let body_offset = offset + SectionDescriptor::SIZE as u64;
        offset =
            section::write_section(&mut handle.pool, new_segment, offset, SectionKind::Data, &body)?;
        handle.writer.as_mut().unwrap().volume_fixups.push(VolumeFixup {
            segment: new_segment,
            body_offset,
            smart_layout: false,
        });
    }
    let writer = handle.writer.as_mut().unwrap();
    writer.current_segment = new_segment;
    writer.segment_number = next_number;
    writer.next_offset = offset;
    Ok(())
}

/// Finalise the image: trailing sections, fixups, `done`
pub(super) fn finalize(handle: &mut Handle) -> Result<()> {
    if handle.writer.as_ref().unwrap().failed {
        return Err(Error::invalid_argument(
            "refusing to finalise an image set after a write error",
        ));
    }
    // Short final chunk
    let tail = std::mem::take(&mut handle.writer.as_mut().unwrap().chunk_buf);
    if !tail.is_empty() {
        flush_chunk(handle, &tail)?;
    }
    ensure_preamble(handle)?;
    close_group(handle)?;

    // Final media geometry, then patch every volume/data body
    {
        let writer = handle.writer.as_ref().unwrap();
        let bytes = writer.bytes_accepted;
        let bps = handle.media.bytes_per_sector.max(1) as u64;
        handle.media.number_of_chunks = writer.chunks_written;
        handle.media.number_of_sectors = bytes.div_ceil(bps);
    }
    let fixups = std::mem::take(&mut handle.writer.as_mut().unwrap().volume_fixups);
    for fixup in &fixups {
        let body = if fixup.smart_layout {
            handle.media.to_s01_bytes()
        } else {
            handle.media.to_e01_bytes()
        };
        handle.pool.write_at(fixup.segment, fixup.body_offset, &body)?;
    }

    let (segment, mut offset, format) = {
        let writer = handle.writer.as_ref().unwrap();
        (
            writer.current_segment,
            writer.next_offset,
            writer.options.format,
        )
    };
    if !handle.acquiry_errors.is_empty() {
        let body = handle.acquiry_errors.to_section_bytes();
        offset =
            section::write_section(&mut handle.pool, segment, offset, SectionKind::Error2, &body)?;
    }
    if !handle.sessions.is_empty() {
        let body = handle.sessions.to_section_bytes();
        offset =
            section::write_section(&mut handle.pool, segment, offset, SectionKind::Session, &body)?;
    }

    // Digests over the plaintext stream; caller-set values win
    {
        let writer = handle.writer.as_ref().unwrap();
        let md5: [u8; 16] = writer.md5.clone().finalize().into();
        let sha1: [u8; 20] = writer.sha1.clone().finalize().into();
        if handle.hash_values.get(crate::hash_values::HashValueId::Md5).is_none() {
            handle.hash_values.set_md5_digest(md5);
        }
        if handle.hash_values.get(crate::hash_values::HashValueId::Sha1).is_none() {
            handle.hash_values.set_sha1_digest(sha1);
        }
    }
    let body = handle.hash_values.to_hash_section();
    offset = section::write_section(&mut handle.pool, segment, offset, SectionKind::Hash, &body)?;
    if format.has_digest_section() {
        let body = handle.hash_values.to_digest_section();
        offset =
            section::write_section(&mut handle.pool, segment, offset, SectionKind::Digest, &body)?;
    }
    if format == EwfFormat::Ewfx {
        let xml = handle.hash_values.generate_xml();
        let body = header_values::encode_utf8_body(&xml)?;
        offset =
            section::write_section(&mut handle.pool, segment, offset, SectionKind::Xhash, &body)?;
    }
    section::write_terminal(&mut handle.pool, segment, offset, SectionKind::Done)?;
    handle.pool.flush(segment)?;

    handle.media_frozen = true;
    Ok(())
}

/// Rebind whole chunks of an existing image through a delta segment
pub(super) fn delta_write(handle: &mut Handle, offset: u64, buf: &[u8]) -> Result<usize> {
    let chunk_size = handle.media.chunk_size() as u64;
    let media_size = handle.media.media_size();
    if chunk_size == 0 {
        return Err(Error::invalid_argument("media model not defined"));
    }
    if offset % chunk_size != 0 {
        return Err(Error::invalid_argument(
            "delta writes must start on a chunk boundary",
        ));
    }
    if buf.is_empty() || offset + buf.len() as u64 > media_size {
        return Err(Error::OutOfRange {
            field: "delta_write",
            value: offset + buf.len() as u64,
            limit: media_size,
        });
    }
    if buf.len() as u64 % chunk_size != 0 && offset + buf.len() as u64 != media_size {
        return Err(Error::invalid_argument(
            "delta writes must cover whole chunks",
        ));
    }
    if handle.delta.is_none() {
        let basename = handle
            .basename
            .clone()
            .ok_or_else(|| Error::invalid_argument("handle has no base path"))?;
        // never truncate deltas from an earlier session
        let schema = NamingSchema::Delta;
        let mut delta_number = 1u16;
        let mut path = schema.segment_path(&basename, delta_number)?;
        while path.is_file() && delta_number < schema.max_segments() {
            delta_number += 1;
            path = schema.segment_path(&basename, delta_number)?;
        }
        debug!(path = %path.display(), "creating delta segment");
        let segment = handle.pool.create(&path)?;
        handle.pool.write_at(
            segment,
            0,
            &SegmentFileHeader::to_bytes(SIGNATURE_V1, delta_number),
        )?;
        handle.delta = Some(DeltaState {
            segment,
            next_offset: SegmentFileHeader::SIZE as u64,
        });
    }
    let raw_options = CodecOptions {
        compression: CompressionLevel::None,
        pattern_fill: false,
        compress_empty_block: false,
    };
    let mut written = 0usize;
    while written < buf.len() {
        let chunk_index = (offset + written as u64) / chunk_size;
        let take = (buf.len() - written).min(chunk_size as usize);
        let plaintext = &buf[written..written + take];
        let packed = handle.codec.encode(plaintext, &raw_options)?;

        let mut body = Vec::with_capacity(4 + packed.data.len());
        body.extend_from_slice(&(chunk_index as u32).to_le_bytes());
        body.extend_from_slice(&packed.data);

        let delta = handle.delta.as_mut().unwrap();
        let section_offset = delta.next_offset;
        let segment = delta.segment;
        let end = section::write_section(
            &mut handle.pool,
            segment,
            section_offset,
            SectionKind::DeltaChunk,
            &body,
        )?;
        handle.delta.as_mut().unwrap().next_offset = end;
        // keep the chain closed so a crashed process leaves a valid file
        section::write_terminal(&mut handle.pool, segment, end, SectionKind::Done)?;

        handle.chunk_table.bind_delta(
            chunk_index,
            ChunkEntry {
                segment,
                file_offset: section_offset + SectionDescriptor::SIZE as u64 + 4,
                packed_size: packed.data.len() as u32,
                flags: RangeFlags(RangeFlags::HAS_CHECKSUM),
            },
        );
        handle.invalidate_cached_chunk(chunk_index);
        written += take;
    }
    let segment = handle.delta.as_ref().unwrap().segment;
    handle.pool.flush(segment)?;
    Ok(written)
}

/// Paths of every segment registered by this handle, in open order
impl Handle {
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        (0..self.pool.len())
            .map(|i| self.pool.path(i).to_path_buf())
            .collect()
    }

    /// Convenience append-mode write state check used by tests and the CLI
    pub fn is_writing(&self) -> bool {
        self.state == HandleState::Writing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_values::HashValueId;
    use crate::header_values::HeaderValueId;
    use crate::io_pool::IoPool;
    use crate::section::walk_sections;
    use ewfkit_core::{AccessMode, Tolerance};
    use md5::{Digest, Md5};
    use std::path::Path;
    use tempfile::tempdir;

    use super::super::OpenOptions;

    fn writer_options(format: EwfFormat, compression: CompressionLevel) -> OpenOptions {
        OpenOptions {
            access: AccessMode::WRITE,
            writer: WriterOptions {
                format,
                compression,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn write_image(path: &Path, data: &[u8], options: OpenOptions, chunk_size_sectors: u64) {
        let mut handle = Handle::init(options);
        handle.set_media_value("bytes_per_sector", 512).unwrap();
        handle
            .set_media_value("sectors_per_chunk", chunk_size_sectors)
            .unwrap();
        handle.set_header_value(HeaderValueId::CaseNumber, "kit-001");
        handle.set_header_value(HeaderValueId::ExaminerName, "tester");
        handle.open(&[path.to_path_buf()]).unwrap();
        handle.write(data).unwrap();
        handle.close().unwrap();
    }

    fn read_back(first: &Path) -> (Handle, Vec<u8>) {
        let mut handle = Handle::init(OpenOptions::default());
        let mut paths = vec![first.to_path_buf()];
        // pick up any further segments next to the first
        let (base, schema) = crate::segment::parse_first_segment_path(first).unwrap();
        for n in 2..100 {
            let path = schema.segment_path(&base, n).unwrap();
            if !path.is_file() {
                break;
            }
            paths.push(path);
        }
        handle.open(&paths).unwrap();
        let size = handle.media_size();
        let mut data = vec![0u8; size as usize];
        let read = handle.read_at(0, &mut data).unwrap();
        data.truncate(read);
        (handle, data)
    }

    #[test]
    fn test_roundtrip_identity_matrix() {
        // P1 over compression levels and chunk sizes
        let dir = tempdir().unwrap();
        let input: Vec<u8> = (0u32..40_960).map(|i| (i % 251) as u8).collect();
        for (index, compression) in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Best,
        ]
        .into_iter()
        .enumerate()
        {
            for (jndex, sectors_per_chunk) in [8u64, 64].into_iter().enumerate() {
                let path = dir.path().join(format!("p1_{}_{}.E01", index, jndex));
                write_image(
                    &path,
                    &input,
                    writer_options(EwfFormat::Encase6, compression),
                    sectors_per_chunk,
                );
                let (_, data) = read_back(&path);
                assert_eq!(data, input, "{:?} spc={}", compression, sectors_per_chunk);
            }
        }
    }

    #[test]
    fn test_single_chunk_layout() {
        // 128 input bytes at chunk size 128, no compression: one sectors
        // section of 132 body bytes and one single-entry table
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.E01");
        let mut handle = Handle::init(writer_options(EwfFormat::Encase6, CompressionLevel::None));
        handle.set_media_value("bytes_per_sector", 64).unwrap();
        handle.set_media_value("sectors_per_chunk", 2).unwrap();
        handle.open(&[path.clone()]).unwrap();
        let input = [b'A'; 64].iter().chain([0u8; 64].iter()).copied().collect::<Vec<u8>>();
        handle.write(&input).unwrap();
        handle.close().unwrap();

        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        let sections = walk_sections(&mut pool, seg, 16, Tolerance::Strict).unwrap();
        let sectors: Vec<_> = sections
            .iter()
            .filter(|s| s.kind == SectionKind::Sectors)
            .collect();
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].data_size, 132);

        let tables: Vec<_> = sections
            .iter()
            .filter(|s| s.kind == SectionKind::Table)
            .collect();
        assert_eq!(tables.len(), 1);
        let body = crate::section::read_body(&mut pool, seg, tables[0]).unwrap();
        let table = TableSection::parse_v1(&body, true).unwrap();
        assert_eq!(table.entries_v1.len(), 1);
        assert_eq!(table.base_offset, sectors[0].start_offset);
        assert_eq!(sections.last().unwrap().kind, SectionKind::Done);
    }

    #[test]
    fn test_multi_segment_roundtrip() {
        // force tiny segments so three files appear
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.E01");
        let input: Vec<u8> = (0u32..196_608).map(|i| (i * 7 % 256) as u8).collect();
        let mut options = writer_options(EwfFormat::Encase6, CompressionLevel::None);
        options.writer.segment_size = 66_000;
        write_image(&path, &input, options, 128); // 64 KiB chunks

        assert!(dir.path().join("disk.E02").is_file());

        let (mut handle, data) = read_back(&path);
        assert_eq!(data.len(), 196_608);
        assert_eq!(data, input);
        // reads past the end return nothing
        let mut one = [0u8; 1];
        assert_eq!(handle.read_at(196_608, &mut one).unwrap(), 0);
        assert!(handle.segment_paths().len() >= 3);
    }

    #[test]
    fn test_md5_of_written_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hash.E01");
        let input = vec![0x42u8; 10_240];
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Encase6, CompressionLevel::Fast),
            8,
        );
        let expected = hex::encode(Md5::digest(&input));
        let (handle, _) = read_back(&path);
        assert_eq!(handle.get_hash_value(HashValueId::Md5), Some(expected.as_str()));
        assert!(handle.get_hash_value(HashValueId::Sha1).is_some());
    }

    #[test]
    fn test_header_values_survive_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("case.E01");
        write_image(
            &path,
            &vec![0xccu8; 4096],
            writer_options(EwfFormat::Encase5, CompressionLevel::Fast),
            8,
        );
        let (handle, _) = read_back(&path);
        assert_eq!(handle.format(), Some(EwfFormat::Encase5));
        assert_eq!(
            handle.get_header_value(HeaderValueId::CaseNumber),
            Some("kit-001")
        );
        assert_eq!(
            handle.get_header_value(HeaderValueId::ExaminerName),
            Some("tester")
        );
    }

    #[test]
    fn test_acquiry_errors_survive_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.E01");
        let mut handle = Handle::init(writer_options(EwfFormat::Encase6, CompressionLevel::None));
        handle.set_media_value("bytes_per_sector", 512).unwrap();
        handle.set_media_value("sectors_per_chunk", 8).unwrap();
        handle.open(&[path.clone()]).unwrap();
        handle.write(&vec![0u8; 8192]).unwrap();
        handle.add_acquiry_error(100, 8).unwrap();
        handle.add_acquiry_error(108, 8).unwrap();
        handle.add_session(0, 1024).unwrap();
        handle.close().unwrap();

        let (handle, _) = read_back(&path);
        assert_eq!(handle.num_acquiry_errors(), 1); // merged
        let range = handle.get_acquiry_error(0).unwrap();
        assert_eq!((range.first_sector, range.number_of_sectors), (100, 16));
        assert_eq!(handle.num_sessions(), 1);
        assert_eq!(handle.get_session(0).unwrap().number_of_sectors, 1024);
    }

    #[test]
    fn test_smart_format_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.S01");
        let input: Vec<u8> = (0u32..20_480).map(|i| (i % 13) as u8).collect();
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Smart, CompressionLevel::Fast),
            8,
        );
        let (handle, data) = read_back(&path);
        assert_eq!(data, input);
        assert_eq!(handle.format(), Some(EwfFormat::Ewf));
    }

    #[test]
    fn test_ex01_v2_tables_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modern.Ex01");
        let input: Vec<u8> = (0u32..51_200).map(|i| (i % 7) as u8).collect();
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Ex01, CompressionLevel::Best),
            16,
        );
        let (handle, data) = read_back(&path);
        assert_eq!(data, input);
        assert_eq!(handle.format(), Some(EwfFormat::Ex01));
    }

    #[test]
    fn test_pattern_fill_image_is_tiny() {
        // 1 MiB of an 8-byte pattern collapses to 16-byte chunk payloads
        let dir = tempdir().unwrap();
        let path = dir.path().join("pattern.Ex01");
        let pattern = [0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xba, 0xbe];
        let input: Vec<u8> = pattern.iter().cycle().take(1 << 20).copied().collect();

        let mut options = writer_options(EwfFormat::Ex01, CompressionLevel::None);
        options.writer.pattern_fill = true;
        write_image(&path, &input, options, 64);

        let image_size = std::fs::metadata(&path).unwrap().len();
        assert!(image_size < 32_768, "image is {} bytes", image_size);

        let (_, data) = read_back(&path);
        assert_eq!(data, input);
    }

    #[test]
    fn test_corrupt_chunk_wipes_and_records() {
        // flip one byte inside a compressed chunk payload; the read yields
        // zero fill and one checksum error covering the chunk's sectors
        let dir = tempdir().unwrap();
        let path = dir.path().join("dmg.E01");
        let input: Vec<u8> = (0u32..16_384).map(|i| (i % 256) as u8).collect();
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Encase6, CompressionLevel::Best),
            8, // 4096-byte chunks
        );

        // locate chunk 2's payload via the table and damage it
        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        let sections = walk_sections(&mut pool, seg, 16, Tolerance::Strict).unwrap();
        let table_info = sections
            .iter()
            .find(|s| s.kind == SectionKind::Table)
            .unwrap();
        let body = crate::section::read_body(&mut pool, seg, table_info).unwrap();
        let table = TableSection::parse_v1(&body, true).unwrap();
        let chunk2_offset = table.base_offset + (table.entries_v1[2] & 0x7fff_ffff) as u64;
        drop(pool);

        let mut raw = std::fs::read(&path).unwrap();
        raw[chunk2_offset as usize + 5] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let (mut handle, _) = read_back(&path);
        let mut chunk = vec![0u8; 4096];
        handle.read_at(2 * 4096, &mut chunk).unwrap();
        assert_eq!(chunk, vec![0u8; 4096]);
        assert_eq!(handle.num_checksum_errors(), 1);
        let range = handle.get_checksum_error(0).unwrap();
        assert_eq!((range.first_sector, range.number_of_sectors), (16, 8));
    }

    #[test]
    fn test_table_corruption_recovered_from_table2() {
        // P6: a damaged table with an intact table2 reads clean
        let dir = tempdir().unwrap();
        let path = dir.path().join("t2.E01");
        let input: Vec<u8> = (0u32..32_768).map(|i| (i * 13 % 256) as u8).collect();
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Encase6, CompressionLevel::None),
            8,
        );

        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        let sections = walk_sections(&mut pool, seg, 16, Tolerance::Strict).unwrap();
        let table_info = sections
            .iter()
            .find(|s| s.kind == SectionKind::Table)
            .unwrap();
        // corrupt one table entry (chunk 5's stored offset)
        let entry_offset = table_info.data_offset + 24 + 5 * 4;
        drop(pool);

        let mut raw = std::fs::read(&path).unwrap();
        raw[entry_offset as usize] ^= 0x37;
        std::fs::write(&path, &raw).unwrap();

        let (handle, data) = read_back(&path);
        assert_eq!(data, input);
        assert_eq!(handle.num_checksum_errors(), 0);
    }

    #[test]
    fn test_delta_write_shadows_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("live.E01");
        let chunk_size = 4096usize;
        let input: Vec<u8> = (0u32..(20 * chunk_size as u32)).map(|i| (i % 256) as u8).collect();
        write_image(
            &path,
            &input,
            writer_options(EwfFormat::Encase6, CompressionLevel::None),
            8,
        );

        // open read-write, replace chunk 17
        let mut handle = Handle::init(OpenOptions {
            access: AccessMode::READ_WRITE,
            ..Default::default()
        });
        handle.open(&[path.clone()]).unwrap();
        let replacement = vec![0xa5u8; chunk_size];
        handle
            .write_at(17 * chunk_size as u64, &replacement)
            .unwrap();
        // visible immediately
        let mut now = vec![0u8; chunk_size];
        handle.read_at(17 * chunk_size as u64, &mut now).unwrap();
        assert_eq!(now, replacement);
        handle.close().unwrap();

        assert!(dir.path().join("live.d01").is_file());

        // and after reopening
        let (mut handle, data) = read_back(&path);
        assert_eq!(&data[..17 * chunk_size], &input[..17 * chunk_size]);
        assert_eq!(
            &data[17 * chunk_size..18 * chunk_size],
            replacement.as_slice()
        );
        assert_eq!(&data[18 * chunk_size..], &input[18 * chunk_size..]);

        // non-aligned delta writes are rejected
        assert!(handle.write_at(100, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_write_requires_sequential_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seq.E01");
        let mut handle = Handle::init(writer_options(EwfFormat::Encase6, CompressionLevel::None));
        handle.open(&[path]).unwrap();
        handle.write_at(0, &[1u8; 100]).unwrap();
        assert!(handle.write_at(500, &[1u8; 100]).is_err());
        assert!(handle.write_at(100, &[1u8; 100]).is_ok());
    }

    #[test]
    fn test_empty_image_finalises() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.E01");
        let mut handle = Handle::init(writer_options(EwfFormat::Encase6, CompressionLevel::None));
        handle.open(&[path.clone()]).unwrap();
        handle.close().unwrap();

        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        let sections = walk_sections(&mut pool, seg, 16, Tolerance::Strict).unwrap();
        assert_eq!(sections.last().unwrap().kind, SectionKind::Done);
    }
}
