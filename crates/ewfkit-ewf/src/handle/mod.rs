//! Public handle: open, read, write, seek
//!
//! A handle owns the IO pool, the segment and chunk tables, the media
//! model, the value stores, and the error registers. `open` in read mode
//! walks every segment's section stream and builds the chunk index before
//! any read is allowed; `open` in write mode starts a fresh segment
//! sequence (see [`write`]).

mod write;

pub use write::WriterOptions;

use std::path::{Path, PathBuf};

use ewfkit_core::{AccessMode, Error, EwfFormat, IoOp, MediaType, Result, Tolerance};
use tracing::{debug, warn};

use crate::chunk_table::{ChunkEntry, ChunkTable, RangeFlags};
use crate::codec::{ChunkCodec, ZlibCodec};
use crate::format::{detect_format, FormatProbe};
use crate::hash_values::{HashValueId, HashValues};
use crate::header_values::{self, HeaderValueId, HeaderValues};
use crate::io_pool::IoPool;
use crate::media::{MediaModel, VOLUME_BODY_SIZE_S01};
use crate::section::{self, SectionKind};
use crate::sector_table::{SectorRange, SectorTable};
use crate::segment::{
    parse_first_segment_path, NamingSchema, SegmentEntry, SegmentFileHeader, SegmentTable,
};

use write::{DeltaState, WriterState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Fresh,
    Reading,
    Writing,
    Closed,
}

/// Handle configuration, fixed at init
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub access: AccessMode,
    pub tolerance: Tolerance,
    /// Zero-fill chunks whose checksum fails instead of returning raw bytes
    pub wipe_on_error: bool,
    /// Maximum simultaneously open segment descriptors (0 = unbounded)
    pub max_open_files: usize,
    /// Write-mode parameters; ignored for read-only handles
    pub writer: WriterOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            access: AccessMode::READ,
            tolerance: Tolerance::Compensate,
            wipe_on_error: true,
            max_open_files: 16,
            writer: WriterOptions::default(),
        }
    }
}

/// One-slot decoded chunk cache
#[derive(Debug, Default)]
struct ChunkCache {
    index: Option<u64>,
    data: Vec<u8>,
}

/// Spans produced by [`ChunkIter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSpan {
    chunk_index: u64,
    offset_in_chunk: usize,
    length: usize,
}

/// Iterator decomposing a (offset, length) window into per-chunk spans
struct ChunkIter {
    chunk_size: u64,
    offset: u64,
    remaining: u64,
}

impl ChunkIter {
    fn new(offset: u64, length: u64, chunk_size: u64, media_size: u64) -> Self {
        let end = offset.saturating_add(length).min(media_size);
        let remaining = end.saturating_sub(offset);
        Self {
            chunk_size,
            offset,
            remaining,
        }
    }
}

impl Iterator for ChunkIter {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.remaining == 0 || self.chunk_size == 0 {
            return None;
        }
        let chunk_index = self.offset / self.chunk_size;
        let offset_in_chunk = (self.offset % self.chunk_size) as usize;
        let available = self.chunk_size - offset_in_chunk as u64;
        let length = available.min(self.remaining) as usize;
        self.offset += length as u64;
        self.remaining -= length as u64;
        Some(ChunkSpan {
            chunk_index,
            offset_in_chunk,
            length,
        })
    }
}

/// An Expert Witness Format image handle
pub struct Handle {
    state: HandleState,
    options: OpenOptions,
    pool: IoPool,
    segments: SegmentTable,
    chunk_table: ChunkTable,
    media: MediaModel,
    media_frozen: bool,
    header_values: HeaderValues,
    hash_values: HashValues,
    acquiry_errors: SectorTable,
    checksum_errors: SectorTable,
    sessions: SectorTable,
    format: Option<EwfFormat>,
    codec: ChunkCodec<ZlibCodec>,
    cache: ChunkCache,
    position: u64,
    basename: Option<PathBuf>,
    writer: Option<WriterState>,
    delta: Option<DeltaState>,
}

impl Handle {
    /// Create a fresh handle
    pub fn init(options: OpenOptions) -> Self {
        let max_open = options.max_open_files;
        Self {
            state: HandleState::Fresh,
            options,
            pool: IoPool::new(max_open),
            segments: SegmentTable::new(),
            chunk_table: ChunkTable::new(),
            media: MediaModel::default(),
            media_frozen: false,
            header_values: HeaderValues::new(),
            hash_values: HashValues::new(),
            acquiry_errors: SectorTable::new(),
            checksum_errors: SectorTable::new(),
            sessions: SectorTable::new(),
            format: None,
            codec: ChunkCodec::default(),
            cache: ChunkCache::default(),
            position: 0,
            basename: None,
            writer: None,
            delta: None,
        }
    }

    /// Open an image: a segment file family for reading, or the first
    /// output path for writing
    pub fn open(&mut self, paths: &[PathBuf]) -> Result<()> {
        if self.state != HandleState::Fresh {
            return Err(Error::invalid_argument("handle already open"));
        }
        if paths.is_empty() {
            return Err(Error::invalid_argument("no segment files"));
        }
        if self.options.access.read {
            self.open_read(paths)
        } else if self.options.access.write {
            self.open_write(&paths[0])
        } else {
            Err(Error::invalid_argument("access mode selects neither read nor write"))
        }
    }

    fn open_read(&mut self, paths: &[PathBuf]) -> Result<()> {
        let (first, _schema) = parse_first_segment_path(&paths[0])?;
        self.basename = Some(first);

        let mut probe = FormatProbe::default();
        let mut running_chunk: u64 = 0;
        let mut group_start: u64 = 0;
        let mut header_table: Option<HeaderValues> = None;
        let mut header2_table: Option<HeaderValues> = None;
        let mut xheader_table: Option<HeaderValues> = None;
        let mut saw_done = false;

        for path in paths {
            let pool_index = self.pool.open(path)?;
            let mut header_bytes = [0u8; SegmentFileHeader::SIZE];
            self.pool.read_exact_at(pool_index, 0, &mut header_bytes)?;
            let file_header = SegmentFileHeader::parse(&header_bytes)?;
            if file_header.is_v2() {
                probe.v2_signature = true;
            }
            if file_header.is_logical() {
                probe.logical = true;
            }
            let sections = section::walk_sections(
                &mut self.pool,
                pool_index,
                SegmentFileHeader::SIZE as u64,
                self.options.tolerance,
            )?;
            let entry = SegmentEntry {
                pool_index,
                header: file_header,
                sections,
            };
            self.segments.push(entry)?;

            let sections = self.segments.get(self.segments.len() - 1).unwrap().sections.clone();
            for info in &sections {
                match info.kind {
                    SectionKind::Volume | SectionKind::Disk => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        let parsed = if info.data_size as usize == VOLUME_BODY_SIZE_S01 {
                            probe.smart_volume = true;
                            MediaModel::parse_s01(&body)?
                        } else {
                            MediaModel::parse_e01(&body)?
                        };
                        if self.media.is_defined() {
                            self.media.check_consistent(&parsed)?;
                        } else {
                            self.media = parsed;
                        }
                    }
                    SectionKind::Data => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        let parsed = MediaModel::parse_e01(&body)?;
                        if self.media.is_defined() {
                            self.media.check_consistent(&parsed)?;
                        } else {
                            self.media = parsed;
                        }
                    }
                    SectionKind::Header => {
                        if header_table.is_none() {
                            let body = section::read_body(&mut self.pool, pool_index, info)?;
                            let text = header_values::decode_header_body(&body)?;
                            header_table = Some(HeaderValues::parse(&text)?);
                            probe.header_text = Some(text);
                        }
                    }
                    SectionKind::Header2 => {
                        if header2_table.is_none() {
                            let body = section::read_body(&mut self.pool, pool_index, info)?;
                            let text = header_values::decode_header2_body(&body)?;
                            header2_table = Some(HeaderValues::parse(&text)?);
                            probe.header2_text = Some(text);
                        }
                    }
                    SectionKind::Xheader => {
                        if xheader_table.is_none() {
                            let body = section::read_body(&mut self.pool, pool_index, info)?;
                            let text = header_values::decode_utf8_body(&body)?;
                            xheader_table = Some(HeaderValues::parse_xml(&text)?);
                            probe.has_xheader = true;
                        }
                    }
                    SectionKind::Table => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        group_start = running_chunk;
                        if probe.v2_signature {
                            let table = crate::chunk_table::TableSection::parse_v2(&body)?;
                            running_chunk =
                                self.chunk_table.fill_v2(running_chunk, pool_index, &table)?;
                        } else {
                            let has_footer = !probe.smart_volume;
                            let table =
                                crate::chunk_table::TableSection::parse_v1(&body, has_footer)?;
                            running_chunk =
                                self.chunk_table
                                    .fill_v1(running_chunk, pool_index, &table, info)?;
                        }
                    }
                    SectionKind::Table2 => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        if probe.v2_signature {
                            let table = crate::chunk_table::TableSection::parse_v2(&body)?;
                            self.chunk_table
                                .correct_v2(group_start, pool_index, &table)?;
                        } else {
                            let has_footer = !probe.smart_volume;
                            let table =
                                crate::chunk_table::TableSection::parse_v1(&body, has_footer)?;
                            self.chunk_table
                                .correct_v1(group_start, pool_index, &table, info)?;
                        }
                    }
                    SectionKind::Sectors | SectionKind::Ltree => {
                        // chunk payloads are located via the tables; logical
                        // evidence trees are out of scope
                    }
                    SectionKind::Error2 => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        self.acquiry_errors = SectorTable::parse_section_bytes(&body)?;
                    }
                    SectionKind::Session => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        self.sessions = SectorTable::parse_section_bytes(&body)?;
                    }
                    SectionKind::Hash => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        self.hash_values.parse_hash_section(&body)?;
                    }
                    SectionKind::Digest => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        self.hash_values.parse_digest_section(&body)?;
                    }
                    SectionKind::Xhash => {
                        let body = section::read_body(&mut self.pool, pool_index, info)?;
                        let text = header_values::decode_utf8_body(&body)?;
                        self.hash_values = HashValues::parse_xml(&text)?;
                    }
                    SectionKind::DeltaChunk => {
                        warn!("delta_chunk section inside a main segment, skipping");
                    }
                    SectionKind::Next => {}
                    SectionKind::Done => {
                        saw_done = true;
                    }
                    SectionKind::Unknown(raw) => {
                        debug!(tag = ?String::from_utf8_lossy(&raw), "unknown section, skipped");
                    }
                }
            }
        }
        if !saw_done {
            warn!("image ends without a done section; segment list may be incomplete");
        }
        if !self.media.is_defined() {
            return Err(Error::invalid_format("image", "missing volume section"));
        }
        self.media.validate()?;

        // Union of the value tables, lowest precedence first
        let mut merged = HeaderValues::new();
        if let Some(table) = &header_table {
            merged.merge_from(table);
        }
        if let Some(table) = &header2_table {
            merged.merge_from(table);
        }
        if let Some(table) = &xheader_table {
            merged.merge_from(table);
        }
        probe.acquiry_software_version = merged
            .get(HeaderValueId::AcquirySoftwareVersion)
            .map(str::to_string);
        self.header_values = merged;

        self.format = Some(detect_format(&probe)?);
        self.load_delta_segments()?;

        self.media_frozen = true;
        self.state = HandleState::Reading;
        Ok(())
    }

    /// Layer delta segment rebindings over the main chunk table
    fn load_delta_segments(&mut self) -> Result<()> {
        let Some(basename) = self.basename.clone() else {
            return Ok(());
        };
        let schema = NamingSchema::Delta;
        for delta_number in 1..=schema.max_segments() {
            let path = schema.segment_path(&basename, delta_number)?;
            if !path.is_file() {
                break;
            }
            debug!(path = %path.display(), "loading delta segment");
            let pool_index = self.pool.open(&path)?;
            let mut header_bytes = [0u8; SegmentFileHeader::SIZE];
            self.pool.read_exact_at(pool_index, 0, &mut header_bytes)?;
            SegmentFileHeader::parse(&header_bytes)?;
            let sections = section::walk_sections(
                &mut self.pool,
                pool_index,
                SegmentFileHeader::SIZE as u64,
                self.options.tolerance,
            )?;
            for info in &sections {
                if info.kind != SectionKind::DeltaChunk {
                    continue;
                }
                if info.data_size < 4 {
                    return Err(Error::invalid_format(
                        "delta_chunk section",
                        "body too small",
                    ));
                }
                let mut index_bytes = [0u8; 4];
                self.pool
                    .read_exact_at(pool_index, info.data_offset, &mut index_bytes)?;
                let chunk_index = u32::from_le_bytes(index_bytes) as u64;
                self.chunk_table.bind_delta(
                    chunk_index,
                    ChunkEntry {
                        segment: pool_index,
                        file_offset: info.data_offset + 4,
                        packed_size: (info.data_size - 4) as u32,
                        flags: RangeFlags(RangeFlags::HAS_CHECKSUM),
                    },
                );
            }
        }
        Ok(())
    }

    fn open_write(&mut self, path: &Path) -> Result<()> {
        let state = write::open_writer(self, path)?;
        self.writer = Some(state);
        self.state = HandleState::Writing;
        Ok(())
    }

    /// Close the handle, finalising any written segments
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            HandleState::Writing => write::finalize(self)?,
            HandleState::Fresh | HandleState::Reading | HandleState::Closed => {}
        }
        self.pool.close_all();
        self.state = HandleState::Closed;
        Ok(())
    }

    /// Detected (read) or configured (write) format family
    pub fn format(&self) -> Option<EwfFormat> {
        self.format
    }

    pub fn media(&self) -> &MediaModel {
        &self.media
    }

    pub fn media_size(&self) -> u64 {
        self.media.media_size()
    }

    pub fn chunk_size(&self) -> u32 {
        self.media.chunk_size()
    }

    /// The handle is closed or was never opened
    fn closed_error(&self, op: IoOp) -> Error {
        Error::io_closed(op, self.basename.clone().unwrap_or_default())
    }

    /// Validate and remember a read/write position
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        if self.state != HandleState::Reading && self.state != HandleState::Writing {
            return Err(self.closed_error(IoOp::Seek));
        }
        if offset > self.media_size() && self.state == HandleState::Reading {
            return Err(Error::OutOfRange {
                field: "offset",
                value: offset,
                limit: self.media_size(),
            });
        }
        self.position = offset;
        Ok(offset)
    }

    /// Read from the remembered position
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self.read_at(self.position, buf)?;
        self.position += read as u64;
        Ok(read)
    }

    /// Read up to `buf.len()` bytes of media data at `offset`
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self.state {
            HandleState::Reading => {}
            HandleState::Writing => {
                return Err(Error::invalid_argument("handle is open for writing"));
            }
            HandleState::Fresh | HandleState::Closed => {
                return Err(self.closed_error(IoOp::Read));
            }
        }
        let media_size = self.media_size();
        if offset >= media_size {
            return Ok(0);
        }
        let chunk_size = self.chunk_size() as u64;
        let mut copied = 0usize;
        for span in ChunkIter::new(offset, buf.len() as u64, chunk_size, media_size) {
            self.load_chunk(span.chunk_index)?;
            let source = &self.cache.data[span.offset_in_chunk..span.offset_in_chunk + span.length];
            buf[copied..copied + span.length].copy_from_slice(source);
            copied += span.length;
        }
        Ok(copied)
    }

    /// Write media data; append-only in write mode, whole-chunk delta
    /// rebinding in read-write mode
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        match self.state {
            HandleState::Writing => write::append(self, offset, buf),
            HandleState::Reading if self.options.access.write => {
                write::delta_write(self, offset, buf)
            }
            HandleState::Reading => {
                Err(Error::invalid_argument("handle not open for writing"))
            }
            HandleState::Fresh | HandleState::Closed => {
                Err(self.closed_error(IoOp::Write))
            }
        }
    }

    /// Append at the current write position
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.write_at(self.position, buf)?;
        self.position += written as u64;
        Ok(written)
    }

    /// Decode the chunk into the one-slot cache
    fn load_chunk(&mut self, chunk_index: u64) -> Result<()> {
        if self.cache.index == Some(chunk_index) {
            return Ok(());
        }
        let chunk_size = self.chunk_size() as u64;
        let media_size = self.media_size();
        let expected = (media_size - (chunk_index * chunk_size).min(media_size))
            .min(chunk_size) as usize;

        let entry = match self.chunk_table.get(chunk_index) {
            Some(entry) => *entry,
            None => {
                // Unbound chunks read as zero fill
                self.cache.index = Some(chunk_index);
                self.cache.data = vec![0u8; expected];
                return Ok(());
            }
        };
        let data = if entry.flags.is_corrupted() {
            self.record_checksum_error(chunk_index);
            vec![0u8; expected]
        } else {
            let mut packed = vec![0u8; entry.packed_size as usize];
            self.pool
                .read_exact_at(entry.segment, entry.file_offset, &mut packed)?;
            match self.codec.decode(&packed, entry.flags, expected, chunk_index) {
                Ok(decoded) if decoded.corrupted => {
                    self.chunk_table.mark_corrupted(chunk_index);
                    self.record_checksum_error(chunk_index);
                    if self.options.wipe_on_error {
                        vec![0u8; expected]
                    } else {
                        let mut data = decoded.data;
                        data.resize(expected, 0);
                        data
                    }
                }
                Ok(decoded) => {
                    let mut data = decoded.data;
                    if data.len() < expected {
                        data.resize(expected, 0);
                    }
                    data
                }
                Err(Error::ChecksumOrDecompress { .. }) => {
                    self.chunk_table.mark_corrupted(chunk_index);
                    self.record_checksum_error(chunk_index);
                    vec![0u8; expected]
                }
                Err(error) => return Err(error),
            }
        };
        self.cache.index = Some(chunk_index);
        self.cache.data = data;
        Ok(())
    }

    fn record_checksum_error(&mut self, chunk_index: u64) {
        let sectors_per_chunk = self.media.sectors_per_chunk as u64;
        let first = chunk_index * sectors_per_chunk;
        // registers are advisory: an insert failure must not fail the read
        let _ = self.checksum_errors.add(first, sectors_per_chunk, true);
    }

    pub(crate) fn invalidate_cached_chunk(&mut self, chunk_index: u64) {
        if self.cache.index == Some(chunk_index) {
            self.cache.index = None;
            self.cache.data.clear();
        }
    }

    // ---- value accessors ----

    /// Set a media value before the model is frozen.
    ///
    /// Keys: `bytes_per_sector`, `sectors_per_chunk`, `media_type`,
    /// `media_flags`, `number_of_sectors`, `error_granularity`.
    pub fn set_media_value(&mut self, key: &str, value: u64) -> Result<()> {
        if self.media_frozen {
            return Err(Error::invalid_argument("media values are frozen"));
        }
        match key {
            "bytes_per_sector" => self.media.bytes_per_sector = value as u32,
            "sectors_per_chunk" => self.media.sectors_per_chunk = value as u32,
            "media_type" => self.media.media_type = MediaType::from(value as u8),
            "media_flags" => self.media.media_flags = ewfkit_core::MediaFlags(value as u8),
            "number_of_sectors" => self.media.number_of_sectors = value,
            "error_granularity" => self.media.error_granularity = value as u32,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unknown media value: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    pub fn get_media_value(&self, key: &str) -> Option<u64> {
        match key {
            "bytes_per_sector" => Some(self.media.bytes_per_sector as u64),
            "sectors_per_chunk" => Some(self.media.sectors_per_chunk as u64),
            "chunk_size" => Some(self.media.chunk_size() as u64),
            "media_type" => Some(self.media.media_type.to_byte() as u64),
            "media_flags" => Some(self.media.media_flags.0 as u64),
            "number_of_sectors" => Some(self.media.number_of_sectors),
            "number_of_chunks" => Some(self.media.number_of_chunks),
            "media_size" => Some(self.media.media_size()),
            "error_granularity" => Some(self.media.error_granularity as u64),
            _ => None,
        }
    }

    pub fn set_header_value(&mut self, id: HeaderValueId, value: impl Into<String>) {
        self.header_values.set(id, value);
    }

    pub fn get_header_value(&self, id: HeaderValueId) -> Option<&str> {
        self.header_values.get(id)
    }

    pub fn header_values(&self) -> &HeaderValues {
        &self.header_values
    }

    pub fn set_hash_value(&mut self, id: HashValueId, value: impl Into<String>) {
        self.hash_values.set(id, value);
    }

    pub fn get_hash_value(&self, id: HashValueId) -> Option<&str> {
        self.hash_values.get(id)
    }

    pub fn hash_values(&self) -> &HashValues {
        &self.hash_values
    }

    /// Copy the case metadata of another handle (acquire-then-export flows)
    pub fn copy_header_values(&mut self, source: &Handle) {
        self.header_values.merge_from(&source.header_values);
    }

    /// Copy the media geometry of another handle
    pub fn copy_media_values(&mut self, source: &Handle) -> Result<()> {
        if self.media_frozen {
            return Err(Error::invalid_argument("media values are frozen"));
        }
        self.media = source.media.clone();
        Ok(())
    }

    // ---- error registers ----

    pub fn add_acquiry_error(&mut self, first_sector: u64, number_of_sectors: u64) -> Result<()> {
        self.acquiry_errors.add(first_sector, number_of_sectors, true)
    }

    pub fn num_acquiry_errors(&self) -> usize {
        self.acquiry_errors.len()
    }

    pub fn get_acquiry_error(&self, index: usize) -> Option<SectorRange> {
        self.acquiry_errors.get(index)
    }

    pub fn num_checksum_errors(&self) -> usize {
        self.checksum_errors.len()
    }

    pub fn get_checksum_error(&self, index: usize) -> Option<SectorRange> {
        self.checksum_errors.get(index)
    }

    pub fn add_session(&mut self, first_sector: u64, number_of_sectors: u64) -> Result<()> {
        self.sessions.add(first_sector, number_of_sectors, false)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_session(&self, index: usize) -> Option<SectorRange> {
        self.sessions.get(index)
    }

}
