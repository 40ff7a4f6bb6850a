//! Chunk table: logical chunk index -> physical range
//!
//! Two on-disk encodings are supported. v1 (`table`/`table2` sections)
//! stores 32-bit offsets relative to a 64-bit base, with the top bit marking
//! compression; v2 (Ex01) stores 16-byte records with explicit flags. The
//! fill/correct pair reconciles a `table` with its `table2` backup and keeps
//! per-entry corruption state instead of failing the open.

use ewfkit_core::{Error, Result};
use tracing::{debug, warn};

use crate::checksum::ewf_checksum;
use crate::section::SectionInfo;

/// Per-entry range flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeFlags(pub u32);

impl RangeFlags {
    pub const IS_COMPRESSED: u32 = 0x0000_0001;
    pub const HAS_CHECKSUM: u32 = 0x0000_0002;
    pub const USES_PATTERN_FILL: u32 = 0x0000_0004;
    pub const IS_SPARSE: u32 = 0x0000_0008;
    pub const IS_DELTA: u32 = 0x0000_0010;
    pub const IS_TAINTED: u32 = 0x0000_0020;
    pub const IS_CORRUPTED: u32 = 0x0000_0040;

    /// Mask of the bits that may appear in a v2 on-disk entry
    const V2_DISK_MASK: u32 = Self::IS_COMPRESSED | Self::HAS_CHECKSUM | Self::USES_PATTERN_FILL;

    pub fn is_compressed(&self) -> bool {
        self.0 & Self::IS_COMPRESSED != 0
    }

    pub fn has_checksum(&self) -> bool {
        self.0 & Self::HAS_CHECKSUM != 0
    }

    pub fn uses_pattern_fill(&self) -> bool {
        self.0 & Self::USES_PATTERN_FILL != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.0 & Self::IS_SPARSE != 0
    }

    pub fn is_delta(&self) -> bool {
        self.0 & Self::IS_DELTA != 0
    }

    pub fn is_tainted(&self) -> bool {
        self.0 & Self::IS_TAINTED != 0
    }

    pub fn is_corrupted(&self) -> bool {
        self.0 & Self::IS_CORRUPTED != 0
    }

    pub fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }

    /// Interpret v2 on-disk chunk data flags; reserved bits are rejected
    pub fn from_disk_v2(bits: u32) -> Result<Self> {
        if bits & !Self::V2_DISK_MASK != 0 {
            return Err(Error::UnsupportedFlags { bits });
        }
        Ok(Self(bits))
    }

    /// The bits written into a v2 on-disk entry
    pub fn to_disk_v2(&self) -> u32 {
        self.0 & Self::V2_DISK_MASK
    }
}

/// One chunk binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    /// IO-pool index of the segment file holding the chunk
    pub segment: usize,
    /// Absolute file offset of the packed chunk bytes
    pub file_offset: u64,
    /// Packed size, checksum trailer included
    pub packed_size: u32,
    pub flags: RangeFlags,
}

/// Size of the on-disk v1/v2 table section header
pub const TABLE_HEADER_SIZE: usize = 24;
/// Size of one v1 table entry
pub const TABLE_ENTRY_SIZE_V1: usize = 4;
/// Size of one v2 table entry
pub const TABLE_ENTRY_SIZE_V2: usize = 16;

/// A parsed `table`/`table2` section body, not yet reconciled
#[derive(Debug, Clone)]
pub struct TableSection {
    pub base_offset: u64,
    /// Raw v1 entries (stored 32-bit words) or empty for v2 bodies
    pub entries_v1: Vec<u32>,
    /// v2 entries as (offset, size, disk flags)
    pub entries_v2: Vec<(u64, u32, u32)>,
    /// A header or entries checksum failed: values look plausible but come
    /// from an untrusted source
    pub tainted: bool,
}

impl TableSection {
    pub fn number_of_entries(&self) -> usize {
        if self.entries_v2.is_empty() {
            self.entries_v1.len()
        } else {
            self.entries_v2.len()
        }
    }

    /// Parse a v1 table body. `has_footer` is false for EWF-S01, whose
    /// entries carry no trailing checksum.
    pub fn parse_v1(body: &[u8], has_footer: bool) -> Result<Self> {
        if body.len() < TABLE_HEADER_SIZE {
            return Err(Error::invalid_format(
                "table section",
                format!("{} bytes, need {}", body.len(), TABLE_HEADER_SIZE),
            ));
        }
        let number_of_entries = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let base_offset = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let stored = u32::from_le_bytes(body[20..24].try_into().unwrap());
        let mut tainted = ewf_checksum(&body[..20]) != stored;

        let entries_size = number_of_entries * TABLE_ENTRY_SIZE_V1;
        let entries_end = TABLE_HEADER_SIZE + entries_size;
        if body.len() < entries_end {
            return Err(Error::invalid_format(
                "table section",
                format!(
                    "{} entries do not fit in {} body bytes",
                    number_of_entries,
                    body.len()
                ),
            ));
        }
        let entries_data = &body[TABLE_HEADER_SIZE..entries_end];
        if has_footer {
            if body.len() < entries_end + 4 {
                tainted = true;
            } else {
                let footer = u32::from_le_bytes(body[entries_end..entries_end + 4].try_into().unwrap());
                if ewf_checksum(entries_data) != footer {
                    tainted = true;
                }
            }
        }
        let entries_v1 = entries_data
            .chunks_exact(TABLE_ENTRY_SIZE_V1)
            .map(|raw| u32::from_le_bytes(raw.try_into().unwrap()))
            .collect();

        Ok(Self {
            base_offset,
            entries_v1,
            entries_v2: Vec::new(),
            tainted,
        })
    }

    /// Parse a v2 (Ex01) table body
    pub fn parse_v2(body: &[u8]) -> Result<Self> {
        if body.len() < TABLE_HEADER_SIZE {
            return Err(Error::invalid_format(
                "table section",
                format!("{} bytes, need {}", body.len(), TABLE_HEADER_SIZE),
            ));
        }
        let number_of_entries = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let stored = u32::from_le_bytes(body[20..24].try_into().unwrap());
        let mut tainted = ewf_checksum(&body[..20]) != stored;

        let entries_size = number_of_entries * TABLE_ENTRY_SIZE_V2;
        let entries_end = TABLE_HEADER_SIZE + entries_size;
        if body.len() < entries_end {
            return Err(Error::invalid_format(
                "table section",
                format!(
                    "{} v2 entries do not fit in {} body bytes",
                    number_of_entries,
                    body.len()
                ),
            ));
        }
        let entries_data = &body[TABLE_HEADER_SIZE..entries_end];
        if body.len() < entries_end + 4 {
            tainted = true;
        } else {
            let footer = u32::from_le_bytes(body[entries_end..entries_end + 4].try_into().unwrap());
            if ewf_checksum(entries_data) != footer {
                tainted = true;
            }
        }
        let entries_v2 = entries_data
            .chunks_exact(TABLE_ENTRY_SIZE_V2)
            .map(|raw| {
                (
                    u64::from_le_bytes(raw[0..8].try_into().unwrap()),
                    u32::from_le_bytes(raw[8..12].try_into().unwrap()),
                    u32::from_le_bytes(raw[12..16].try_into().unwrap()),
                )
            })
            .collect();

        Ok(Self {
            base_offset: 0,
            entries_v1: Vec::new(),
            entries_v2,
            tainted,
        })
    }

    /// Serialise a v1 table body for the write path
    pub fn serialize_v1(base_offset: u64, entries: &[u32], include_footer: bool) -> Vec<u8> {
        let mut body = Vec::with_capacity(TABLE_HEADER_SIZE + entries.len() * 4 + 4);
        body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&base_offset.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        let header_checksum = ewf_checksum(&body[..20]);
        body.extend_from_slice(&header_checksum.to_le_bytes());
        let entries_start = body.len();
        for entry in entries {
            body.extend_from_slice(&entry.to_le_bytes());
        }
        if include_footer {
            let footer = ewf_checksum(&body[entries_start..]);
            body.extend_from_slice(&footer.to_le_bytes());
        }
        body
    }

    /// Serialise a v2 table body for the write path
    pub fn serialize_v2(entries: &[(u64, u32, u32)]) -> Vec<u8> {
        let mut body = Vec::with_capacity(TABLE_HEADER_SIZE + entries.len() * TABLE_ENTRY_SIZE_V2 + 4);
        body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        let header_checksum = ewf_checksum(&body[..20]);
        body.extend_from_slice(&header_checksum.to_le_bytes());
        let entries_start = body.len();
        for (offset, size, flags) in entries {
            body.extend_from_slice(&offset.to_le_bytes());
            body.extend_from_slice(&size.to_le_bytes());
            body.extend_from_slice(&flags.to_le_bytes());
        }
        let footer = ewf_checksum(&body[entries_start..]);
        body.extend_from_slice(&footer.to_le_bytes());
        body
    }
}

/// The logical-chunk index
#[derive(Debug, Default)]
pub struct ChunkTable {
    entries: Vec<Option<ChunkEntry>>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, chunk_index: u64) -> Option<&ChunkEntry> {
        self.entries.get(chunk_index as usize).and_then(|e| e.as_ref())
    }

    fn slot(&mut self, chunk_index: u64) -> &mut Option<ChunkEntry> {
        let index = chunk_index as usize;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        &mut self.entries[index]
    }

    /// Bind a chunk on the write path (append order is the caller's duty)
    pub fn bind(&mut self, chunk_index: u64, entry: ChunkEntry) {
        *self.slot(chunk_index) = Some(entry);
    }

    /// Layer a delta binding over whatever is installed
    pub fn bind_delta(&mut self, chunk_index: u64, mut entry: ChunkEntry) {
        entry.flags = entry.flags.with(RangeFlags::IS_DELTA);
        *self.slot(chunk_index) = Some(entry);
    }

    /// Mark a chunk corrupted after a decode failure
    pub fn mark_corrupted(&mut self, chunk_index: u64) {
        if let Some(Some(entry)) = self.entries.get_mut(chunk_index as usize) {
            entry.flags = entry.flags.with(RangeFlags::IS_CORRUPTED);
        }
    }

    /// Install entries from a v1 `table` section.
    ///
    /// Returns the chunk index following the table's range. Existing delta
    /// bindings are kept; any other existing binding is a duplicate.
    pub fn fill_v1(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
        section: &SectionInfo,
    ) -> Result<u64> {
        self.apply_v1(first_chunk, segment, table, section, false)
    }

    /// Reconcile entries from a v1 `table2` section against the installed
    /// table, preferring whichever side is not corrupted.
    pub fn correct_v1(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
        section: &SectionInfo,
    ) -> Result<u64> {
        self.apply_v1(first_chunk, segment, table, section, true)
    }

    fn apply_v1(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
        section: &SectionInfo,
        correcting: bool,
    ) -> Result<u64> {
        let entries = &table.entries_v1;
        if entries.is_empty() {
            return Err(Error::invalid_format("table section", "no table entries"));
        }
        let mut chunk_index = first_chunk;
        let mut overflow = false;
        let mut is_compressed = false;
        let mut stored_offset = entries[0];

        for entry_index in 0..entries.len() - 1 {
            let current_offset = if overflow {
                stored_offset
            } else {
                is_compressed = stored_offset >> 31 != 0;
                stored_offset & 0x7fff_ffff
            };
            stored_offset = entries[entry_index + 1];
            let next_offset = if overflow {
                stored_offset
            } else {
                stored_offset & 0x7fff_ffff
            };
            let mut corrupted = false;

            // Compensates for the EnCase 6.7 > 2 GiB segment file layout
            let chunk_size = if next_offset < current_offset {
                if stored_offset < current_offset {
                    corrupted = true;
                }
                stored_offset.wrapping_sub(current_offset)
            } else {
                next_offset - current_offset
            };
            if chunk_size == 0 || chunk_size > i32::MAX as u32 {
                corrupted = true;
            }
            let flags = entry_flags(is_compressed, corrupted, table.tainted);
            let entry = ChunkEntry {
                segment,
                file_offset: table.base_offset + current_offset as u64,
                packed_size: chunk_size,
                flags,
            };
            self.install(chunk_index, entry, correcting)?;

            if !overflow
                && current_offset
                    .checked_add(chunk_size)
                    .map_or(true, |v| v > i32::MAX as u32)
            {
                debug!(chunk_index, current_offset, "chunk offset overflow");
                overflow = true;
                is_compressed = false;
            }
            chunk_index += 1;
        }

        // The last entry has no successor; its size comes from the enclosing
        // section bounds: chunks live before the table (E01, sectors section)
        // or inside it (EWF-S01).
        let current_offset = if overflow {
            stored_offset
        } else {
            is_compressed = stored_offset >> 31 != 0;
            stored_offset & 0x7fff_ffff
        };
        let mut corrupted = false;
        let last_chunk_offset = table.base_offset + current_offset as u64;
        let last_chunk_end = if last_chunk_offset < section.start_offset {
            section.start_offset
        } else if last_chunk_offset < section.end_offset {
            section.end_offset
        } else {
            corrupted = true;
            last_chunk_offset
        };
        let mut last_chunk_size = last_chunk_end - last_chunk_offset;
        if correcting {
            // A table2 sits one section further along than the table it
            // backs up; compensate by its own size, as the original does.
            let section_size = section.end_offset - section.start_offset;
            if last_chunk_offset < section.start_offset {
                last_chunk_size = last_chunk_size.saturating_sub(section_size);
            }
        }
        if last_chunk_size == 0 || last_chunk_size > i32::MAX as u64 {
            corrupted = true;
        }
        let flags = entry_flags(is_compressed, corrupted, table.tainted);
        let entry = ChunkEntry {
            segment,
            file_offset: last_chunk_offset,
            packed_size: last_chunk_size.min(i32::MAX as u64) as u32,
            flags,
        };
        self.install(chunk_index, entry, correcting)?;

        Ok(chunk_index + 1)
    }

    /// Install entries from a v2 table section; flags are explicit, offsets
    /// absolute, and the overflow quirk does not exist.
    pub fn fill_v2(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
    ) -> Result<u64> {
        self.apply_v2(first_chunk, segment, table, false)
    }

    /// Reconcile a v2 backup table against the installed entries
    pub fn correct_v2(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
    ) -> Result<u64> {
        self.apply_v2(first_chunk, segment, table, true)
    }

    fn apply_v2(
        &mut self,
        first_chunk: u64,
        segment: usize,
        table: &TableSection,
        correcting: bool,
    ) -> Result<u64> {
        let mut chunk_index = first_chunk;
        for &(offset, size, disk_flags) in &table.entries_v2 {
            let mut flags = RangeFlags::from_disk_v2(disk_flags)?;
            if size == 0 || size > i32::MAX as u32 {
                flags = flags.with(RangeFlags::IS_CORRUPTED);
            }
            if table.tainted {
                flags = flags.with(RangeFlags::IS_TAINTED);
            }
            let entry = ChunkEntry {
                segment,
                file_offset: offset,
                packed_size: size,
                flags,
            };
            self.install(chunk_index, entry, correcting)?;
            chunk_index += 1;
        }
        Ok(chunk_index)
    }

    fn install(&mut self, chunk_index: u64, candidate: ChunkEntry, correcting: bool) -> Result<()> {
        let slot = self.slot(chunk_index);
        let installed = match *slot {
            None => {
                *slot = Some(candidate);
                return Ok(());
            }
            Some(existing) => existing,
        };
        // A delta binding always shadows whatever the tables say
        if installed.flags.is_delta() {
            return Ok(());
        }
        if !correcting {
            return Err(Error::DuplicateBinding { chunk_index });
        }
        let mismatch = installed.file_offset != candidate.file_offset
            || installed.packed_size != candidate.packed_size
            || installed.flags.is_compressed() != candidate.flags.is_compressed();

        let candidate_clean =
            !candidate.flags.is_corrupted() && !candidate.flags.is_tainted();
        let update = if mismatch {
            candidate_clean
                || (installed.flags.is_corrupted() && !candidate.flags.is_corrupted())
        } else {
            installed.flags.is_tainted()
        };
        if update {
            let mut replacement = candidate;
            let installed_clean =
                !installed.flags.is_corrupted() && !installed.flags.is_tainted();
            if mismatch && candidate_clean && installed_clean {
                // Backup disagrees with an equally plausible table entry:
                // take the backup but leave a mark so callers can tell.
                warn!(chunk_index, "table and table2 disagree on an uncorrupted entry");
                replacement.flags = replacement.flags.with(RangeFlags::IS_TAINTED);
            }
            *slot = Some(replacement);
        }
        Ok(())
    }
}

fn entry_flags(is_compressed: bool, corrupted: bool, tainted: bool) -> RangeFlags {
    let mut flags = RangeFlags(RangeFlags::HAS_CHECKSUM);
    if is_compressed {
        flags = flags.with(RangeFlags::IS_COMPRESSED);
    }
    if corrupted {
        flags = flags.with(RangeFlags::IS_CORRUPTED);
    }
    if tainted {
        flags = flags.with(RangeFlags::IS_TAINTED);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The backup table sits one table-sized section after the table
    fn table2_section(table: &SectionInfo) -> SectionInfo {
        let size = table.end_offset - table.start_offset;
        section(table.end_offset, size)
    }

    fn section(start: u64, size: u64) -> SectionInfo {
        SectionInfo {
            kind: crate::section::SectionKind::Table,
            start_offset: start,
            data_offset: start + 76,
            data_size: size - 76,
            end_offset: start + size,
            next_offset: start + size,
            checksum_valid: true,
        }
    }

    /// Entries at relative offsets 0, 100 (compressed), 300 with chunks
    /// stored in a sectors region before the table at `base`..`base+500`.
    fn sample_table(base: u64) -> TableSection {
        TableSection {
            base_offset: base,
            entries_v1: vec![0, 100 | 0x8000_0000, 300],
            entries_v2: Vec::new(),
            tainted: false,
        }
    }

    #[test]
    fn test_v1_body_roundtrip() {
        let entries = vec![0u32, 132, 264 | 0x8000_0000];
        let body = TableSection::serialize_v1(1024, &entries, true);
        let parsed = TableSection::parse_v1(&body, true).unwrap();
        assert_eq!(parsed.base_offset, 1024);
        assert_eq!(parsed.entries_v1, entries);
        assert!(!parsed.tainted);
    }

    #[test]
    fn test_v1_body_corruption_taints() {
        let body = TableSection::serialize_v1(0, &[0, 10, 20], true);
        let mut corrupted = body.clone();
        corrupted[TABLE_HEADER_SIZE + 1] ^= 0xff;
        assert!(TableSection::parse_v1(&corrupted, true).unwrap().tainted);

        let mut header_hit = body;
        header_hit[9] ^= 0x01;
        assert!(TableSection::parse_v1(&header_hit, true).unwrap().tainted);
    }

    #[test]
    fn test_v1_smart_body_has_no_footer() {
        let body = TableSection::serialize_v1(0, &[0, 10], false);
        let parsed = TableSection::parse_v1(&body, false).unwrap();
        assert!(!parsed.tainted);
        assert_eq!(parsed.entries_v1.len(), 2);
    }

    #[test]
    fn test_v2_body_roundtrip() {
        let entries = vec![(4096u64, 200u32, RangeFlags::IS_COMPRESSED), (4296, 132, 0)];
        let body = TableSection::serialize_v2(&entries);
        let parsed = TableSection::parse_v2(&body).unwrap();
        assert_eq!(parsed.entries_v2, entries);
        assert!(!parsed.tainted);
    }

    #[test]
    fn test_fill_v1_sizes_and_flags() {
        let mut table = ChunkTable::new();
        // table section descriptor starts where the sectors data ends
        let info = section(1500, 76 + 24 + 12 + 4);
        let next = table.fill_v1(0, 0, &sample_table(1000), &info).unwrap();
        assert_eq!(next, 3);

        let e0 = table.get(0).unwrap();
        assert_eq!(e0.file_offset, 1000);
        assert_eq!(e0.packed_size, 100);
        assert!(!e0.flags.is_compressed());

        let e1 = table.get(1).unwrap();
        assert_eq!(e1.file_offset, 1100);
        assert_eq!(e1.packed_size, 200);
        assert!(e1.flags.is_compressed());

        // last chunk: 1000+300=1300 runs to the table section start at 1500
        let e2 = table.get(2).unwrap();
        assert_eq!(e2.file_offset, 1300);
        assert_eq!(e2.packed_size, 200);
        assert!(!e2.flags.is_corrupted());
    }

    #[test]
    fn test_fill_v1_zero_size_marks_corrupted() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        let bad = TableSection {
            base_offset: 1000,
            entries_v1: vec![0, 0, 300],
            entries_v2: Vec::new(),
            tainted: false,
        };
        table.fill_v1(0, 0, &bad, &info).unwrap();
        assert!(table.get(0).unwrap().flags.is_corrupted());
        assert!(!table.get(1).unwrap().flags.is_corrupted());
    }

    #[test]
    fn test_fill_v1_tainted_propagates() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        let mut tainted = sample_table(1000);
        tainted.tainted = true;
        table.fill_v1(0, 0, &tainted, &info).unwrap();
        for i in 0..3 {
            assert!(table.get(i).unwrap().flags.is_tainted());
            assert!(!table.get(i).unwrap().flags.is_corrupted());
        }
    }

    #[test]
    fn test_fill_v1_duplicate_binding() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        table.fill_v1(0, 0, &sample_table(1000), &info).unwrap();
        let result = table.fill_v1(0, 0, &sample_table(1000), &info);
        assert!(matches!(result, Err(Error::DuplicateBinding { chunk_index: 0 })));
    }

    #[test]
    fn test_fill_v1_overflow_quirk() {
        // second entry crosses INT32_MAX: from there on, raw offsets and no
        // compression-bit interpretation
        let limit = i32::MAX as u32;
        let entries = vec![limit - 50, limit + 50, limit + 150];
        let table_section = TableSection {
            base_offset: 0,
            entries_v1: entries,
            entries_v2: Vec::new(),
            tainted: false,
        };
        let mut table = ChunkTable::new();
        let info = section((limit + 250) as u64, 120);
        table.fill_v1(0, 0, &table_section, &info).unwrap();

        // entry 0: next offset read masked; 2^31+50 masked = 50 < current,
        // quirk path takes the unmasked stored offset for the size
        let e0 = table.get(0).unwrap();
        assert_eq!(e0.packed_size, 100);
        // after the overflow trigger, offsets are taken unmasked
        let e1 = table.get(1).unwrap();
        assert_eq!(e1.file_offset, (limit + 50) as u64);
        assert_eq!(e1.packed_size, 100);
        assert!(!e1.flags.is_compressed());
    }

    #[test]
    fn test_correct_v1_repairs_corrupted_entry() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        let bad = TableSection {
            base_offset: 1000,
            // entry 1 has zero size
            entries_v1: vec![0, 100 | 0x8000_0000, 100, 300],
            entries_v2: Vec::new(),
            tainted: false,
        };
        table.fill_v1(0, 0, &bad, &info).unwrap();
        assert!(table.get(1).unwrap().flags.is_corrupted());

        table
            .correct_v1(0, 0, &sample_table(1000), &table2_section(&info))
            .ok();
        // 4 vs 3 entries: only the overlapping range is reconciled; the
        // corrupted entry 1 must now match the backup
        let e1 = table.get(1).unwrap();
        assert_eq!(e1.packed_size, 200);
        assert!(!e1.flags.is_corrupted());
    }

    #[test]
    fn test_correct_v1_clears_taint_on_match() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        let mut tainted = sample_table(1000);
        tainted.tainted = true;
        table.fill_v1(0, 0, &tainted, &info).unwrap();

        table
            .correct_v1(0, 0, &sample_table(1000), &table2_section(&info))
            .unwrap();
        for i in 0..3 {
            assert!(!table.get(i).unwrap().flags.is_tainted());
        }
    }

    #[test]
    fn test_correct_v1_disagreement_keeps_mark() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        table.fill_v1(0, 0, &sample_table(1000), &info).unwrap();

        let disagreeing = TableSection {
            base_offset: 1000,
            entries_v1: vec![0, 120 | 0x8000_0000, 300],
            entries_v2: Vec::new(),
            tainted: false,
        };
        table
            .correct_v1(0, 0, &disagreeing, &table2_section(&info))
            .unwrap();
        // backup won, but the disagreement stays visible
        let e0 = table.get(0).unwrap();
        assert_eq!(e0.packed_size, 120);
        assert!(e0.flags.is_tainted());
    }

    #[test]
    fn test_correct_v1_keeps_delta_binding() {
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        table.fill_v1(0, 0, &sample_table(1000), &info).unwrap();
        let delta = ChunkEntry {
            segment: 9,
            file_offset: 16,
            packed_size: 132,
            flags: RangeFlags(RangeFlags::HAS_CHECKSUM),
        };
        table.bind_delta(1, delta);

        table
            .correct_v1(0, 0, &sample_table(1000), &table2_section(&info))
            .unwrap();
        let e1 = table.get(1).unwrap();
        assert!(e1.flags.is_delta());
        assert_eq!(e1.segment, 9);
    }

    #[test]
    fn test_fill_v2_flags() {
        let mut table = ChunkTable::new();
        let section = TableSection {
            base_offset: 0,
            entries_v1: Vec::new(),
            entries_v2: vec![
                (4096, 200, RangeFlags::IS_COMPRESSED),
                (4296, 132, RangeFlags::HAS_CHECKSUM),
                (4428, 16, RangeFlags::USES_PATTERN_FILL | RangeFlags::HAS_CHECKSUM),
            ],
            tainted: false,
        };
        let next = table.fill_v2(0, 2, &section).unwrap();
        assert_eq!(next, 3);
        assert!(table.get(0).unwrap().flags.is_compressed());
        assert!(table.get(1).unwrap().flags.has_checksum());
        assert!(table.get(2).unwrap().flags.uses_pattern_fill());
        assert_eq!(table.get(2).unwrap().segment, 2);
    }

    #[test]
    fn test_fill_v2_reserved_flags_rejected() {
        let mut table = ChunkTable::new();
        let section = TableSection {
            base_offset: 0,
            entries_v1: Vec::new(),
            entries_v2: vec![(4096, 200, 0x80)],
            tainted: false,
        };
        assert!(matches!(
            table.fill_v2(0, 0, &section),
            Err(Error::UnsupportedFlags { bits: 0x80 })
        ));
    }

    #[test]
    fn test_monotone_neighbours_property() {
        // P2: consecutive clean entries in a segment tile the file
        let mut table = ChunkTable::new();
        let info = section(1500, 120);
        table.fill_v1(0, 0, &sample_table(1000), &info).unwrap();
        for i in 0..2u64 {
            let here = table.get(i).unwrap();
            let next = table.get(i + 1).unwrap();
            assert_eq!(here.file_offset + here.packed_size as u64, next.file_offset);
        }
    }
}
