//! Sector interval registers
//!
//! Three registers share this structure: acquiry errors (asserted bad input
//! ranges, persisted in `error2` sections), checksum errors (chunks whose
//! CRC failed at read time, runtime only), and sessions (CD/DVD session
//! starts, persisted in `session` sections). Each is a sorted list of
//! half-open sector intervals that can coalesce on insert.

use ewfkit_core::{Error, Result};

use crate::checksum::ewf_checksum;

/// One interval over sector space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub first_sector: u64,
    pub number_of_sectors: u64,
}

impl SectorRange {
    /// One past the last sector
    pub fn end_sector(&self) -> u64 {
        self.first_sector + self.number_of_sectors
    }

    pub fn contains(&self, sector: u64) -> bool {
        sector >= self.first_sector && sector < self.end_sector()
    }
}

/// Sorted, coalescing interval list
#[derive(Debug, Clone, Default)]
pub struct SectorTable {
    ranges: Vec<SectorRange>,
}

/// Size of the on-disk error2/session header
const ENTRIES_HEADER_SIZE: usize = 24;
/// Size of one on-disk (first_sector, number_of_sectors) pair
const ENTRY_SIZE: usize = 8;

impl SectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Get the i-th interval in sector order
    pub fn get(&self, index: usize) -> Option<SectorRange> {
        self.ranges.get(index).copied()
    }

    /// Find the interval containing `sector`
    pub fn find(&self, sector: u64) -> Option<SectorRange> {
        match self
            .ranges
            .binary_search_by(|range| {
                if range.contains(sector) {
                    std::cmp::Ordering::Equal
                } else if range.first_sector > sector {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Less
                }
            }) {
            Ok(index) => Some(self.ranges[index]),
            Err(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorRange> {
        self.ranges.iter()
    }

    /// Insert an interval.
    ///
    /// With `merge`, the interval is coalesced into any adjacent or
    /// overlapping neighbours; without, it is inserted in sorted position
    /// as-is.
    pub fn add(&mut self, first_sector: u64, number_of_sectors: u64, merge: bool) -> Result<()> {
        if number_of_sectors == 0 {
            return Err(Error::invalid_argument("empty sector range"));
        }
        let mut range = SectorRange {
            first_sector,
            number_of_sectors,
        };
        if !merge {
            let position = self
                .ranges
                .partition_point(|r| r.first_sector < range.first_sector);
            self.ranges.insert(position, range);
            return Ok(());
        }
        // Collect the span of existing ranges that touch or overlap
        let start = self
            .ranges
            .partition_point(|r| r.end_sector() < range.first_sector);
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].first_sector <= range.end_sector() {
            end += 1;
        }
        if start < end {
            let merged_first = range.first_sector.min(self.ranges[start].first_sector);
            let merged_end = range.end_sector().max(self.ranges[end - 1].end_sector());
            range = SectorRange {
                first_sector: merged_first,
                number_of_sectors: merged_end - merged_first,
            };
            self.ranges.drain(start..end);
        }
        self.ranges.insert(start, range);
        Ok(())
    }

    /// Serialise as an `error2`/`session` section body
    pub fn to_section_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(ENTRIES_HEADER_SIZE + self.ranges.len() * ENTRY_SIZE + 4);
        body.extend_from_slice(&(self.ranges.len() as u32).to_le_bytes());
        body.extend_from_slice(&[0u8; 16]);
        let header_checksum = ewf_checksum(&body[..20]);
        body.extend_from_slice(&header_checksum.to_le_bytes());
        let entries_start = body.len();
        for range in &self.ranges {
            body.extend_from_slice(&(range.first_sector.min(u32::MAX as u64) as u32).to_le_bytes());
            body.extend_from_slice(
                &(range.number_of_sectors.min(u32::MAX as u64) as u32).to_le_bytes(),
            );
        }
        let footer = ewf_checksum(&body[entries_start..]);
        body.extend_from_slice(&footer.to_le_bytes());
        body
    }

    /// Parse an `error2`/`session` section body
    pub fn parse_section_bytes(body: &[u8]) -> Result<Self> {
        if body.len() < ENTRIES_HEADER_SIZE {
            return Err(Error::invalid_format(
                "sector range section",
                format!("{} bytes, need {}", body.len(), ENTRIES_HEADER_SIZE),
            ));
        }
        let count = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let stored = u32::from_le_bytes(body[20..24].try_into().unwrap());
        if ewf_checksum(&body[..20]) != stored {
            return Err(Error::invalid_format(
                "sector range section",
                "header checksum mismatch",
            ));
        }
        let entries_end = ENTRIES_HEADER_SIZE + count * ENTRY_SIZE;
        if body.len() < entries_end + 4 {
            return Err(Error::invalid_format(
                "sector range section",
                format!("{} entries do not fit in {} bytes", count, body.len()),
            ));
        }
        let entries_data = &body[ENTRIES_HEADER_SIZE..entries_end];
        let footer = u32::from_le_bytes(body[entries_end..entries_end + 4].try_into().unwrap());
        if ewf_checksum(entries_data) != footer {
            return Err(Error::invalid_format(
                "sector range section",
                "entries checksum mismatch",
            ));
        }
        let mut table = Self::new();
        for raw in entries_data.chunks_exact(ENTRY_SIZE) {
            let first = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as u64;
            let count = u32::from_le_bytes(raw[4..8].try_into().unwrap()) as u64;
            if count > 0 {
                table.add(first, count, true)?;
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sorted() {
        let mut table = SectorTable::new();
        table.add(100, 10, false).unwrap();
        table.add(10, 5, false).unwrap();
        table.add(50, 1, false).unwrap();
        let firsts: Vec<u64> = table.iter().map(|r| r.first_sector).collect();
        assert_eq!(firsts, vec![10, 50, 100]);
    }

    #[test]
    fn test_add_merges_adjacent() {
        let mut table = SectorTable::new();
        table.add(10, 10, true).unwrap();
        table.add(20, 5, true).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(0).unwrap(),
            SectorRange {
                first_sector: 10,
                number_of_sectors: 15
            }
        );
    }

    #[test]
    fn test_add_merges_overlapping_span() {
        let mut table = SectorTable::new();
        table.add(0, 5, true).unwrap();
        table.add(20, 5, true).unwrap();
        table.add(40, 5, true).unwrap();
        // bridges the middle two
        table.add(3, 40, true).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(0).unwrap(),
            SectorRange {
                first_sector: 0,
                number_of_sectors: 45
            }
        );
    }

    #[test]
    fn test_no_merge_keeps_intervals_separate() {
        let mut table = SectorTable::new();
        table.add(10, 10, false).unwrap();
        table.add(20, 5, false).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_find() {
        let mut table = SectorTable::new();
        table.add(10, 10, true).unwrap();
        table.add(100, 1, true).unwrap();
        assert_eq!(table.find(15).unwrap().first_sector, 10);
        assert_eq!(table.find(100).unwrap().first_sector, 100);
        assert!(table.find(20).is_none());
        assert!(table.find(0).is_none());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut table = SectorTable::new();
        assert!(table.add(5, 0, true).is_err());
    }

    #[test]
    fn test_section_roundtrip() {
        let mut table = SectorTable::new();
        table.add(64, 64, true).unwrap();
        table.add(4096, 128, true).unwrap();

        let body = table.to_section_bytes();
        let parsed = SectorTable::parse_section_bytes(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get(0).unwrap().first_sector, 64);
        assert_eq!(parsed.get(1).unwrap().number_of_sectors, 128);
    }

    #[test]
    fn test_section_corruption_detected() {
        let mut table = SectorTable::new();
        table.add(64, 64, true).unwrap();
        let mut body = table.to_section_bytes();
        let last = body.len() - 6;
        body[last] ^= 0x01;
        assert!(SectorTable::parse_section_bytes(&body).is_err());
    }
}
