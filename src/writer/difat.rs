//! DIFAT generation
//!
//! The header lists the first 109 FAT sectors. Any further FAT sectors are
//! listed in DIFAT sectors, each holding `sector_size / 4 - 1` ids followed by
//! the index of the next DIFAT sector:
//! - 512-byte sectors: 127 ids + 1 next pointer
//! - 4096-byte sectors: 1023 ids + 1 next pointer

use crate::consts::*;

/// Number of FAT sector ids a single DIFAT sector holds
pub fn ids_per_difat_sector(sector_size: usize) -> usize {
    sector_size / 4 - 1
}

/// Number of DIFAT sectors needed to list `fat_sectors` FAT sectors
pub fn difat_sectors_needed(fat_sectors: u32, sector_size: usize) -> u32 {
    let overflow = fat_sectors.saturating_sub(HEADER_DIFAT_ENTRIES as u32) as usize;
    overflow.div_ceil(ids_per_difat_sector(sector_size)) as u32
}

/// Builds the DIFAT sectors of a new layout
#[derive(Debug)]
pub struct DifatBuilder {
    /// FAT sector ids beyond the first 109
    fat_sector_ids: Vec<u32>,
    sector_size: usize,
}

impl DifatBuilder {
    /// Create a DIFAT builder from the complete list of FAT sectors
    ///
    /// The first 109 ids belong in the header and are skipped.
    pub fn new(sector_size: usize, fat_sectors: &[u32]) -> Self {
        let fat_sector_ids = fat_sectors
            .get(HEADER_DIFAT_ENTRIES..)
            .map(<[u32]>::to_vec)
            .unwrap_or_default();
        Self {
            fat_sector_ids,
            sector_size,
        }
    }

    /// Number of DIFAT sectors this list needs
    pub fn sector_count(&self) -> u32 {
        self.fat_sector_ids
            .len()
            .div_ceil(ids_per_difat_sector(self.sector_size)) as u32
    }

    /// DIFAT sectors laid out contiguously from `first_difat_sector`
    ///
    /// Unused id slots hold FREESECT; the last sector's next pointer is
    /// ENDOFCHAIN.
    pub fn generate_difat_sectors(&self, first_difat_sector: u32) -> Vec<Vec<u8>> {
        let per_sector = ids_per_difat_sector(self.sector_size);
        let count = self.sector_count();

        self.fat_sector_ids
            .chunks(per_sector)
            .enumerate()
            .map(|(difat_idx, ids)| {
                let mut sector_data = vec![0xFFu8; self.sector_size];
                for (i, &id) in ids.iter().enumerate() {
                    sector_data[i * 4..i * 4 + 4].copy_from_slice(&id.to_le_bytes());
                }

                let next = if (difat_idx as u32) + 1 < count {
                    first_difat_sector + difat_idx as u32 + 1
                } else {
                    ENDOFCHAIN
                };
                let next_offset = self.sector_size - 4;
                sector_data[next_offset..].copy_from_slice(&next.to_le_bytes());
                sector_data
            })
            .collect()
    }
}
