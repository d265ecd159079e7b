//! FAT (File Allocation Table) generation
//!
//! Blocks are handed out strictly in order, so every chain the writer lays
//! out is contiguous. The FAT describes:
//! - Regular chains with forward pointers, ended by ENDOFCHAIN
//! - FAT sectors marked with FATSECT
//! - DIFAT sectors marked with DIFSECT
//! - Padding entries left at FREESECT

use crate::consts::*;
use crate::error::{CfbError, Result};

/// Sequential block allocator for a new layout
#[derive(Debug)]
pub struct FatBuilder {
    /// Next-block pointers, indexed by block
    fat: Vec<u32>,
    /// Next unused block
    next_sector: u32,
    sector_size: usize,
}

impl FatBuilder {
    /// Create a new FAT builder
    ///
    /// # Arguments
    ///
    /// * `sector_size` - Size of each sector in bytes (512 or 4096)
    pub fn new(sector_size: usize) -> Self {
        Self {
            fat: Vec::new(),
            next_sector: 0,
            sector_size,
        }
    }

    /// Allocate a chain large enough for `size` bytes
    ///
    /// Returns the first block, or ENDOFCHAIN when `size` is zero.
    pub fn allocate_chain(&mut self, size: usize) -> u32 {
        if size == 0 {
            return ENDOFCHAIN;
        }

        let num_sectors = size.div_ceil(self.sector_size) as u32;
        let start_sector = self.next_sector;
        let end = start_sector + num_sectors;
        self.fat.resize(end as usize, FREESECT);

        for sector in start_sector..end - 1 {
            self.fat[sector as usize] = sector + 1;
        }
        self.fat[(end - 1) as usize] = ENDOFCHAIN;

        self.next_sector = end;
        start_sector
    }

    /// Reserve `count` blocks marked with `marker` (FATSECT or DIFSECT)
    ///
    /// Returns the first reserved block, or ENDOFCHAIN when `count` is zero.
    pub fn allocate_special(&mut self, count: u32, marker: u32) -> u32 {
        if count == 0 {
            return ENDOFCHAIN;
        }

        let start = self.next_sector;
        let end = start + count;
        self.fat.resize(end as usize, FREESECT);
        self.fat[start as usize..end as usize].fill(marker);

        self.next_sector = end;
        start
    }

    /// Raw FAT entries
    pub fn fat(&self) -> &[u32] {
        &self.fat
    }

    /// Number of blocks laid out so far
    pub fn total_sectors(&self) -> u32 {
        self.next_sector
    }

    /// FAT entries packed into sectors, padded with FREESECT
    ///
    /// `count` is the number of FAT sectors already reserved for the table.
    pub fn generate_fat_sectors(&self, count: u32) -> Vec<Vec<u8>> {
        let entries_per_sector = self.sector_size / 4;
        (0..count as usize)
            .map(|sector_idx| {
                let mut sector_data = vec![0xFFu8; self.sector_size];
                let start_entry = (sector_idx * entries_per_sector).min(self.fat.len());
                let end_entry = (start_entry + entries_per_sector).min(self.fat.len());
                for (i, &value) in self.fat[start_entry..end_entry].iter().enumerate() {
                    sector_data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
                }
                sector_data
            })
            .collect()
    }

    /// Check that every pointer stays inside the table
    ///
    /// The writer only links forward, so a pointer at or behind its own
    /// block also means the layout went wrong.
    pub fn validate(&self) -> Result<()> {
        let len = self.fat.len() as u32;
        for (sector, &next) in self.fat.iter().enumerate() {
            if is_special_sector(next) {
                continue;
            }
            if next >= len || next <= sector as u32 {
                return Err(CfbError::InternalInvariant(format!(
                    "FAT entry {} points to {}",
                    sector, next
                )));
            }
        }
        Ok(())
    }
}
