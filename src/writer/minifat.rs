//! Mini-FAT generation
//!
//! Small documents are packed back to back into the mini stream, each padded
//! to a whole number of mini sectors. The mini stream is later written as one
//! regular chain owned by the root entry.

use crate::consts::*;

/// Sequential mini sector allocator
#[derive(Debug)]
pub struct MiniFatBuilder {
    /// Next-mini-sector pointers, indexed by mini sector
    minifat: Vec<u32>,
    mini_sector_size: usize,
    /// Concatenated, padded small documents
    ministream_data: Vec<u8>,
}

impl MiniFatBuilder {
    /// Create a new Mini-FAT builder
    ///
    /// # Arguments
    ///
    /// * `mini_sector_size` - Size of each mini sector in bytes (64)
    pub fn new(mini_sector_size: usize) -> Self {
        Self {
            minifat: Vec::new(),
            mini_sector_size,
            ministream_data: Vec::new(),
        }
    }

    /// Append a small document and return its first mini sector
    ///
    /// Returns ENDOFCHAIN for an empty document.
    pub fn allocate_mini_chain(&mut self, data: &[u8]) -> u32 {
        if data.is_empty() {
            return ENDOFCHAIN;
        }

        let count = data.len().div_ceil(self.mini_sector_size) as u32;
        let start = self.minifat.len() as u32;
        let end = start + count;
        self.minifat.extend(start + 1..end);
        self.minifat.push(ENDOFCHAIN);

        let offset = self.ministream_data.len();
        self.ministream_data
            .resize(offset + count as usize * self.mini_sector_size, 0);
        self.ministream_data[offset..offset + data.len()].copy_from_slice(data);

        start
    }

    /// Packed mini stream contents
    pub fn ministream_data(&self) -> &[u8] {
        &self.ministream_data
    }

    /// Mini stream size in bytes, as recorded on the root entry
    pub fn ministream_size(&self) -> u64 {
        self.ministream_data.len() as u64
    }

    /// Mini-FAT entries packed into sectors, padded with FREESECT
    pub fn generate_minifat_sectors(&self, sector_size: usize) -> Vec<Vec<u8>> {
        let entries_per_sector = sector_size / 4;
        self.minifat
            .chunks(entries_per_sector)
            .map(|entries| {
                let mut sector_data = vec![0xFFu8; sector_size];
                for (i, &value) in entries.iter().enumerate() {
                    sector_data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
                }
                sector_data
            })
            .collect()
    }

    /// Number of mini sectors allocated
    pub fn mini_sector_count(&self) -> u32 {
        self.minifat.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.minifat.is_empty()
    }

    /// Raw Mini-FAT entries
    pub fn minifat(&self) -> &[u32] {
        &self.minifat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_mini_chain() {
        let mut minifat = MiniFatBuilder::new(64);

        // 100 bytes is two mini sectors
        let start = minifat.allocate_mini_chain(&[0xAAu8; 100]);
        assert_eq!(start, 0);
        assert_eq!(minifat.mini_sector_count(), 2);
        assert_eq!(minifat.minifat(), &[1, ENDOFCHAIN]);
        assert_eq!(minifat.ministream_size(), 128);
        assert!(minifat.ministream_data()[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_mini_chain() {
        let mut minifat = MiniFatBuilder::new(64);
        assert_eq!(minifat.allocate_mini_chain(&[]), ENDOFCHAIN);
        assert!(minifat.is_empty());
        assert!(minifat.generate_minifat_sectors(512).is_empty());
    }

    #[test]
    fn test_consecutive_allocations() {
        let mut minifat = MiniFatBuilder::new(64);
        assert_eq!(minifat.allocate_mini_chain(&[1u8; 50]), 0);
        assert_eq!(minifat.allocate_mini_chain(&[2u8; 100]), 1);
        assert_eq!(minifat.minifat(), &[ENDOFCHAIN, 2, ENDOFCHAIN]);
        assert_eq!(minifat.ministream_data()[64], 2);
    }

    #[test]
    fn test_generate_minifat_sectors() {
        let mut minifat = MiniFatBuilder::new(64);
        for _ in 0..130 {
            minifat.allocate_mini_chain(&[0u8; 10]);
        }

        // 130 entries need two 128-entry sectors
        let sectors = minifat.generate_minifat_sectors(512);
        assert_eq!(sectors.len(), 2);
        assert_eq!(&sectors[1][0..4], &ENDOFCHAIN.to_le_bytes());
        assert!(sectors[1][8..].iter().all(|&b| b == 0xFF));
    }
}
