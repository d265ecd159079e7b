//! Layout and output of a complete container

use super::difat::{DifatBuilder, difat_sectors_needed};
use super::directory::DirectoryBuilder;
use super::fat::FatBuilder;
use super::minifat::MiniFatBuilder;
use crate::config::{SectorSize, SiblingOrder};
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::header::Header;
use crate::property::{EntryType, Property};
use std::io::Write;

/// One directory entry of a flattened tree, ready to be laid out
///
/// Entry 0 must be the root. `children` holds indices into the same slice.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    pub property: Property,
    /// Document contents; empty for directories
    pub data: Vec<u8>,
    pub children: Vec<usize>,
}

impl WriteEntry {
    pub fn new(property: Property) -> Self {
        Self {
            property,
            data: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Writes a flattened tree as a fresh compound file
///
/// Block layout, in order after the header:
/// 1. Mini stream
/// 2. Mini-FAT
/// 3. Directory
/// 4. Documents at or above the cutoff
/// 5. DIFAT
/// 6. FAT
///
/// The output is a pure function of the entries and settings, so writing an
/// unchanged container twice produces identical bytes.
#[derive(Debug)]
pub struct ContainerWriter {
    sector_size: SectorSize,
    mini_stream_cutoff: u32,
    sibling_order: SiblingOrder,
    clsid: [u8; 16],
}

impl ContainerWriter {
    pub fn new(sector_size: SectorSize, mini_stream_cutoff: u32, sibling_order: SiblingOrder) -> Self {
        Self {
            sector_size,
            mini_stream_cutoff,
            sibling_order,
            clsid: [0; 16],
        }
    }

    /// Class ID recorded in the header
    pub fn set_clsid(&mut self, clsid: [u8; 16]) {
        self.clsid = clsid;
    }

    /// Lay out `entries` and write the whole container to `writer`
    pub fn write<W: Write>(&mut self, entries: &[WriteEntry], writer: &mut W) -> Result<()> {
        self.check_entries(entries)?;
        let sector_size = self.sector_size.bytes();
        let cutoff = self.mini_stream_cutoff as usize;

        let mut fat = FatBuilder::new(sector_size);
        let mut minifat = MiniFatBuilder::new(MINI_SECTOR_SIZE);
        let mut directory = DirectoryBuilder::new(entries, self.sibling_order);

        // Small documents are packed into the mini stream first
        for (index, entry) in entries.iter().enumerate() {
            let property = directory.property_mut(index);
            match entry.property.entry_type {
                EntryType::Stream if entry.data.len() < cutoff => {
                    property.start_block = minifat.allocate_mini_chain(&entry.data);
                },
                EntryType::Storage => {
                    property.start_block = 0;
                    property.size = 0;
                },
                _ => {},
            }
        }

        let ministream_start = fat.allocate_chain(minifat.ministream_data().len());
        let root = directory.property_mut(0);
        root.start_block = ministream_start;
        root.size = minifat.ministream_size();

        let minifat_sectors = minifat.generate_minifat_sectors(sector_size);
        let minifat_start = fat.allocate_chain(minifat_sectors.len() * sector_size);

        let dir_len = directory.stream_len(sector_size);
        let dir_start = fat.allocate_chain(dir_len);

        let mut large = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.property.entry_type == EntryType::Stream && entry.data.len() >= cutoff {
                directory.property_mut(index).start_block = fat.allocate_chain(entry.data.len());
                large.push(&entry.data);
            }
        }

        // FAT and DIFAT sizes depend on each other; settle both before reserving
        let entries_per_fat_sector = (sector_size / 4) as u32;
        let used = fat.total_sectors();
        let mut n_fat = 0u32;
        let mut n_difat = 0u32;
        loop {
            let new_n_fat = (used + n_fat + n_difat).div_ceil(entries_per_fat_sector);
            let new_n_difat = difat_sectors_needed(new_n_fat, sector_size);
            if new_n_fat == n_fat && new_n_difat == n_difat {
                break;
            }
            n_fat = new_n_fat;
            n_difat = new_n_difat;
        }

        let difat_start = fat.allocate_special(n_difat, DIFSECT);
        let fat_start = fat.allocate_special(n_fat, FATSECT);
        fat.validate()?;

        let fat_sector_ids: Vec<u32> = (fat_start..fat_start + n_fat).collect();
        let difat = DifatBuilder::new(sector_size, &fat_sector_ids);
        if difat.sector_count() != n_difat {
            return Err(CfbError::InternalInvariant(format!(
                "DIFAT needs {} sectors, {} reserved",
                difat.sector_count(),
                n_difat
            )));
        }

        let mut header = Header::new(self.sector_size);
        header.clsid = self.clsid;
        header.mini_stream_cutoff = self.mini_stream_cutoff;
        header.first_dir_sector = dir_start;
        header.num_dir_sectors = (dir_len / sector_size) as u32;
        header.first_minifat_sector = minifat_start;
        header.num_minifat_sectors = minifat_sectors.len() as u32;
        header.first_difat_sector = difat_start;
        header.num_difat_sectors = n_difat;
        header.set_fat_sectors(&fat_sector_ids);

        let mut out = SectorWriter::new(writer, sector_size);
        out.write_raw(&header.to_bytes())?;
        out.write_padded(minifat.ministream_data())?;
        for sector in &minifat_sectors {
            out.write_padded(sector)?;
        }
        out.write_padded(&directory.generate_directory_stream(sector_size))?;
        for data in large {
            out.write_padded(data)?;
        }
        for sector in difat.generate_difat_sectors(difat_start) {
            out.write_padded(&sector)?;
        }
        for sector in fat.generate_fat_sectors(n_fat) {
            out.write_padded(&sector)?;
        }

        if out.sectors_written != fat.total_sectors() as usize {
            return Err(CfbError::InternalInvariant(format!(
                "wrote {} blocks, FAT describes {}",
                out.sectors_written,
                fat.total_sectors()
            )));
        }

        tracing::trace!(
            blocks = fat.total_sectors(),
            fat_sectors = n_fat,
            difat_sectors = n_difat,
            mini_sectors = minifat.mini_sector_count(),
            "laid out container"
        );
        Ok(())
    }

    fn check_entries(&self, entries: &[WriteEntry]) -> Result<()> {
        match entries.first() {
            Some(root) if root.property.entry_type == EntryType::Root => {},
            _ => {
                return Err(CfbError::InternalInvariant(
                    "snapshot does not start with the root".to_string(),
                ));
            },
        }

        for entry in entries {
            if entry.property.entry_type == EntryType::Stream
                && entry.data.len() as u64 != entry.property.size
            {
                return Err(CfbError::InternalInvariant(format!(
                    "document {:?} holds {} bytes but records {}",
                    entry.property.name,
                    entry.data.len(),
                    entry.property.size
                )));
            }
            if let Some(&child) = entry.children.iter().find(|&&c| c == 0 || c >= entries.len()) {
                return Err(CfbError::InternalInvariant(format!(
                    "entry {:?} lists invalid child {}",
                    entry.property.name, child
                )));
            }
        }
        Ok(())
    }
}

/// Sequential output counted in whole sectors
struct SectorWriter<'a, W> {
    inner: &'a mut W,
    sector_size: usize,
    sectors_written: usize,
}

impl<'a, W: Write> SectorWriter<'a, W> {
    fn new(inner: &'a mut W, sector_size: usize) -> Self {
        Self {
            inner,
            sector_size,
            sectors_written: 0,
        }
    }

    /// Header block; not part of the FAT
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    fn write_padded(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.inner.write_all(data)?;
        let remainder = data.len() % self.sector_size;
        if remainder != 0 {
            self.inner.write_all(&vec![0u8; self.sector_size - remainder])?;
        }
        self.sectors_written += data.len().div_ceil(self.sector_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_with_stream(name: &str, data: Vec<u8>) -> Vec<WriteEntry> {
        let mut root = WriteEntry::new(Property::root());
        root.children.push(1);
        let mut stream = Property::stream(name);
        stream.size = data.len() as u64;
        let mut entry = WriteEntry::new(stream);
        entry.data = data;
        vec![root, entry]
    }

    fn write(entries: &[WriteEntry], sector_size: SectorSize) -> Result<Vec<u8>> {
        let mut writer = ContainerWriter::new(sector_size, MINI_STREAM_CUTOFF, SiblingOrder::Reference);
        let mut out = Vec::new();
        writer.write(entries, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_small_stream_layout() {
        let bytes = write(&root_with_stream("Small", vec![7u8; 100]), SectorSize::V3).unwrap();
        // Header, mini stream, Mini-FAT, directory, FAT
        assert_eq!(bytes.len(), 5 * 512);

        let header = Header::parse(&bytes[..512]).unwrap();
        assert_eq!(header.first_minifat_sector, 1);
        assert_eq!(header.num_minifat_sectors, 1);
        assert_eq!(header.first_dir_sector, 2);
        assert_eq!(header.num_fat_sectors, 1);
        assert_eq!(header.difat[0], 3);
        assert_eq!(&bytes[512..612], &[7u8; 100][..]);
    }

    #[test]
    fn test_large_stream_layout() {
        let bytes = write(&root_with_stream("Big", vec![1u8; 5000]), SectorSize::V3).unwrap();
        // Header, directory, 10 data blocks, FAT
        assert_eq!(bytes.len(), 13 * 512);

        let header = Header::parse(&bytes[..512]).unwrap();
        assert_eq!(header.first_minifat_sector, ENDOFCHAIN);
        assert_eq!(header.first_dir_sector, 0);
        assert_eq!(header.difat[0], 11);
    }

    #[test]
    fn test_v4_records_directory_sectors() {
        let bytes = write(&root_with_stream("Small", vec![1u8; 10]), SectorSize::V4).unwrap();
        assert_eq!(bytes.len() % 4096, 0);
        let header = Header::parse(&bytes[..512]).unwrap();
        assert_eq!(header.sector_size, SectorSize::V4);
        assert_eq!(header.num_dir_sectors, 1);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let mut entries = root_with_stream("Bad", vec![1u8; 10]);
        entries[1].property.size = 11;
        assert!(matches!(
            write(&entries, SectorSize::V3),
            Err(CfbError::InternalInvariant(_))
        ));
    }

    #[test]
    fn test_missing_root_is_rejected() {
        assert!(matches!(write(&[], SectorSize::V3), Err(CfbError::InternalInvariant(_))));
    }
}
