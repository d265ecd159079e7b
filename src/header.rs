//! The 512-byte compound file header.
//!
//! The header sits at offset 0 and always occupies the first sector's worth of
//! bytes, so for 4096-byte sector containers it is followed by 3584 bytes of
//! zero padding before block 0 starts.

use crate::config::SectorSize;
use crate::consts::*;
use crate::error::{CfbError, Result};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// Raw header structure (512 bytes, little-endian)
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 8],
    clsid: [u8; 16],
    minor_version: U16<LE>,
    major_version: U16<LE>,
    byte_order: U16<LE>,
    sector_shift: U16<LE>,
    mini_sector_shift: U16<LE>,
    reserved: [u8; 6],
    /// Directory sector count (csectDir); always 0 for version 3
    num_dir_sectors: U32<LE>,
    num_fat_sectors: U32<LE>,
    first_dir_sector: U32<LE>,
    transaction_signature: U32<LE>,
    mini_stream_cutoff: U32<LE>,
    first_minifat_sector: U32<LE>,
    num_minifat_sectors: U32<LE>,
    first_difat_sector: U32<LE>,
    num_difat_sectors: U32<LE>,
    /// First 109 FAT sector locations
    difat: [U32<LE>; HEADER_DIFAT_ENTRIES],
}

/// Parsed compound file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header CLSID, zero in practically every file
    pub clsid: [u8; 16],
    pub minor_version: u16,
    pub sector_size: SectorSize,
    /// `log2` of the mini sector size
    pub mini_sector_shift: u16,
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub transaction_signature: u32,
    pub mini_stream_cutoff: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// The 109 inline DIFAT slots, including unused ones
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Header for an empty container with the given sector size
    pub fn new(sector_size: SectorSize) -> Self {
        Self {
            clsid: [0; 16],
            minor_version: MINOR_VERSION,
            sector_size,
            mini_sector_shift: MINI_SECTOR_SIZE.trailing_zeros() as u16,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    /// Parse and validate a header from the first 512 bytes of a file
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || &data[0..8] != MAGIC {
            return Err(CfbError::NotCompoundFile);
        }

        let raw = RawHeader::read_from_bytes(&data[..HEADER_SIZE])
            .map_err(|_| CfbError::InvalidHeader("Failed to read header".to_string()))?;

        if raw.byte_order.get() != BYTE_ORDER_MARK {
            return Err(CfbError::InvalidHeader(format!(
                "Invalid byte order mark {:#06X}",
                raw.byte_order.get()
            )));
        }

        let sector_shift = raw.sector_shift.get();
        let sector_size = match sector_shift {
            9 => SectorSize::V3,
            12 => SectorSize::V4,
            other => {
                return Err(CfbError::InvalidHeader(format!(
                    "Unsupported sector shift {}",
                    other
                )));
            },
        };

        // Some writers leave the major version at 3 for 4096-byte files, but a
        // version 4 header with 512-byte sectors is never valid.
        let major = raw.major_version.get();
        if major == 4 && sector_size != SectorSize::V4 {
            return Err(CfbError::InvalidHeader("Sector size mismatch".to_string()));
        }

        let mini_sector_shift = raw.mini_sector_shift.get();
        if mini_sector_shift == 0 || mini_sector_shift >= sector_shift {
            return Err(CfbError::InvalidHeader(format!(
                "Invalid mini sector shift {}",
                mini_sector_shift
            )));
        }

        let mini_stream_cutoff = raw.mini_stream_cutoff.get();
        if mini_stream_cutoff == 0 {
            return Err(CfbError::InvalidHeader(
                "Mini stream cutoff must be non-zero".to_string(),
            ));
        }

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (slot, raw_value) in difat.iter_mut().zip(raw.difat.iter()) {
            *slot = raw_value.get();
        }

        Ok(Self {
            clsid: raw.clsid,
            minor_version: raw.minor_version.get(),
            sector_size,
            mini_sector_shift,
            num_dir_sectors: raw.num_dir_sectors.get(),
            num_fat_sectors: raw.num_fat_sectors.get(),
            first_dir_sector: raw.first_dir_sector.get(),
            transaction_signature: raw.transaction_signature.get(),
            mini_stream_cutoff,
            first_minifat_sector: raw.first_minifat_sector.get(),
            num_minifat_sectors: raw.num_minifat_sectors.get(),
            first_difat_sector: raw.first_difat_sector.get(),
            num_difat_sectors: raw.num_difat_sectors.get(),
            difat,
        })
    }

    /// Mini sector size in bytes
    pub fn mini_sector_size(&self) -> usize {
        1usize << self.mini_sector_shift
    }

    /// FAT sector locations stored inline, in order
    ///
    /// Stops at the first unused slot or after `num_fat_sectors` entries,
    /// whichever comes first.
    pub fn inline_fat_sectors(&self) -> impl Iterator<Item = u32> + '_ {
        self.difat
            .iter()
            .copied()
            .take(self.num_fat_sectors as usize)
            .take_while(|&s| s != FREESECT && s != ENDOFCHAIN)
    }

    /// Store FAT sector locations; only the first 109 fit in the header
    pub fn set_fat_sectors(&mut self, sectors: &[u32]) {
        self.num_fat_sectors = sectors.len() as u32;
        self.difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (slot, &sector) in self.difat.iter_mut().zip(sectors.iter()) {
            *slot = sector;
        }
    }

    /// Serialize the header into a buffer of one full sector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut difat = [U32::<LE>::new(FREESECT); HEADER_DIFAT_ENTRIES];
        for (slot, &value) in difat.iter_mut().zip(self.difat.iter()) {
            *slot = U32::new(value);
        }

        // csectDir must be 0 for version 3 files
        let num_dir_sectors = match self.sector_size {
            SectorSize::V3 => 0,
            SectorSize::V4 => self.num_dir_sectors,
        };

        let raw = RawHeader {
            magic: *MAGIC,
            clsid: self.clsid,
            minor_version: U16::new(self.minor_version),
            major_version: U16::new(self.sector_size.major_version()),
            byte_order: U16::new(BYTE_ORDER_MARK),
            sector_shift: U16::new(self.sector_size.shift()),
            mini_sector_shift: U16::new(self.mini_sector_shift),
            reserved: [0; 6],
            num_dir_sectors: U32::new(num_dir_sectors),
            num_fat_sectors: U32::new(self.num_fat_sectors),
            first_dir_sector: U32::new(self.first_dir_sector),
            transaction_signature: U32::new(self.transaction_signature),
            mini_stream_cutoff: U32::new(self.mini_stream_cutoff),
            first_minifat_sector: U32::new(self.first_minifat_sector),
            num_minifat_sectors: U32::new(self.num_minifat_sectors),
            first_difat_sector: U32::new(self.first_difat_sector),
            num_difat_sectors: U32::new(self.num_difat_sectors),
            difat,
        };

        let mut block = vec![0u8; self.sector_size.bytes()];
        block[..HEADER_SIZE].copy_from_slice(raw.as_bytes());
        block
    }
}

/// Check if data starts with the compound file signature
///
/// Only the first 8 bytes are inspected, so a truncated file still counts.
/// [`CompoundFile::open`](crate::CompoundFile::open) does the full validation.
pub fn is_compound_file(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_generation() {
        let mut header = Header::new(SectorSize::V3);
        header.first_dir_sector = 10;
        header.set_fat_sectors(&[1, 2, 3]);

        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(&bytes[HDR_BYTE_ORDER..HDR_BYTE_ORDER + 2], &0xFFFEu16.to_le_bytes());
        assert_eq!(&bytes[HDR_NUM_FAT_SECTORS..HDR_NUM_FAT_SECTORS + 4], &3u32.to_le_bytes());
        assert_eq!(&bytes[HDR_DIFAT..HDR_DIFAT + 4], &1u32.to_le_bytes());
        assert_eq!(
            &bytes[HDR_DIFAT + 3 * 4..HDR_DIFAT + 4 * 4],
            &FREESECT.to_le_bytes()
        );
    }

    #[test]
    fn test_sector_size_512() {
        let bytes = Header::new(SectorSize::V3).to_bytes();

        assert_eq!(&bytes[HDR_MAJOR_VERSION..HDR_MAJOR_VERSION + 2], &3u16.to_le_bytes());
        assert_eq!(&bytes[HDR_SECTOR_SHIFT..HDR_SECTOR_SHIFT + 2], &9u16.to_le_bytes());
        assert_eq!(
            &bytes[HDR_MINI_SECTOR_SHIFT..HDR_MINI_SECTOR_SHIFT + 2],
            &6u16.to_le_bytes()
        );
        assert_eq!(&bytes[HDR_MINI_CUTOFF..HDR_MINI_CUTOFF + 4], &4096u32.to_le_bytes());
    }

    #[test]
    fn test_sector_size_4096() {
        let mut header = Header::new(SectorSize::V4);
        header.num_dir_sectors = 2;
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), 4096);
        assert_eq!(&bytes[HDR_MAJOR_VERSION..HDR_MAJOR_VERSION + 2], &4u16.to_le_bytes());
        assert_eq!(&bytes[HDR_SECTOR_SHIFT..HDR_SECTOR_SHIFT + 2], &12u16.to_le_bytes());
        assert_eq!(&bytes[HDR_NUM_DIR_SECTORS..HDR_NUM_DIR_SECTORS + 4], &2u32.to_le_bytes());
        assert!(bytes[HEADER_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_roundtrip() {
        let mut header = Header::new(SectorSize::V3);
        header.first_dir_sector = 7;
        header.first_minifat_sector = 8;
        header.num_minifat_sectors = 1;
        header.set_fat_sectors(&[9]);

        let parsed = Header::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.inline_fat_sectors().collect::<Vec<_>>(), vec![9]);
        assert_eq!(parsed.mini_sector_size(), 64);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = Header::new(SectorSize::V3).to_bytes();
        bytes[0] = 0;
        assert!(matches!(Header::parse(&bytes), Err(CfbError::NotCompoundFile)));
        assert!(matches!(Header::parse(&[0u8; 10]), Err(CfbError::NotCompoundFile)));
    }

    #[test]
    fn test_parse_rejects_bad_geometry() {
        let mut bytes = Header::new(SectorSize::V3).to_bytes();
        bytes[HDR_SECTOR_SHIFT..HDR_SECTOR_SHIFT + 2].copy_from_slice(&10u16.to_le_bytes());
        assert!(matches!(Header::parse(&bytes), Err(CfbError::InvalidHeader(_))));

        let mut bytes = Header::new(SectorSize::V3).to_bytes();
        bytes[HDR_MAJOR_VERSION..HDR_MAJOR_VERSION + 2].copy_from_slice(&4u16.to_le_bytes());
        assert!(matches!(Header::parse(&bytes), Err(CfbError::InvalidHeader(_))));

        let mut bytes = Header::new(SectorSize::V3).to_bytes();
        bytes[HDR_BYTE_ORDER..HDR_BYTE_ORDER + 2].copy_from_slice(&0xFEFFu16.to_le_bytes());
        assert!(matches!(Header::parse(&bytes), Err(CfbError::InvalidHeader(_))));
    }

    #[test]
    fn test_is_compound_file() {
        let data = Header::new(SectorSize::V3).to_bytes();
        assert!(is_compound_file(&data));
        assert!(is_compound_file(&data[..8]));
        assert!(!is_compound_file(&data[..7]));
        assert!(!is_compound_file(b"PK\x03\x04 not a compound file"));
    }
}
