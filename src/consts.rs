/// Magic bytes that should be at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the on-disk header structure, independent of sector size
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Default sector size for version 3 (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Default sector size for version 4 (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Mini sector size used by every writer we know of
pub const MINI_SECTOR_SIZE: usize = 64;

/// Streams strictly smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of FAT sector locations stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Maximum name length in UTF-16 code units, excluding the terminator
pub const MAX_NAME_LEN: usize = 31;

/// Name given to the root entry by Microsoft writers
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

// Sector IDs
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA; // -6
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

// Node colors of the sibling red-black tree
pub const COLOR_RED: u8 = 0;
pub const COLOR_BLACK: u8 = 1;

// Header field offsets
pub const HDR_CLSID: usize = 0x08;
pub const HDR_MINOR_VERSION: usize = 0x18;
pub const HDR_MAJOR_VERSION: usize = 0x1A;
pub const HDR_BYTE_ORDER: usize = 0x1C;
pub const HDR_SECTOR_SHIFT: usize = 0x1E;
pub const HDR_MINI_SECTOR_SHIFT: usize = 0x20;
pub const HDR_NUM_DIR_SECTORS: usize = 0x28;
pub const HDR_NUM_FAT_SECTORS: usize = 0x2C;
pub const HDR_FIRST_DIR_SECTOR: usize = 0x30;
pub const HDR_TRANSACTION: usize = 0x34;
pub const HDR_MINI_CUTOFF: usize = 0x38;
pub const HDR_FIRST_MINIFAT_SECTOR: usize = 0x3C;
pub const HDR_NUM_MINIFAT_SECTORS: usize = 0x40;
pub const HDR_FIRST_DIFAT_SECTOR: usize = 0x44;
pub const HDR_NUM_DIFAT_SECTORS: usize = 0x48;
pub const HDR_DIFAT: usize = 0x4C;

/// Minor version written into new headers
pub const MINOR_VERSION: u16 = 0x003E;

/// Little-endian byte order mark as stored in the header
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Returns true if `value` is one of the reserved sentinel sector IDs
#[inline]
pub fn is_special_sector(value: u32) -> bool {
    value > MAXREGSECT
}
