use crate::config::SectorSize;
use crate::consts::*;
use crate::error::{CfbError, Result};
use chrono::{DateTime, Utc};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes};

/// Raw directory entry structure (128 bytes)
///
/// This represents the on-disk format of a directory entry.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable)]
#[repr(C)]
struct RawProperty {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    /// Left sibling SID
    sid_left: U32<LE>,
    /// Right sibling SID
    sid_right: U32<LE>,
    /// Child SID
    sid_child: U32<LE>,
    /// CLSID (16 bytes)
    clsid: [u8; 16],
    /// State bits
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    /// Starting sector
    start_sector: U32<LE>,
    /// Stream size; only the low 32 bits are meaningful for version 3
    stream_size: U64<LE>,
}

/// Kind of directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// The single root storage, which also owns the mini stream
    Root,
    /// A storage (directory)
    Storage,
    /// A stream (document)
    Stream,
}

impl EntryType {
    /// Decode the on-disk type byte; empty and unsupported types are holes
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            STGTY_ROOT => Some(EntryType::Root),
            STGTY_STORAGE => Some(EntryType::Storage),
            STGTY_STREAM => Some(EntryType::Stream),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EntryType::Root => STGTY_ROOT,
            EntryType::Storage => STGTY_STORAGE,
            EntryType::Stream => STGTY_STREAM,
        }
    }

    /// Root and storages can hold children
    pub fn is_directory(self) -> bool {
        !matches!(self, EntryType::Stream)
    }
}

/// One directory entry ("property")
///
/// The sibling and child links are the raw on-disk values. They are only
/// meaningful right after parsing; the in-memory tree keeps its own links and
/// the writer recomputes these on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub entry_type: EntryType,
    pub color: u8,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    /// Creation time as a FILETIME (100ns ticks since 1601)
    pub created: u64,
    /// Modification time as a FILETIME
    pub modified: u64,
    pub start_block: u32,
    pub size: u64,
}

impl Property {
    fn with_type(name: String, entry_type: EntryType) -> Self {
        Self {
            name,
            entry_type,
            color: COLOR_BLACK,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_block: ENDOFCHAIN,
            size: 0,
        }
    }

    /// Create a new root entry
    pub fn root() -> Self {
        Self::with_type(ROOT_ENTRY_NAME.to_string(), EntryType::Root)
    }

    /// Create a new, empty stream entry
    pub fn stream(name: impl Into<String>) -> Self {
        Self::with_type(name.into(), EntryType::Stream)
    }

    /// Create a new storage entry
    pub fn storage(name: impl Into<String>) -> Self {
        Self::with_type(name.into(), EntryType::Storage)
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type.is_directory()
    }

    /// Decode one 128-byte slot; `None` means the slot is a hole
    pub fn parse(data: &[u8], sector_size: SectorSize) -> Result<Option<Self>> {
        let raw = RawProperty::read_from_bytes(data).map_err(|_| {
            CfbError::CorruptDirectory("Failed to parse directory entry".to_string())
        })?;

        let Some(entry_type) = EntryType::from_u8(raw.entry_type) else {
            return Ok(None);
        };

        // Decode name from UTF-16LE
        let name_len = raw.name_len.get() as usize;
        let name_bytes = &raw.name[0..name_len.saturating_sub(2).min(64)];
        let name = decode_utf16le(name_bytes);

        // Handle size based on sector size (512-byte sectors only use low 32 bits)
        let size = match sector_size {
            SectorSize::V3 => raw.stream_size.get() & 0xFFFFFFFF,
            SectorSize::V4 => raw.stream_size.get(),
        };

        Ok(Some(Self {
            name,
            entry_type,
            color: raw.node_color,
            left: raw.sid_left.get(),
            right: raw.sid_right.get(),
            child: raw.sid_child.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            created: raw.creation_time.get(),
            modified: raw.modified_time.get(),
            start_block: raw.start_sector.get(),
            size,
        }))
    }

    /// Encode this entry into its 128-byte on-disk form
    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let (name, name_len) = encode_name_utf16le(&self.name);
        let raw = RawProperty {
            name,
            name_len: U16::new(name_len),
            entry_type: self.entry_type.to_u8(),
            node_color: self.color,
            sid_left: U32::new(self.left),
            sid_right: U32::new(self.right),
            sid_child: U32::new(self.child),
            clsid: self.clsid,
            state_bits: U32::new(self.state_bits),
            creation_time: U64::new(self.created),
            modified_time: U64::new(self.modified),
            start_sector: U32::new(self.start_block),
            stream_size: U64::new(self.size),
        };

        let mut out = [0u8; DIRENTRY_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Creation time, if one was recorded
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.created)
    }

    /// Modification time, if one was recorded
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified)
    }
}

/// Bytes of an empty (unused) directory slot
pub fn empty_slot() -> [u8; DIRENTRY_SIZE] {
    let mut out = [0u8; DIRENTRY_SIZE];
    out[68..80].fill(0xFF);
    out
}

/// Check that a name can be stored in a directory entry
pub fn validate_name(name: &str) -> Result<()> {
    let units = name.encode_utf16().count();
    if units == 0 || units > MAX_NAME_LEN {
        return Err(CfbError::InvalidName(name.to_string()));
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | ':' | '!')) {
        return Err(CfbError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Decode UTF-16LE bytes to String
fn decode_utf16le(bytes: &[u8]) -> String {
    let utf16_chars: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    // Decode UTF-16 to String, replacing invalid sequences
    String::from_utf16_lossy(&utf16_chars)
        .trim_end_matches('\0')
        .to_string()
}

/// Encode a name to UTF-16LE, padded to 64 bytes, plus its byte length
/// including the terminator
fn encode_name_utf16le(name: &str) -> ([u8; 64], u16) {
    let mut result = [0u8; 64];
    let utf16: Vec<u16> = name.encode_utf16().take(MAX_NAME_LEN).collect();
    if utf16.is_empty() {
        return (result, 0);
    }

    for (i, &ch) in utf16.iter().enumerate() {
        result[i * 2..i * 2 + 2].copy_from_slice(&ch.to_le_bytes());
    }

    (result, ((utf16.len() + 1) * 2) as u16)
}

/// Ticks between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a FILETIME to a UTC timestamp; zero means "not set"
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = filetime as i128 - FILETIME_UNIX_EPOCH as i128;
    let secs = ticks.div_euclid(10_000_000) as i64;
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC timestamp to a FILETIME; times before 1601 clamp to zero
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let ticks = time.timestamp() as i128 * 10_000_000
        + (time.timestamp_subsec_nanos() / 100) as i128
        + FILETIME_UNIX_EPOCH as i128;
    ticks.clamp(0, u64::MAX as i128) as u64
}
