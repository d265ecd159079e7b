//! Options controlling how containers are created, opened and saved.

use crate::consts::{SECTOR_SIZE_V3, SECTOR_SIZE_V4};
use serde::{Deserialize, Serialize};

/// Sector size of a container, tied to the major version in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectorSize {
    /// Version 3 container, 512-byte sectors
    #[default]
    V3,
    /// Version 4 container, 4096-byte sectors
    V4,
}

impl SectorSize {
    /// Sector size in bytes
    pub fn bytes(self) -> usize {
        match self {
            SectorSize::V3 => SECTOR_SIZE_V3,
            SectorSize::V4 => SECTOR_SIZE_V4,
        }
    }

    /// The `log2` of the sector size as stored in the header
    pub fn shift(self) -> u16 {
        match self {
            SectorSize::V3 => 9,
            SectorSize::V4 => 12,
        }
    }

    /// Major version number stored in the header
    pub fn major_version(self) -> u16 {
        match self {
            SectorSize::V3 => 3,
            SectorSize::V4 => 4,
        }
    }

    /// Map a byte count back to a sector size, if it is a supported one
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            SECTOR_SIZE_V3 => Some(SectorSize::V3),
            SECTOR_SIZE_V4 => Some(SectorSize::V4),
            _ => None,
        }
    }
}

/// Ordering applied to siblings when the directory tree is serialized
///
/// Reading never depends on this: any order found on disk is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingOrder {
    /// Shorter names first, then case-insensitive comparison. This is what
    /// Microsoft Office and POI produce, so output matches them bit for bit.
    #[default]
    Reference,
    /// Plain case-insensitive comparison
    Lexicographic,
}

/// Options for creating or opening a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Sector size for new containers; ignored on open, where the header wins
    pub sector_size: SectorSize,
    /// Sibling ordering used when saving
    pub sibling_order: SiblingOrder,
    /// Fail on the first structural problem instead of loading what survives
    pub strict: bool,
}

impl ContainerOptions {
    /// Options for a 4096-byte sector container
    pub fn v4() -> Self {
        Self {
            sector_size: SectorSize::V4,
            ..Self::default()
        }
    }
}

/// Options for saving a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Save even though corruption was recorded while opening
    pub allow_corrupt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_size_geometry() {
        assert_eq!(SectorSize::V3.bytes(), 512);
        assert_eq!(1usize << SectorSize::V3.shift(), 512);
        assert_eq!(SectorSize::V4.bytes(), 4096);
        assert_eq!(1usize << SectorSize::V4.shift(), 4096);
        assert_eq!(SectorSize::from_bytes(4096), Some(SectorSize::V4));
        assert_eq!(SectorSize::from_bytes(1024), None);
    }

    #[test]
    fn test_options_from_json() {
        let opts: ContainerOptions =
            serde_json::from_str(r#"{"sector_size":"v4","strict":true}"#).unwrap();
        assert_eq!(opts.sector_size, SectorSize::V4);
        assert_eq!(opts.sibling_order, SiblingOrder::Reference);
        assert!(opts.strict);
    }
}
