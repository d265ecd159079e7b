//! DIFAT walking: locating every FAT sector of an existing container.
//!
//! The header lists the first 109 FAT sectors. Beyond that, each DIFAT sector
//! holds `sector_size / 4 - 1` further FAT sector locations followed by the
//! location of the next DIFAT sector.

use super::ChainLoopDetector;
use crate::block_store::BlockStore;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::header::Header;
use std::io::{Read, Seek};
use zerocopy::{FromBytes, LE, U32};

/// Result of walking the header and DIFAT chain
#[derive(Debug, Clone, Default)]
pub struct FatLocations {
    /// FAT sector locations, in table order
    pub fat_sectors: Vec<u32>,
    /// DIFAT sector locations, in chain order
    pub difat_sectors: Vec<u32>,
}

/// Collect FAT sector locations from the header and the DIFAT chain
pub fn locate_fat_sectors<R: Read + Seek>(
    header: &Header,
    store: &mut BlockStore<R>,
    detector: &mut ChainLoopDetector,
) -> Result<FatLocations> {
    let mut locations = FatLocations {
        fat_sectors: header.inline_fat_sectors().collect(),
        difat_sectors: Vec::new(),
    };

    let ids_per_sector = store.sector_size() / 4 - 1;
    let mut difat_sector = header.first_difat_sector;

    for _ in 0..header.num_difat_sectors {
        if difat_sector == ENDOFCHAIN || difat_sector == FREESECT {
            break;
        }
        detector.claim(difat_sector)?;
        let data = store.read_block(difat_sector)?;
        locations.difat_sectors.push(difat_sector);

        for chunk in data.chunks_exact(4).take(ids_per_sector) {
            let sector = U32::<LE>::read_from_bytes(chunk)
                .map(|v| v.get())
                .unwrap_or(FREESECT);
            if sector == FREESECT || sector == ENDOFCHAIN {
                break;
            }
            locations.fat_sectors.push(sector);
        }

        let next_offset = ids_per_sector * 4;
        difat_sector = U32::<LE>::read_from_bytes(&data[next_offset..next_offset + 4])
            .map(|v| v.get())
            .unwrap_or(ENDOFCHAIN);
    }

    if locations.fat_sectors.len() < header.num_fat_sectors as usize {
        return Err(CfbError::InvalidHeader(format!(
            "Header declares {} FAT sectors but only {} could be located",
            header.num_fat_sectors,
            locations.fat_sectors.len()
        )));
    }
    locations
        .fat_sectors
        .truncate(header.num_fat_sectors as usize);

    Ok(locations)
}
