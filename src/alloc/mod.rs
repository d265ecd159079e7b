//! Allocation table management: FAT, Mini-FAT and DIFAT.
//!
//! Chains of blocks are singly linked through the tables. The [`Allocator`]
//! owns both tables and exposes one interface parameterized by
//! [`TableKind`], so stream code never needs to know which one it talks to.

/// DIFAT walking for large containers
mod difat;

/// FAT / Mini-FAT table
mod table;

pub use difat::{FatLocations, locate_fat_sectors};
pub use table::{AllocationTable, TableKind};

use crate::block_store::BlockStore;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::header::Header;
use fixedbitset::FixedBitSet;
use std::io::{Read, Seek};

/// Guards against a block being claimed by two infrastructure chains
///
/// Every FAT, DIFAT, Mini-FAT and directory block is claimed once while a
/// container is loaded; claiming the same block twice means the chains
/// overlap or loop.
#[derive(Debug)]
pub struct ChainLoopDetector {
    claimed: FixedBitSet,
}

impl ChainLoopDetector {
    pub fn new(block_count: u32) -> Self {
        Self {
            claimed: FixedBitSet::with_capacity(block_count as usize),
        }
    }

    /// Claim a block, failing if it was claimed before
    ///
    /// Blocks beyond the file are not tracked; reading them fails anyway.
    pub fn claim(&mut self, block: u32) -> Result<()> {
        let idx = block as usize;
        if idx >= self.claimed.len() {
            return Ok(());
        }
        if self.claimed.put(idx) {
            return Err(CfbError::chain(
                block,
                "block was already claimed but was just requested again",
            ));
        }
        Ok(())
    }

    /// Claim every block of a chain
    pub fn claim_all(&mut self, chain: &[u32]) -> Result<()> {
        chain.iter().try_for_each(|&b| self.claim(b))
    }
}

/// Both allocation tables of an open container
#[derive(Debug, Clone)]
pub struct Allocator {
    pub fat: AllocationTable,
    pub mini_fat: AllocationTable,
}

impl Allocator {
    /// Tables for an empty container
    pub fn new() -> Self {
        Self {
            fat: AllocationTable::new(TableKind::Regular),
            mini_fat: AllocationTable::new(TableKind::Mini),
        }
    }

    pub fn table(&self, kind: TableKind) -> &AllocationTable {
        match kind {
            TableKind::Regular => &self.fat,
            TableKind::Mini => &self.mini_fat,
        }
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut AllocationTable {
        match kind {
            TableKind::Regular => &mut self.fat,
            TableKind::Mini => &mut self.mini_fat,
        }
    }

    /// Ordered blocks of the chain starting at `start`
    pub fn chain_of(&self, start: u32, kind: TableKind) -> Result<Vec<u32>> {
        self.table(kind).chain_of(start)
    }

    /// Allocate a chain of `count` blocks, reusing free entries first
    pub fn allocate_chain(&mut self, count: usize, kind: TableKind) -> u32 {
        self.table_mut(kind).allocate_chain(count)
    }

    /// Mark every block of a chain free
    pub fn free_chain(&mut self, start: u32, kind: TableKind) -> Result<usize> {
        self.table_mut(kind).free_chain(start)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the full contents of a regular chain
pub fn read_regular_chain<R: Read + Seek>(
    store: &mut BlockStore<R>,
    chain: &[u32],
) -> Result<Vec<u8>> {
    let sector_size = store.sector_size();
    let mut data = vec![0u8; chain.len() * sector_size];
    for (&block, buffer) in chain.iter().zip(data.chunks_exact_mut(sector_size)) {
        store
            .read_block_into(block, buffer)
            .map_err(|e| match e {
                CfbError::OutOfRange { .. } => {
                    CfbError::chain(block, "points past the end of the file")
                },
                other => other,
            })?;
    }
    Ok(data)
}

/// Load the FAT of an existing container
pub fn load_fat<R: Read + Seek>(
    header: &Header,
    store: &mut BlockStore<R>,
    detector: &mut ChainLoopDetector,
) -> Result<(AllocationTable, FatLocations)> {
    let locations = locate_fat_sectors(header, store, detector)?;
    detector.claim_all(&locations.fat_sectors)?;
    let data = read_regular_chain(store, &locations.fat_sectors)?;
    Ok((
        AllocationTable::from_bytes(TableKind::Regular, &data),
        locations,
    ))
}

/// Load the Mini-FAT, which is stored as a regular chain
pub fn load_mini_fat<R: Read + Seek>(
    header: &Header,
    fat: &AllocationTable,
    store: &mut BlockStore<R>,
    detector: &mut ChainLoopDetector,
) -> Result<AllocationTable> {
    if header.num_minifat_sectors == 0 || header.first_minifat_sector == ENDOFCHAIN {
        return Ok(AllocationTable::new(TableKind::Mini));
    }
    let chain = fat.chain_of(header.first_minifat_sector)?;
    detector.claim_all(&chain)?;
    let data = read_regular_chain(store, &chain)?;
    Ok(AllocationTable::from_bytes(TableKind::Mini, &data))
}
