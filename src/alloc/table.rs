//! In-memory FAT / Mini-FAT.
//!
//! Both tables are arrays of next-pointers. They differ only in what their
//! indices address: regular blocks of the file, or 64-byte slots of the mini
//! stream. Capacity for newly allocated indices is the caller's concern.

use crate::consts::*;
use crate::error::{CfbError, Result};
use fixedbitset::FixedBitSet;

/// Which allocation table an index refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// The FAT, addressing regular blocks
    Regular,
    /// The Mini-FAT, addressing mini blocks inside the mini stream
    Mini,
}

/// Table of next-block pointers
#[derive(Debug, Clone)]
pub struct AllocationTable {
    kind: TableKind,
    entries: Vec<u32>,
    /// No free entry exists below this index
    free_hint: usize,
}

impl AllocationTable {
    /// Create an empty table
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            free_hint: 0,
        }
    }

    /// Create a table from entries read off disk
    pub fn from_entries(kind: TableKind, entries: Vec<u32>) -> Self {
        Self {
            kind,
            entries,
            free_hint: 0,
        }
    }

    /// Parse little-endian u32 entries from raw sector bytes
    pub fn from_bytes(kind: TableKind, data: &[u8]) -> Self {
        let entries = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_entries(kind, entries)
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of entries in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Next pointer stored for `index`
    pub fn get(&self, index: u32) -> Option<u32> {
        self.entries.get(index as usize).copied()
    }

    /// Overwrite the next pointer for `index`, growing the table if needed
    pub fn set(&mut self, index: u32, value: u32) {
        let idx = index as usize;
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, FREESECT);
        }
        self.entries[idx] = value;
        if value == FREESECT && idx < self.free_hint {
            self.free_hint = idx;
        }
    }

    /// Follow a chain from `start` to the end-of-chain marker
    ///
    /// An empty chain starts at `ENDOFCHAIN`. A chain that revisits a block,
    /// points outside the table, or runs into a free or reserved entry is
    /// reported as [`CfbError::CorruptChain`].
    pub fn chain_of(&self, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(chain);
        }

        let mut visited = FixedBitSet::with_capacity(self.entries.len());
        let mut current = start;
        loop {
            let idx = current as usize;
            if idx >= self.entries.len() {
                return Err(CfbError::chain(
                    current,
                    format!(
                        "{:?} index outside table of {} entries",
                        self.kind,
                        self.entries.len()
                    ),
                ));
            }
            if visited.put(idx) {
                return Err(CfbError::chain(current, "loop detected"));
            }
            chain.push(current);

            match self.entries[idx] {
                ENDOFCHAIN => return Ok(chain),
                FREESECT => {
                    return Err(CfbError::chain(current, "chain runs into a free block"));
                },
                next if is_special_sector(next) => {
                    return Err(CfbError::chain(
                        current,
                        format!("chain runs into reserved marker {:#010X}", next),
                    ));
                },
                next => current = next,
            }
        }
    }

    /// Take `count` free indices, lowest first, growing the table as needed
    fn take_free(&mut self, count: usize) -> Vec<u32> {
        let mut taken = Vec::with_capacity(count);
        let mut idx = self.free_hint;
        while taken.len() < count && idx < self.entries.len() {
            if self.entries[idx] == FREESECT {
                taken.push(idx as u32);
            }
            idx += 1;
        }
        while taken.len() < count {
            taken.push(self.entries.len() as u32);
            self.entries.push(FREESECT);
        }
        self.free_hint = idx.min(self.entries.len());
        taken
    }

    /// Link `blocks` in order, terminating with end-of-chain
    fn link(&mut self, blocks: &[u32]) {
        for pair in blocks.windows(2) {
            self.entries[pair[0] as usize] = pair[1];
        }
        if let Some(&last) = blocks.last() {
            self.entries[last as usize] = ENDOFCHAIN;
        }
    }

    /// Allocate a new chain of `count` blocks using first-fit
    ///
    /// Returns the start block, or `ENDOFCHAIN` for an empty request.
    pub fn allocate_chain(&mut self, count: usize) -> u32 {
        if count == 0 {
            return ENDOFCHAIN;
        }
        let blocks = self.take_free(count);
        self.link(&blocks);
        blocks[0]
    }

    /// Append `additional` blocks to the chain at `start`
    ///
    /// Returns the (possibly new) start of the chain.
    pub fn extend_chain(&mut self, start: u32, additional: usize) -> Result<u32> {
        if additional == 0 {
            return Ok(start);
        }
        let tail = self.chain_of(start)?.last().copied();
        let new_start = self.allocate_chain(additional);
        match tail {
            Some(tail) => {
                self.entries[tail as usize] = new_start;
                Ok(start)
            },
            None => Ok(new_start),
        }
    }

    /// Keep the first `keep` blocks of a chain and free the rest
    ///
    /// Returns the start of the shortened chain (`ENDOFCHAIN` when empty).
    pub fn truncate_chain(&mut self, start: u32, keep: usize) -> Result<u32> {
        let chain = self.chain_of(start)?;
        if keep >= chain.len() {
            return Ok(start);
        }
        for &block in &chain[keep..] {
            self.set(block, FREESECT);
        }
        if keep == 0 {
            return Ok(ENDOFCHAIN);
        }
        self.entries[chain[keep - 1] as usize] = ENDOFCHAIN;
        Ok(start)
    }

    /// Mark every block in a chain as free
    ///
    /// The chain is validated first, so a corrupt chain frees nothing.
    pub fn free_chain(&mut self, start: u32) -> Result<usize> {
        let chain = self.chain_of(start)?;
        for &block in &chain {
            self.set(block, FREESECT);
        }
        Ok(chain.len())
    }

    /// Number of free entries
    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e == FREESECT).count()
    }

    /// Highest index in use plus one
    pub fn used_len(&self) -> usize {
        self.entries
            .iter()
            .rposition(|&e| e != FREESECT)
            .map_or(0, |i| i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_chain() {
        let mut fat = AllocationTable::new(TableKind::Regular);
        let start = fat.allocate_chain(2);
        assert_eq!(start, 0);
        assert_eq!(fat.entries(), &[1, ENDOFCHAIN]);
        assert_eq!(fat.chain_of(start).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_empty_chain() {
        let mut fat = AllocationTable::new(TableKind::Regular);
        assert_eq!(fat.allocate_chain(0), ENDOFCHAIN);
        assert!(fat.chain_of(ENDOFCHAIN).unwrap().is_empty());
        assert!(fat.is_empty());
    }

    #[test]
    fn test_first_fit_reuses_freed_blocks() {
        let mut fat = AllocationTable::new(TableKind::Regular);
        let a = fat.allocate_chain(3);
        let b = fat.allocate_chain(2);
        assert_eq!(fat.free_chain(a).unwrap(), 3);
        assert_eq!(fat.free_count(), 3);

        let c = fat.allocate_chain(4);
        assert_eq!(fat.chain_of(c).unwrap(), vec![0, 1, 2, 5]);
        assert_eq!(fat.chain_of(b).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_loop_detected() {
        let fat = AllocationTable::from_entries(TableKind::Regular, vec![1, 2, 0]);
        assert!(matches!(
            fat.chain_of(0),
            Err(CfbError::CorruptChain { block: 0, .. })
        ));
    }

    #[test]
    fn test_out_of_range_pointer() {
        let fat = AllocationTable::from_entries(TableKind::Mini, vec![1, 99]);
        assert!(matches!(
            fat.chain_of(0),
            Err(CfbError::CorruptChain { block: 99, .. })
        ));
    }

    #[test]
    fn test_chain_into_free_or_marker() {
        let fat = AllocationTable::from_entries(TableKind::Regular, vec![1, FREESECT]);
        assert!(fat.chain_of(0).is_err());
        let fat = AllocationTable::from_entries(TableKind::Regular, vec![FATSECT]);
        assert!(fat.chain_of(0).is_err());
    }

    #[test]
    fn test_extend_and_truncate() {
        let mut fat = AllocationTable::new(TableKind::Regular);
        let start = fat.extend_chain(ENDOFCHAIN, 2).unwrap();
        assert_eq!(start, 0);
        let other = fat.allocate_chain(1);
        let start = fat.extend_chain(start, 2).unwrap();
        assert_eq!(fat.chain_of(start).unwrap(), vec![0, 1, 3, 4]);

        let start = fat.truncate_chain(start, 1).unwrap();
        assert_eq!(fat.chain_of(start).unwrap(), vec![0]);
        assert_eq!(fat.chain_of(other).unwrap(), vec![2]);
        assert_eq!(fat.used_len(), 3);

        assert_eq!(fat.truncate_chain(start, 0).unwrap(), ENDOFCHAIN);
        assert_eq!(fat.get(0), Some(FREESECT));
    }

    #[test]
    fn test_from_bytes() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&ENDOFCHAIN.to_le_bytes());
        let fat = AllocationTable::from_bytes(TableKind::Regular, &data);
        assert_eq!(fat.chain_of(0).unwrap(), vec![0, 1]);
    }
}
