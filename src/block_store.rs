//! Block-level access to the backing medium.
//!
//! Block `n` lives at byte offset `(n + 1) * sector_size`; the first sector's
//! worth of bytes belongs to the header. The backing reader is never written
//! to. Blocks written after open are kept in an in-memory overlay that shadows
//! the medium until the container is saved, which rewrites the whole file.

use crate::error::{CfbError, Result};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Fixed-size block view over a `Read + Seek` medium
#[derive(Debug)]
pub struct BlockStore<R> {
    /// File handle or in-memory cursor
    reader: R,
    /// Sector size in bytes (512 or 4096)
    sector_size: usize,
    /// Number of blocks present on the medium
    disk_blocks: u32,
    /// Total blocks, including ones appended in memory
    block_count: u32,
    /// Blocks written since open
    overlay: HashMap<u32, Box<[u8]>>,
}

impl<R: Read + Seek> BlockStore<R> {
    /// Wrap a medium; every full or partial sector after the header is a block
    pub fn new(mut reader: R, sector_size: usize) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        let sectors = len.div_ceil(sector_size as u64);
        let disk_blocks = u32::try_from(sectors.saturating_sub(1)).map_err(|_| {
            CfbError::InvalidHeader(format!("File too large: {} bytes", len))
        })?;

        Ok(Self {
            reader,
            sector_size,
            disk_blocks,
            block_count: disk_blocks,
            overlay: HashMap::new(),
        })
    }

    /// Wrap a medium known to be empty, for a container built from scratch
    pub fn from_empty(reader: R, sector_size: usize) -> Self {
        Self {
            reader,
            sector_size,
            disk_blocks: 0,
            block_count: 0,
            overlay: HashMap::new(),
        }
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Number of addressable blocks
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Whether any block was written since open
    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Read one block
    pub fn read_block(&mut self, index: u32) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.sector_size];
        self.read_block_into(index, &mut buffer)?;
        Ok(buffer)
    }

    /// Read one block into `buffer`, which must be exactly one sector long
    pub fn read_block_into(&mut self, index: u32, buffer: &mut [u8]) -> Result<()> {
        if index >= self.block_count {
            return Err(CfbError::OutOfRange {
                index,
                count: self.block_count,
            });
        }
        debug_assert_eq!(buffer.len(), self.sector_size);

        if let Some(block) = self.overlay.get(&index) {
            buffer.copy_from_slice(block);
            return Ok(());
        }
        // Appended and never written
        if index >= self.disk_blocks {
            buffer.fill(0);
            return Ok(());
        }

        let position = (index as u64 + 1) * self.sector_size as u64;
        self.reader.seek(SeekFrom::Start(position))?;

        // A truncated final sector reads as zero-padded
        let mut filled = 0;
        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buffer[filled..].fill(0);
        Ok(())
    }

    /// Overwrite an existing block or append the next one
    pub fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        if data.len() != self.sector_size {
            return Err(CfbError::InvalidWrite(format!(
                "Block data must be exactly {} bytes, got {}",
                self.sector_size,
                data.len()
            )));
        }
        if index > self.block_count {
            return Err(CfbError::InvalidWrite(format!(
                "Block {} would leave a gap after block count {}",
                index, self.block_count
            )));
        }
        if index == self.block_count {
            self.block_count += 1;
        }

        self.overlay.insert(index, data.into());
        Ok(())
    }

    /// Append a zero-filled block and return its index
    ///
    /// Nothing is buffered until the block is first written.
    pub fn append_zeroed(&mut self) -> Result<u32> {
        let index = self.block_count;
        self.block_count = index.checked_add(1).ok_or_else(|| {
            CfbError::InvalidWrite(format!("Block count cannot grow past {}", index))
        })?;
        Ok(index)
    }

    /// Number of blocks that came from the medium
    pub fn disk_block_count(&self) -> u32 {
        self.disk_blocks
    }

    /// Give the medium back
    pub fn into_inner(self) -> R {
        self.reader
    }
}
