//! Random-access I/O over a document's block chain.
//!
//! A document is addressed either through the FAT (its blocks are blocks of
//! the file) or through the Mini-FAT (its blocks are 64-byte slots of the mini
//! stream, which is itself the root entry's regular chain). `Addressing`
//! captures both so the cursor code reads the same either way.
//!
//! Growing a mini document to the cutoff or beyond moves it to regular
//! blocks. Shrinking never moves it back; the writer re-partitions by size
//! when the container is saved.

use crate::alloc::TableKind;
use crate::config::SectorSize;
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::file::CompoundFile;
use crate::property::{EntryId, EntryType};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// How a cursor may touch its document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Resolved location of every block of one document
#[derive(Debug, Clone)]
enum Addressing {
    /// Blocks of the file itself
    Regular { blocks: Vec<u32> },
    /// Mini blocks, placed inside the mini stream whose regular chain is `container`
    Mini { blocks: Vec<u32>, container: Vec<u32> },
}

impl Addressing {
    fn block_count(&self) -> usize {
        match self {
            Addressing::Regular { blocks } | Addressing::Mini { blocks, .. } => blocks.len(),
        }
    }

    /// Regular block holding unit `unit`, and the unit's offset inside it
    fn locate(&self, unit: usize, sector_size: usize, mini_size: usize) -> Result<(u32, usize)> {
        match self {
            Addressing::Regular { blocks } => Ok((blocks[unit], 0)),
            Addressing::Mini { blocks, container } => {
                let byte = blocks[unit] as usize * mini_size;
                let block = container.get(byte / sector_size).copied().ok_or_else(|| {
                    CfbError::chain(blocks[unit], "mini block lies beyond the end of the mini stream")
                })?;
                Ok((block, byte % sector_size))
            },
        }
    }
}

impl<R: Read + Seek> CompoundFile<R> {
    /// Open a cursor over a document
    pub fn open_document(&mut self, id: EntryId, mode: OpenMode) -> Result<StreamCursor<'_, R>> {
        self.document(id)?;
        Ok(StreamCursor {
            file: self,
            id,
            mode,
            position: 0,
        })
    }

    /// Whole contents of a document
    pub fn read_document(&mut self, id: EntryId) -> Result<Vec<u8>> {
        let size = self.document(id)?.size;
        self.check_range(id, 0, size)?;
        let mut data = vec![0u8; size as usize];
        self.read_range(id, 0, &mut data)?;
        Ok(data)
    }

    /// Replace the whole contents of a document
    ///
    /// The old chain is released first, so the new data is stored in the mini
    /// stream or in regular blocks purely by its own size.
    pub fn replace_contents(&mut self, id: EntryId, data: &[u8]) -> Result<()> {
        let cutoff = self.header.mini_stream_cutoff as u64;
        let (start, storage) = {
            let node = self.properties.get(id)?;
            (node.property.start_block, node.storage)
        };
        self.document(id)?;
        self.check_stream_size(data.len() as u64)?;
        self.alloc.free_chain(start, storage)?;

        let node = self.properties.get_mut(id)?;
        node.property.start_block = ENDOFCHAIN;
        node.property.size = 0;
        node.storage = if (data.len() as u64) < cutoff {
            TableKind::Mini
        } else {
            TableKind::Regular
        };
        self.write_document(id, 0, data)
    }

    /// Property of `id`, which must be a document
    fn document(&self, id: EntryId) -> Result<&crate::property::Property> {
        let node = self.properties.get(id)?;
        if node.property.entry_type != EntryType::Stream {
            return Err(CfbError::NotADocument(node.property.name.clone()));
        }
        Ok(&node.property)
    }

    fn addressing(&self, id: EntryId) -> Result<Addressing> {
        let node = self.properties.get(id)?;
        let blocks = self.alloc.chain_of(node.property.start_block, node.storage)?;
        Ok(match node.storage {
            TableKind::Regular => Addressing::Regular { blocks },
            TableKind::Mini => Addressing::Mini {
                blocks,
                container: self.mini_stream_chain()?,
            },
        })
    }

    fn mini_stream_chain(&self) -> Result<Vec<u32>> {
        let root = self.properties.get(self.properties.root_id())?;
        self.alloc.fat.chain_of(root.property.start_block)
    }

    fn unit_size(&self, storage: TableKind) -> usize {
        match storage {
            TableKind::Regular => self.store.sector_size(),
            TableKind::Mini => self.header.mini_sector_size(),
        }
    }

    fn read_block(&mut self, block: u32) -> Result<Vec<u8>> {
        self.store.read_block(block).map_err(|e| match e {
            CfbError::OutOfRange { .. } => CfbError::chain(block, "points past the end of the file"),
            other => other,
        })
    }

    /// Validate a read of `length` bytes at `offset` before any buffer exists
    ///
    /// Returns the document's block locations, or `None` for an empty range.
    /// A chain too short for the declared size is reported as corrupt, so a
    /// damaged size field never turns into a huge allocation.
    fn check_range(&self, id: EntryId, offset: u64, length: u64) -> Result<Option<Addressing>> {
        let property = self.document(id)?;
        let size = property.size;
        let start = property.start_block;
        if offset.checked_add(length).is_none_or(|end| end > size) {
            return Err(CfbError::OutOfBounds {
                offset,
                length,
                size,
            });
        }
        if length == 0 {
            return Ok(None);
        }

        let unit = self.unit_size(self.properties.get(id)?.storage) as u64;
        let addressing = self.addressing(id)?;
        if (addressing.block_count() as u64).saturating_mul(unit) < size {
            return Err(CfbError::chain(start, "chain is shorter than the stream"));
        }
        Ok(Some(addressing))
    }

    /// Fill `buf` from the document starting at `offset`
    ///
    /// Either the whole range is read or an error is returned.
    pub(crate) fn read_range(&mut self, id: EntryId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let Some(addressing) = self.check_range(id, offset, buf.len() as u64)? else {
            return Ok(());
        };
        let unit = self.unit_size(self.properties.get(id)?.storage);

        let sector_size = self.store.sector_size();
        let mini_size = self.header.mini_sector_size();
        let mut cached: Option<(u32, Vec<u8>)> = None;
        let mut filled = 0usize;
        while filled < buf.len() {
            let position = offset as usize + filled;
            let within = position % unit;
            let n = (unit - within).min(buf.len() - filled);
            let (block, base) = addressing.locate(position / unit, sector_size, mini_size)?;

            if cached.as_ref().is_none_or(|(b, _)| *b != block) {
                cached = Some((block, self.read_block(block)?));
            }
            if let Some((_, data)) = &cached {
                buf[filled..filled + n].copy_from_slice(&data[base + within..base + within + n]);
            }
            filled += n;
        }
        Ok(())
    }

    /// Copy `data` into already allocated blocks starting at `offset`
    fn write_range(&mut self, id: EntryId, offset: u64, data: &[u8]) -> Result<()> {
        let storage = self.properties.get(id)?.storage;
        let unit = self.unit_size(storage);
        let addressing = self.addressing(id)?;
        let sector_size = self.store.sector_size();
        let mini_size = self.header.mini_sector_size();

        let mut pending: Option<(u32, Vec<u8>)> = None;
        let mut written = 0usize;
        while written < data.len() {
            let position = offset as usize + written;
            let within = position % unit;
            let n = (unit - within).min(data.len() - written);
            let (block, base) = addressing.locate(position / unit, sector_size, mini_size)?;

            if pending.as_ref().is_none_or(|(b, _)| *b != block) {
                if let Some((b, bytes)) = pending.take() {
                    self.store.write_block(b, &bytes)?;
                }
                let bytes = if n == sector_size {
                    vec![0u8; sector_size]
                } else {
                    self.read_block(block)?
                };
                pending = Some((block, bytes));
            }
            if let Some((_, bytes)) = pending.as_mut() {
                bytes[base + within..base + within + n]
                    .copy_from_slice(&data[written..written + n]);
            }
            written += n;
        }
        if let Some((b, bytes)) = pending {
            self.store.write_block(b, &bytes)?;
        }
        Ok(())
    }

    /// Make sure blocks exist for every FAT entry in use
    fn grow_store(&mut self) -> Result<()> {
        let needed = self.alloc.fat.used_len() as u32;
        while self.store.block_count() < needed {
            self.store.append_zeroed()?;
        }
        Ok(())
    }

    /// Make sure the mini stream covers every Mini-FAT entry in use
    fn grow_mini_stream(&mut self) -> Result<()> {
        let sector_size = self.store.sector_size();
        let needed_bytes = self.alloc.mini_fat.used_len() * self.header.mini_sector_size();
        let needed_blocks = needed_bytes.div_ceil(sector_size);

        let root = self.properties.root_id();
        let start = self.properties.get(root)?.property.start_block;
        let have = self.alloc.fat.chain_of(start)?.len();
        if have < needed_blocks {
            let start = self.alloc.fat.extend_chain(start, needed_blocks - have)?;
            self.properties.get_mut(root)?.property.start_block = start;
            self.grow_store()?;
        }

        let root_property = &mut self.properties.get_mut(root)?.property;
        root_property.size = root_property.size.max(needed_bytes as u64);
        Ok(())
    }

    /// Extend a document's chain so it can hold `new_size` bytes
    fn ensure_capacity(&mut self, id: EntryId, new_size: u64) -> Result<()> {
        let node = self.properties.get(id)?;
        let storage = node.storage;
        let start = node.property.start_block;
        let unit = self.unit_size(storage) as u64;

        let have = self.alloc.chain_of(start, storage)?.len();
        let needed = new_size.div_ceil(unit) as usize;
        if needed <= have {
            return Ok(());
        }

        let start = self
            .alloc
            .table_mut(storage)
            .extend_chain(start, needed - have)?;
        self.properties.get_mut(id)?.property.start_block = start;
        match storage {
            TableKind::Regular => self.grow_store(),
            TableKind::Mini => self.grow_mini_stream(),
        }
    }

    /// Move a mini document into regular blocks sized for `new_size`
    fn migrate_to_regular(&mut self, id: EntryId, new_size: u64) -> Result<()> {
        let existing = self.read_document(id)?;
        let start = self.properties.get(id)?.property.start_block;
        self.alloc.free_chain(start, TableKind::Mini)?;

        let blocks = new_size.div_ceil(self.store.sector_size() as u64) as usize;
        let start = self.alloc.allocate_chain(blocks, TableKind::Regular);
        self.grow_store()?;

        let node = self.properties.get_mut(id)?;
        node.property.start_block = start;
        node.storage = TableKind::Regular;
        tracing::trace!(
            name = %node.property.name,
            from = existing.len(),
            to = new_size,
            "moved document from mini stream to regular blocks"
        );
        self.write_range(id, 0, &existing)
    }

    /// Write `data` at `offset`, growing the document as needed
    ///
    /// Writing past the current end fills the gap with zeros.
    pub(crate) fn write_document(&mut self, id: EntryId, offset: u64, data: &[u8]) -> Result<()> {
        let size = self.document(id)?.size;
        if data.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(CfbError::OutOfBounds {
                offset,
                length: data.len() as u64,
                size,
            })?;
        let new_size = size.max(end);
        self.check_stream_size(new_size)?;

        let storage = self.properties.get(id)?.storage;
        if storage == TableKind::Mini && new_size >= self.header.mini_stream_cutoff as u64 {
            self.migrate_to_regular(id, new_size)?;
        }
        self.ensure_capacity(id, new_size)?;

        if offset > size {
            let zeros = vec![0u8; self.store.sector_size()];
            let mut position = size;
            while position < offset {
                let n = (offset - position).min(zeros.len() as u64) as usize;
                self.write_range(id, position, &zeros[..n])?;
                position += n as u64;
            }
        }
        self.write_range(id, offset, data)?;
        self.properties.get_mut(id)?.property.size = new_size;
        Ok(())
    }

    /// Refuse sizes the container cannot record
    ///
    /// Version 3 entries keep only 32 bits of the size. Version 4 sizes are
    /// bounded by the number of addressable regular blocks.
    fn check_stream_size(&self, size: u64) -> Result<()> {
        let limit = match self.header.sector_size {
            SectorSize::V3 => u32::MAX as u64,
            SectorSize::V4 => (MAXREGSECT as u64 + 1) * SectorSize::V4.bytes() as u64,
        };
        if size > limit {
            return Err(CfbError::StreamTooLarge { size, limit });
        }
        Ok(())
    }

    /// Cut a document down to `new_size` bytes, freeing trailing blocks
    pub(crate) fn truncate_document(&mut self, id: EntryId, new_size: u64) -> Result<()> {
        let size = self.document(id)?.size;
        if new_size > size {
            return Err(CfbError::OutOfBounds {
                offset: new_size,
                length: 0,
                size,
            });
        }
        let node = self.properties.get(id)?;
        let storage = node.storage;
        let start = node.property.start_block;
        let keep = new_size.div_ceil(self.unit_size(storage) as u64) as usize;

        let start = self.alloc.table_mut(storage).truncate_chain(start, keep)?;
        let property = &mut self.properties.get_mut(id)?.property;
        property.start_block = start;
        property.size = new_size;
        Ok(())
    }
}

/// Cursor over one document of an open container
///
/// The cursor borrows the container, so it cannot outlive it. Besides the
/// explicit offset API it implements [`Read`], [`Write`] and [`Seek`] over
/// its own position.
#[derive(Debug)]
pub struct StreamCursor<'a, R> {
    file: &'a mut CompoundFile<R>,
    id: EntryId,
    mode: OpenMode,
    position: u64,
}

impl<R: Read + Seek> StreamCursor<'_, R> {
    /// Handle of the document
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Current stream size in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.document(self.id)?.size)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Which table currently addresses the document
    pub fn storage(&self) -> Result<TableKind> {
        Ok(self.file.properties.get(self.id)?.storage)
    }

    /// Read exactly `length` bytes at `offset`
    pub fn read_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.file.check_range(self.id, offset, length as u64)?;
        let mut data = vec![0u8; length];
        self.file.read_range(self.id, offset, &mut data)?;
        Ok(data)
    }

    /// Write `data` at `offset`, growing the stream if needed
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.file.write_document(self.id, offset, data)
    }

    /// Shrink the stream to `new_size` bytes
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.check_writable()?;
        self.file.truncate_document(self.id, new_size)?;
        self.position = self.position.min(new_size);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(CfbError::ReadOnly),
        }
    }
}

fn to_io(e: CfbError) -> io::Error {
    match e {
        CfbError::Io(inner) => inner,
        read_only @ CfbError::ReadOnly => io::Error::new(io::ErrorKind::PermissionDenied, read_only),
        other => io::Error::other(other),
    }
}

impl<R: Read + Seek> Read for StreamCursor<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.len().map_err(to_io)?;
        let remaining = size.saturating_sub(self.position);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.file
            .read_range(self.id, self.position, &mut buf[..n])
            .map_err(to_io)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Write for StreamCursor<'_, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(self.position, buf).map_err(to_io)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Read + Seek> Seek for StreamCursor<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.len().map_err(to_io)?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.position = n;
                Ok(n)
            },
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
