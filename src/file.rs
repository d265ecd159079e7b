//! The open container.
//!
//! A [`CompoundFile`] owns everything loaded from one compound file: the block
//! store over the backing medium, both allocation tables, and the directory
//! table. Mutations happen in memory; [`CompoundFile::save`] writes a fresh,
//! fully re-laid-out image.
//!
//! # Example
//!
//! ```rust,no_run
//! use cfbstore::{CompoundFile, ContainerOptions};
//!
//! # fn main() -> cfbstore::Result<()> {
//! let mut file = CompoundFile::create(ContainerOptions::default());
//! file.create_stream(&["Storage", "Data"], b"payload")?;
//! let bytes = file.to_bytes()?;
//!
//! let mut reopened = CompoundFile::open_bytes(bytes)?;
//! assert_eq!(reopened.open_stream(&["Storage", "Data"])?, b"payload");
//! # Ok(())
//! # }
//! ```

use crate::alloc::{self, Allocator, ChainLoopDetector, TableKind};
use crate::block_store::BlockStore;
use crate::config::{ContainerOptions, SaveOptions, SectorSize};
use crate::consts::*;
use crate::error::{CfbError, Result};
use crate::header::Header;
use crate::property::{EntryType, PropertyTable};
use crate::writer::{ContainerWriter, WriteEntry};
use fixedbitset::FixedBitSet;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// An open compound file
#[derive(Debug)]
pub struct CompoundFile<R> {
    pub(crate) store: BlockStore<R>,
    pub(crate) alloc: Allocator,
    pub(crate) properties: PropertyTable,
    pub(crate) header: Header,
    pub(crate) options: ContainerOptions,
    /// Problems found during a best-effort open
    corruption: Vec<String>,
}

impl CompoundFile<Cursor<Vec<u8>>> {
    /// Create a new, empty in-memory container
    pub fn create(options: ContainerOptions) -> Self {
        let sector_size = options.sector_size;
        let store = BlockStore::from_empty(Cursor::new(Vec::new()), sector_size.bytes());
        Self {
            store,
            alloc: Allocator::new(),
            properties: PropertyTable::new(),
            header: Header::new(sector_size),
            options,
            corruption: Vec::new(),
        }
    }

    /// Open a container held in memory
    pub fn open_bytes(data: Vec<u8>) -> Result<Self> {
        Self::open(Cursor::new(data))
    }
}

impl CompoundFile<BufReader<File>> {
    /// Open a container from a file path
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> CompoundFile<R> {
    /// Open a container with default options
    ///
    /// Structural problems that still leave a usable tree are recorded (see
    /// [`corruption`](Self::corruption)) instead of failing the open.
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with(reader, ContainerOptions::default())
    }

    /// Open a container
    ///
    /// # Arguments
    ///
    /// * `reader` - Backing medium positioned anywhere
    /// * `options` - `strict` turns every recorded problem into an error;
    ///   `sector_size` is ignored since the header decides it
    pub fn open_with(mut reader: R, options: ContainerOptions) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut header_bytes = Vec::with_capacity(HEADER_SIZE);
        reader
            .by_ref()
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut header_bytes)?;
        let header = Header::parse(&header_bytes)?;
        let geometry = header.sector_size;
        let sector_size = geometry.bytes();

        let mut store = BlockStore::new(reader, sector_size)?;
        let mut detector = ChainLoopDetector::new(store.block_count());
        let (fat, locations) = alloc::load_fat(&header, &mut store, &mut detector)?;

        let dir_chain = fat.chain_of(header.first_dir_sector)?;
        detector.claim_all(&dir_chain)?;
        let dir_data = alloc::read_regular_chain(&mut store, &dir_chain)?;

        let mut problems = Vec::new();
        let mini_fat = match alloc::load_mini_fat(&header, &fat, &mut store, &mut detector) {
            Ok(table) => table,
            Err(e) if e.is_corruption() => {
                problems.push(format!("Mini-FAT unreadable: {}", e));
                alloc::AllocationTable::new(TableKind::Mini)
            },
            Err(e) => return Err(e),
        };

        let properties = PropertyTable::parse(
            &dir_data,
            header.sector_size,
            header.mini_stream_cutoff,
            &mut problems,
        )?;

        let mut file = Self {
            store,
            alloc: Allocator { fat, mini_fat },
            properties,
            header,
            options: ContainerOptions {
                sector_size: geometry,
                ..options
            },
            corruption: Vec::new(),
        };
        file.verify_documents(&mut detector, &mut problems);

        for problem in &problems {
            tracing::warn!(problem = %problem, "compound file damaged; continuing with what survives");
        }
        if options.strict && !problems.is_empty() {
            return Err(CfbError::CorruptContainer(problems));
        }
        file.corruption = problems;

        tracing::debug!(
            sector_size,
            blocks = file.store.block_count(),
            fat_sectors = locations.fat_sectors.len(),
            difat_sectors = locations.difat_sectors.len(),
            entries = file.properties.len(),
            "opened compound file"
        );
        Ok(file)
    }

    /// Check every document chain, recording rather than failing
    fn verify_documents(&self, detector: &mut ChainLoopDetector, problems: &mut Vec<String>) {
        let sector_size = self.store.sector_size();
        let mini_size = self.header.mini_sector_size();

        let root = self.properties.node_at(0).map(|n| &n.property);
        let mini_stream_blocks = match root.map(|r| self.alloc.fat.chain_of(r.start_block)) {
            Some(Ok(chain)) => {
                if let Err(e) = detector.claim_all(&chain) {
                    problems.push(format!("Mini stream overlaps other data: {}", e));
                }
                chain.len()
            },
            Some(Err(e)) => {
                problems.push(format!("Mini stream chain is corrupt: {}", e));
                0
            },
            None => 0,
        };
        let mini_capacity = mini_stream_blocks * sector_size / mini_size;
        let block_count = self.store.block_count();
        let mut mini_claimed = FixedBitSet::with_capacity(self.alloc.mini_fat.len());

        for (id, node) in self.properties.iter() {
            if node.property.entry_type != EntryType::Stream {
                continue;
            }
            let name = &node.property.name;
            let chain = match self.alloc.chain_of(node.property.start_block, node.storage) {
                Ok(chain) => chain,
                Err(e) => {
                    problems.push(format!("Document {:?} has a corrupt chain: {}", name, e));
                    continue;
                },
            };

            let unit = match node.storage {
                TableKind::Regular => sector_size,
                TableKind::Mini => mini_size,
            };
            if ((chain.len() * unit) as u64) < node.property.size {
                problems.push(format!(
                    "Document {:?} declares {} bytes but its chain holds {}",
                    name,
                    node.property.size,
                    chain.len() * unit
                ));
            }

            if node.storage == TableKind::Regular && chain.iter().any(|&b| b >= block_count) {
                problems.push(format!("Document {:?} points past the end of the file", name));
                continue;
            }
            let shared = match node.storage {
                TableKind::Regular => detector.claim_all(&chain).is_err(),
                TableKind::Mini => chain.iter().any(|&b| {
                    b as usize >= mini_capacity || mini_claimed.put(b as usize)
                }),
            };
            if shared {
                problems.push(format!(
                    "Document {:?} (entry {}) shares or overruns blocks",
                    name,
                    id.index()
                ));
            }
        }
    }

    /// Problems recorded while opening; empty for a healthy container
    pub fn corruption(&self) -> &[String] {
        &self.corruption
    }

    /// Sector size of this container
    pub fn sector_size(&self) -> SectorSize {
        self.header.sector_size
    }

    /// Size threshold below which documents live in the mini stream
    pub fn mini_stream_cutoff(&self) -> u32 {
        self.header.mini_stream_cutoff
    }

    /// Options this container was created or opened with
    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    /// Number of blocks currently addressable, including unsaved ones
    pub fn block_count(&self) -> u32 {
        self.store.block_count()
    }

    /// Read-only view of the allocation tables
    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    /// Serialize the container to `writer`
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        self.write_to_with(writer, SaveOptions::default())
    }

    /// Serialize the container to `writer` with explicit save options
    ///
    /// A container opened with recorded corruption is refused unless
    /// `options.allow_corrupt` is set. Documents whose data cannot be read
    /// are then written empty.
    pub fn write_to_with<W: Write>(&mut self, writer: &mut W, options: SaveOptions) -> Result<()> {
        if !self.corruption.is_empty() && !options.allow_corrupt {
            return Err(CfbError::CorruptContainer(self.corruption.clone()));
        }
        let entries = self.snapshot(options.allow_corrupt)?;
        let mut container = ContainerWriter::new(
            self.header.sector_size,
            self.header.mini_stream_cutoff,
            self.options.sibling_order,
        );
        container.set_clsid(self.header.clsid);
        container.write(&entries, writer)?;
        tracing::debug!(entries = entries.len(), "wrote compound file");
        Ok(())
    }

    /// Serialize the container into a new byte vector
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Save the container to a file path
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.save_with(path, SaveOptions::default())
    }

    /// Save the container to a file path with explicit save options
    pub fn save_with<P: AsRef<Path>>(&mut self, path: P, options: SaveOptions) -> Result<()> {
        let file = File::create(path)?;
        let mut buffered = BufWriter::new(file);
        self.write_to_with(&mut buffered, options)?;
        buffered.flush()?;
        Ok(())
    }

    /// Close the container and hand back the backing medium
    ///
    /// Unsaved changes are discarded.
    pub fn close(self) -> R {
        self.store.into_inner()
    }

    /// Flatten the tree for the writer: root first, then breadth-first with
    /// children in sibling order
    fn snapshot(&mut self, allow_corrupt: bool) -> Result<Vec<WriteEntry>> {
        let order = self.options.sibling_order;
        let root = self.properties.root_id();
        let mut entries = Vec::with_capacity(self.properties.len());
        let mut queue = VecDeque::new();

        entries.push(WriteEntry::new(self.properties.get(root)?.property.clone()));
        queue.push_back((root, 0usize));

        while let Some((dir, dir_slot)) = queue.pop_front() {
            let mut children = self.properties.children(dir)?;
            children.sort_by(|&a, &b| {
                let name_a = self.properties.get(a).map(|n| n.property.name.as_str());
                let name_b = self.properties.get(b).map(|n| n.property.name.as_str());
                crate::property::compare_names(order, name_a.unwrap_or(""), name_b.unwrap_or(""))
            });

            for child in children {
                let slot = entries.len();
                let property = self.properties.get(child)?.property.clone();
                let mut entry = WriteEntry::new(property);
                match entry.property.entry_type {
                    EntryType::Stream => {
                        entry.data = self.document_bytes_for_save(child, allow_corrupt)?;
                        entry.property.size = entry.data.len() as u64;
                    },
                    _ => queue.push_back((child, slot)),
                }
                entries[dir_slot].children.push(slot);
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn document_bytes_for_save(
        &mut self,
        id: crate::property::EntryId,
        allow_corrupt: bool,
    ) -> Result<Vec<u8>> {
        match self.read_document(id) {
            Ok(data) => Ok(data),
            Err(e) if allow_corrupt && e.is_corruption() => {
                tracing::warn!(error = %e, "writing unreadable document as empty");
                Ok(Vec::new())
            },
            Err(e) if e.is_corruption() => Err(CfbError::InternalInvariant(format!(
                "Document {:?} does not match its chain: {}",
                self.properties.path_of(id)?.join("/"),
                e
            ))),
            Err(e) => Err(e),
        }
    }
}
