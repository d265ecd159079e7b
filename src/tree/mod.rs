//! Caller-facing directory tree.
//!
//! Directories and documents are addressed through [`EntryId`] handles handed
//! out by the container. A handle is attached from the moment
//! `create_document`/`create_directory` returns it until the entry is
//! deleted; afterwards every use reports [`CfbError::StaleHandle`].

/// Copy, compare and filter helpers built on the tree API
mod utils;


pub use utils::{FilteringDirectory, copy_nodes, directories_equal, documents_equal};

use crate::alloc::TableKind;
use crate::error::{CfbError, Result};
use crate::file::CompoundFile;
use crate::property::{EntryId, EntryType, Property, datetime_to_filetime};
use chrono::{DateTime, Utc};
use smallvec::{SmallVec, smallvec};
use std::io::{Read, Seek};

/// A resolved tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entry {
    /// The root or a storage
    Directory(EntryId),
    /// A stream
    Document(EntryId),
}

impl Entry {
    pub fn id(self) -> EntryId {
        match self {
            Entry::Directory(id) | Entry::Document(id) => id,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    pub fn is_document(self) -> bool {
        matches!(self, Entry::Document(_))
    }
}

impl<R: Read + Seek> CompoundFile<R> {
    /// Root directory
    pub fn root(&self) -> EntryId {
        self.properties.root_id()
    }

    fn entry_for(&self, id: EntryId) -> Result<Entry> {
        let node = self.properties.get(id)?;
        Ok(match node.property.entry_type {
            EntryType::Stream => Entry::Document(id),
            _ => Entry::Directory(id),
        })
    }

    /// Whether a handle still refers to a live entry
    pub fn is_live(&self, id: EntryId) -> bool {
        self.properties.get(id).is_ok()
    }

    /// Directory entry of `id`
    pub fn property(&self, id: EntryId) -> Result<&Property> {
        Ok(&self.properties.get(id)?.property)
    }

    /// Name of an entry
    pub fn name(&self, id: EntryId) -> Result<&str> {
        Ok(&self.property(id)?.name)
    }

    /// Size of a document in bytes; directories report zero
    pub fn size(&self, id: EntryId) -> Result<u64> {
        let property = self.property(id)?;
        Ok(match property.entry_type {
            EntryType::Stream => property.size,
            _ => 0,
        })
    }

    /// Child of `dir` by case-insensitive name
    pub fn entry(&self, dir: EntryId, name: &str) -> Result<Entry> {
        let id = self.properties.child_by_name(dir, name)?;
        self.entry_for(id)
    }

    /// Children of `dir`, ordered by case-insensitive name
    pub fn children(&self, dir: EntryId) -> Result<Vec<Entry>> {
        self.properties
            .children(dir)?
            .into_iter()
            .map(|id| self.entry_for(id))
            .collect()
    }

    /// Parent directory; `None` for the root
    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>> {
        self.properties.parent(id)
    }

    /// Names leading from the root to `id`
    pub fn path_of(&self, id: EntryId) -> Result<Vec<String>> {
        self.properties.path_of(id)
    }

    /// Create an empty document under `dir`
    ///
    /// # Arguments
    ///
    /// * `dir` - Parent directory
    /// * `name` - New document name, unique among its siblings ignoring case
    /// * `size_hint` - Expected final size; documents expected to reach the
    ///   mini stream cutoff start out in regular blocks
    pub fn create_document(&mut self, dir: EntryId, name: &str, size_hint: u64) -> Result<EntryId> {
        let id = self.properties.insert(dir, Property::stream(name))?;
        if size_hint >= self.header.mini_stream_cutoff as u64 {
            self.properties.get_mut(id)?.storage = TableKind::Regular;
        }
        Ok(id)
    }

    /// Create an empty directory under `dir`
    pub fn create_directory(&mut self, dir: EntryId, name: &str) -> Result<EntryId> {
        self.properties.insert(dir, Property::storage(name))
    }

    /// Delete the child `name` of `dir`
    ///
    /// Non-empty directories are refused with [`CfbError::NotEmpty`] unless
    /// `recursive` is set.
    pub fn delete_entry(&mut self, dir: EntryId, name: &str, recursive: bool) -> Result<()> {
        let id = self.properties.child_by_name(dir, name)?;
        self.delete(id, recursive)
    }

    /// Delete an entry by handle
    pub fn delete(&mut self, id: EntryId, recursive: bool) -> Result<()> {
        let node = self.properties.get(id)?;
        if node.parent.is_none() {
            return Err(CfbError::RootImmutable);
        }
        if node.property.entry_type != EntryType::Stream {
            if recursive {
                for child in self.properties.children(id)? {
                    self.delete(child, true)?;
                }
            }
            self.properties.remove(id)?;
            return Ok(());
        }

        let start = node.property.start_block;
        let storage = node.storage;
        if let Err(e) = self.alloc.free_chain(start, storage) {
            // The entry still goes; its blocks stay marked until the next save
            tracing::warn!(name = %node.property.name, error = %e, "could not free document chain");
        }
        self.properties.remove(id)?;
        Ok(())
    }

    /// Rename an entry within its directory
    pub fn rename(&mut self, id: EntryId, new_name: &str) -> Result<()> {
        self.properties.rename(id, new_name)
    }

    /// Move an entry under another directory, keeping its name
    pub fn move_entry(&mut self, id: EntryId, new_parent: EntryId) -> Result<()> {
        self.properties.move_entry(id, new_parent)
    }

    /// Resolve a path of names starting at the root
    pub fn entry_by_path(&self, path: &[&str]) -> Result<Entry> {
        let mut current = Entry::Directory(self.root());
        for name in path {
            let Entry::Directory(dir) = current else {
                return Err(CfbError::NotADirectory(self.name(current.id())?.to_string()));
            };
            current = self.entry(dir, name)?;
        }
        Ok(current)
    }

    /// Whether a path resolves to an entry
    pub fn exists(&self, path: &[&str]) -> bool {
        self.entry_by_path(path).is_ok()
    }

    /// Read a whole document by path
    pub fn open_stream(&mut self, path: &[&str]) -> Result<Vec<u8>> {
        match self.entry_by_path(path)? {
            Entry::Document(id) => self.read_document(id),
            Entry::Directory(id) => Err(CfbError::NotADocument(self.name(id)?.to_string())),
        }
    }

    /// Create or overwrite a document by path, creating parent directories
    pub fn create_stream(&mut self, path: &[&str], data: &[u8]) -> Result<EntryId> {
        let Some((name, parents)) = path.split_last() else {
            return Err(CfbError::InvalidName(String::new()));
        };

        let mut dir = self.root();
        for parent in parents {
            dir = match self.entry(dir, parent) {
                Ok(Entry::Directory(id)) => id,
                Ok(Entry::Document(_)) => return Err(CfbError::NotADirectory(parent.to_string())),
                Err(CfbError::NotFound(_)) => self.create_directory(dir, parent)?,
                Err(e) => return Err(e),
            };
        }

        let id = match self.entry(dir, name) {
            Ok(Entry::Document(id)) => id,
            Ok(Entry::Directory(_)) => return Err(CfbError::NotADocument(name.to_string())),
            Err(CfbError::NotFound(_)) => self.create_document(dir, name, data.len() as u64)?,
            Err(e) => return Err(e),
        };
        self.replace_contents(id, data)?;
        Ok(id)
    }

    /// Paths of every document, sorted
    pub fn list_streams(&self) -> Result<Vec<Vec<String>>> {
        let mut out = Vec::new();
        let mut pending: SmallVec<[EntryId; 8]> = smallvec![self.root()];
        while let Some(dir) = pending.pop() {
            for child in self.children(dir)? {
                match child {
                    Entry::Document(id) => out.push(self.path_of(id)?),
                    Entry::Directory(id) => pending.push(id),
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Class ID stored on an entry
    pub fn clsid(&self, id: EntryId) -> Result<[u8; 16]> {
        Ok(self.property(id)?.clsid)
    }

    pub fn set_clsid(&mut self, id: EntryId, clsid: [u8; 16]) -> Result<()> {
        self.properties.get_mut(id)?.property.clsid = clsid;
        Ok(())
    }

    /// User-defined state bits
    pub fn state_bits(&self, id: EntryId) -> Result<u32> {
        Ok(self.property(id)?.state_bits)
    }

    pub fn set_state_bits(&mut self, id: EntryId, bits: u32) -> Result<()> {
        self.properties.get_mut(id)?.property.state_bits = bits;
        Ok(())
    }

    /// Creation time, if one is recorded
    pub fn created(&self, id: EntryId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.property(id)?.created_at())
    }

    /// Modification time, if one is recorded
    pub fn modified(&self, id: EntryId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.property(id)?.modified_at())
    }

    pub fn set_created(&mut self, id: EntryId, time: DateTime<Utc>) -> Result<()> {
        self.properties.get_mut(id)?.property.created = datetime_to_filetime(time);
        Ok(())
    }

    pub fn set_modified(&mut self, id: EntryId, time: DateTime<Utc>) -> Result<()> {
        self.properties.get_mut(id)?.property.modified = datetime_to_filetime(time);
        Ok(())
    }
}
