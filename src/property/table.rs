//! Arena of directory entries with per-directory name maps.
//!
//! On disk, each directory's children form a binary tree threaded through the
//! flat entry array by index. In memory the array becomes an arena of
//! [`Node`]s: each directory owns a map from case-insensitive name to child
//! index, and each node keeps its parent's index as a non-owning back link.
//! The intrusive encoding is rebuilt only when the table is written.

use super::entry::{EntryType, Property, validate_name};
use super::ordering::name_key;
use crate::alloc::TableKind;
use crate::config::SectorSize;
use crate::consts::*;
use crate::error::{CfbError, Result};
use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// Handle to an entry of an open container
///
/// Handles are cheap to copy. Deleting an entry bumps its slot's generation,
/// so any handle still pointing at it reports [`CfbError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    /// Position of the entry in the in-memory arena
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// An attached entry
#[derive(Debug, Clone)]
pub struct Node {
    pub property: Property,
    /// Arena index of the parent directory; `None` only for the root
    pub parent: Option<u32>,
    /// Children by case-insensitive name; always empty for streams
    pub children: BTreeMap<String, u32>,
    /// Table addressing this stream's blocks
    pub storage: TableKind,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The directory ("property") table of an open container
#[derive(Debug, Clone)]
pub struct PropertyTable {
    slots: Vec<Slot>,
    /// Empty slots, reused lowest first
    free: BTreeSet<u32>,
}

impl PropertyTable {
    /// Table containing only a root entry
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node {
                    property: Property::root(),
                    parent: None,
                    children: BTreeMap::new(),
                    storage: TableKind::Regular,
                }),
            }],
            free: BTreeSet::new(),
        }
    }

    /// Decode a directory stream
    ///
    /// Holes (empty or unsupported slots) keep their position. Broken links,
    /// entries reachable twice and duplicate sibling names are skipped and
    /// described in `problems`, so the rest of the tree still loads. A
    /// missing or invalid root entry is fatal.
    pub fn parse(
        data: &[u8],
        sector_size: SectorSize,
        mini_stream_cutoff: u32,
        problems: &mut Vec<String>,
    ) -> Result<Self> {
        let decoded: Vec<Option<Property>> = data
            .chunks_exact(DIRENTRY_SIZE)
            .map(|chunk| Property::parse(chunk, sector_size))
            .collect::<Result<_>>()?;

        match decoded.first() {
            Some(Some(root)) if root.entry_type == EntryType::Root => {},
            _ => {
                return Err(CfbError::CorruptDirectory(
                    "First directory entry is not a root entry".to_string(),
                ));
            },
        }

        let count = decoded.len();
        let mut slots: Vec<Slot> = (0..count)
            .map(|_| Slot {
                generation: 0,
                node: None,
            })
            .collect();
        let mut attached = FixedBitSet::with_capacity(count);
        attached.insert(0);
        // Every index whose links were followed, attached or not
        let mut visited = attached.clone();

        let root_property = decoded[0].clone().unwrap_or_else(Property::root);
        let root_child = root_property.child;
        slots[0].node = Some(Node {
            property: root_property,
            parent: None,
            children: BTreeMap::new(),
            storage: TableKind::Regular,
        });

        // (directory index, root of its sibling tree)
        let mut directories = vec![(0u32, root_child)];
        while let Some((dir, first)) = directories.pop() {
            let mut pending = vec![first];
            while let Some(sid) = pending.pop() {
                if sid == NOSTREAM {
                    continue;
                }
                let idx = sid as usize;
                let Some(Some(property)) = decoded.get(idx) else {
                    problems.push(format!(
                        "Entry {} links to missing or empty entry {}",
                        dir, sid
                    ));
                    continue;
                };
                if visited.put(idx) {
                    problems.push(format!("Entry {} is referenced more than once", sid));
                    continue;
                }
                if property.entry_type == EntryType::Root {
                    problems.push(format!("Entry {} is a second root entry", sid));
                    continue;
                }

                // Sibling links are followed even when this entry is dropped,
                // but never twice
                pending.push(property.left);
                pending.push(property.right);

                let key = name_key(&property.name);
                let taken = slots[dir as usize]
                    .node
                    .as_ref()
                    .is_some_and(|n| n.children.contains_key(&key));
                if taken {
                    problems.push(format!(
                        "Entry {} duplicates sibling name {:?}",
                        sid, property.name
                    ));
                    continue;
                }

                attached.insert(idx);
                let mut property = property.clone();
                // Empty streams own no blocks, whatever start they claim
                if property.entry_type == EntryType::Stream && property.size == 0 {
                    property.start_block = ENDOFCHAIN;
                }
                let storage = if property.entry_type == EntryType::Stream
                    && property.size < mini_stream_cutoff as u64
                {
                    TableKind::Mini
                } else {
                    TableKind::Regular
                };
                if property.is_directory() {
                    directories.push((sid, property.child));
                }
                slots[idx].node = Some(Node {
                    property,
                    parent: Some(dir),
                    children: BTreeMap::new(),
                    storage,
                });
                if let Some(parent) = slots[dir as usize].node.as_mut() {
                    parent.children.insert(key, sid);
                }
            }
        }

        let orphans = decoded
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_some() && !attached.contains(*i))
            .count();
        if orphans > 0 {
            tracing::debug!(orphans, "ignoring directory entries not reachable from the root");
        }

        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.node.is_none())
            .map(|(i, _)| i as u32)
            .collect();

        Ok(Self { slots, free })
    }

    /// Handle of the root entry
    pub fn root_id(&self) -> EntryId {
        EntryId {
            index: 0,
            generation: self.slots[0].generation,
        }
    }

    /// Current handle for a live arena index
    pub(crate) fn id_at(&self, index: u32) -> Option<EntryId> {
        let slot = self.slots.get(index as usize)?;
        slot.node.as_ref()?;
        Some(EntryId {
            index,
            generation: slot.generation,
        })
    }

    /// Node by arena index, bypassing generation checks
    pub(crate) fn node_at(&self, index: u32) -> Option<&Node> {
        self.slots.get(index as usize)?.node.as_ref()
    }

    pub(crate) fn node_at_mut(&mut self, index: u32) -> Option<&mut Node> {
        self.slots.get_mut(index as usize)?.node.as_mut()
    }

    /// Resolve a handle
    pub fn get(&self, id: EntryId) -> Result<&Node> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.node.as_ref().ok_or(CfbError::StaleHandle)
            },
            _ => Err(CfbError::StaleHandle),
        }
    }

    /// Resolve a handle mutably
    pub fn get_mut(&mut self, id: EntryId) -> Result<&mut Node> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.node.as_mut().ok_or(CfbError::StaleHandle)
            },
            _ => Err(CfbError::StaleHandle),
        }
    }

    /// Resolve a handle that must name a directory
    fn directory(&self, id: EntryId) -> Result<&Node> {
        let node = self.get(id)?;
        if !node.property.is_directory() {
            return Err(CfbError::NotADirectory(node.property.name.clone()));
        }
        Ok(node)
    }

    /// Number of live entries, root included
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, live or not
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Live entries in arena order
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Node)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    EntryId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }

    /// Children of a directory, ordered by case-insensitive name
    pub fn children(&self, dir: EntryId) -> Result<Vec<EntryId>> {
        let node = self.directory(dir)?;
        Ok(node
            .children
            .values()
            .filter_map(|&i| self.id_at(i))
            .collect())
    }

    /// Child of a directory by case-insensitive name
    pub fn child_by_name(&self, dir: EntryId, name: &str) -> Result<EntryId> {
        let node = self.directory(dir)?;
        node.children
            .get(&name_key(name))
            .and_then(|&i| self.id_at(i))
            .ok_or_else(|| CfbError::NotFound(name.to_string()))
    }

    /// Parent directory of an entry; `None` for the root
    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>> {
        Ok(self.get(id)?.parent.and_then(|p| self.id_at(p)))
    }

    /// Names from the root down to `id`, excluding the root's own name
    pub fn path_of(&self, id: EntryId) -> Result<Vec<String>> {
        let mut names: SmallVec<[&str; 8]> = SmallVec::new();
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            names.push(&current.property.name);
            current = self
                .node_at(parent)
                .ok_or_else(|| CfbError::InternalInvariant("Dangling parent link".to_string()))?;
        }
        Ok(names.iter().rev().map(|name| name.to_string()).collect())
    }

    /// Insert a new entry under `parent`
    pub fn insert(&mut self, parent: EntryId, property: Property) -> Result<EntryId> {
        validate_name(&property.name)?;
        if property.entry_type == EntryType::Root {
            return Err(CfbError::RootImmutable);
        }
        let key = name_key(&property.name);
        if self.directory(parent)?.children.contains_key(&key) {
            return Err(CfbError::DuplicateName(property.name));
        }

        let storage = match property.entry_type {
            EntryType::Stream => TableKind::Mini,
            _ => TableKind::Regular,
        };
        let node = Node {
            property,
            parent: Some(parent.index),
            children: BTreeMap::new(),
            storage,
        };

        let index = match self.free.pop_first() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            },
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            },
        };

        self.get_mut(parent)?.children.insert(key, index);
        Ok(EntryId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    /// Unlink and drop an entry; directories must be empty
    pub fn remove(&mut self, id: EntryId) -> Result<Node> {
        let node = self.get(id)?;
        let Some(parent) = node.parent else {
            return Err(CfbError::RootImmutable);
        };
        if !node.children.is_empty() {
            return Err(CfbError::NotEmpty(node.property.name.clone()));
        }
        let key = name_key(&node.property.name);

        if let Some(parent_node) = self.node_at_mut(parent) {
            parent_node.children.remove(&key);
        }
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let removed = slot.node.take().ok_or(CfbError::StaleHandle)?;
        self.free.insert(id.index);
        Ok(removed)
    }

    /// Give an entry a new name, keeping it under the same parent
    pub fn rename(&mut self, id: EntryId, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let node = self.get(id)?;
        let Some(parent) = node.parent else {
            return Err(CfbError::RootImmutable);
        };
        let old_key = name_key(&node.property.name);
        let new_key = name_key(new_name);

        let parent_node = self
            .node_at_mut(parent)
            .ok_or_else(|| CfbError::InternalInvariant("Dangling parent link".to_string()))?;
        if let Some(&existing) = parent_node.children.get(&new_key)
            && existing != id.index
        {
            return Err(CfbError::DuplicateName(new_name.to_string()));
        }
        parent_node.children.remove(&old_key);
        parent_node.children.insert(new_key, id.index);

        self.get_mut(id)?.property.name = new_name.to_string();
        Ok(())
    }

    /// Re-parent an entry under another directory
    pub fn move_entry(&mut self, id: EntryId, new_parent: EntryId) -> Result<()> {
        let node = self.get(id)?;
        let Some(old_parent) = node.parent else {
            return Err(CfbError::RootImmutable);
        };
        let name = node.property.name.clone();
        let key = name_key(&name);

        let target = self.directory(new_parent)?;
        if target.children.get(&key) == Some(&id.index) {
            return Ok(());
        }
        if target.children.contains_key(&key) {
            return Err(CfbError::DuplicateName(name));
        }

        // Walk up from the target; meeting the moved entry means a cycle
        let mut cursor = Some(new_parent.index);
        while let Some(index) = cursor {
            if index == id.index {
                return Err(CfbError::InvalidMove(name));
            }
            cursor = self.node_at(index).and_then(|n| n.parent);
        }

        if let Some(parent_node) = self.node_at_mut(old_parent) {
            parent_node.children.remove(&key);
        }
        self.get_mut(new_parent)?.children.insert(key, id.index);
        self.get_mut(id)?.parent = Some(new_parent.index);
        Ok(())
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}
