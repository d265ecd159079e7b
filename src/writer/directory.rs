//! Directory stream generation
//!
//! Each directory's children are sorted and arranged into a balanced sibling
//! tree. The middle child becomes the subtree root that the parent's `child`
//! field points to; earlier children hang off it through `left` links and
//! later children through `right` links.
//!
//! ```text
//! Sorted order: ["Data", "1Table", "WordDocument"]
//!
//!         Root Entry
//!             |
//!          1Table
//!          /    \
//!      Data    WordDocument
//! ```
//!
//! Every node is written black. Readers locate entries by walking the
//! tree, never by checking its coloring.

use super::core::WriteEntry;
use crate::config::SiblingOrder;
use crate::consts::*;
use crate::property::{Property, compare_names, empty_slot};

/// Lays out the directory of a snapshot
#[derive(Debug)]
pub struct DirectoryBuilder {
    properties: Vec<Property>,
}

impl DirectoryBuilder {
    /// Copy the properties of a snapshot and link every sibling tree
    ///
    /// Snapshot indices become directory entry ids unchanged.
    pub fn new(entries: &[WriteEntry], order: SiblingOrder) -> Self {
        let mut properties: Vec<Property> = entries
            .iter()
            .map(|entry| {
                let mut property = entry.property.clone();
                property.left = NOSTREAM;
                property.right = NOSTREAM;
                property.child = NOSTREAM;
                property.color = COLOR_BLACK;
                property
            })
            .collect();

        for (parent, entry) in entries.iter().enumerate() {
            let mut sorted = entry.children.clone();
            sorted.sort_by(|&a, &b| {
                compare_names(order, &entries[a].property.name, &entries[b].property.name)
            });
            link_children(parent, &sorted, &mut properties);
        }

        Self { properties }
    }

    /// Entry `index`, for placing start blocks and sizes after allocation
    pub fn property_mut(&mut self, index: usize) -> &mut Property {
        &mut self.properties[index]
    }

    /// Length of the serialized directory, padded to whole sectors
    pub fn stream_len(&self, sector_size: usize) -> usize {
        (self.properties.len() * DIRENTRY_SIZE).div_ceil(sector_size) * sector_size
    }

    /// Serialize the directory, padding the last sector with empty slots
    pub fn generate_directory_stream(&self, sector_size: usize) -> Vec<u8> {
        let len = self.stream_len(sector_size);
        let mut out = Vec::with_capacity(len);
        for property in &self.properties {
            out.extend_from_slice(&property.to_bytes());
        }
        while out.len() < len {
            out.extend_from_slice(&empty_slot());
        }
        out
    }
}

/// Link already sorted children of `parent` into a sibling tree
fn link_children(parent: usize, sorted: &[usize], properties: &mut [Property]) {
    if sorted.is_empty() {
        return;
    }

    let midpoint = sorted.len() / 2;
    properties[parent].child = sorted[midpoint] as u32;

    for (pos, &index) in sorted.iter().enumerate() {
        let property = &mut properties[index];
        if pos <= midpoint && pos > 0 {
            property.left = sorted[pos - 1] as u32;
        }
        if pos >= midpoint && pos + 1 < sorted.len() {
            property.right = sorted[pos + 1] as u32;
        }
    }
}
