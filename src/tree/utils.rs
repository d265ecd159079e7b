//! Whole-subtree operations over the tree API: copying between containers,
//! structural comparison, and name filtering.

use super::Entry;
use crate::error::Result;
use crate::file::CompoundFile;
use crate::property::{EntryId, name_key};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};

/// A view of a directory that hides some entries
///
/// Exclusions are plain names (`"Name"`) hidden at this level, or
/// slash-separated paths (`"Dir/Name"`) hidden inside a child directory.
/// Matching ignores case, like directory lookups do.
#[derive(Debug, Clone, Default)]
pub struct FilteringDirectory {
    excludes: Vec<String>,
    child_excludes: HashMap<String, Vec<String>>,
}

impl FilteringDirectory {
    /// Build a filter from exclusion patterns
    pub fn new<I, S>(excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for pattern in excludes {
            let pattern = pattern.as_ref();
            match pattern.split_once('/') {
                Some((dir, rest)) => filter
                    .child_excludes
                    .entry(name_key(dir))
                    .or_default()
                    .push(rest.to_string()),
                None => filter.excludes.push(name_key(pattern)),
            }
        }
        filter
    }

    /// Filter that hides nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether `name` is hidden at this level
    pub fn is_excluded(&self, name: &str) -> bool {
        let key = name_key(name);
        self.excludes.iter().any(|e| *e == key)
    }

    /// Filter to apply inside the child directory `name`
    pub fn for_child(&self, name: &str) -> Self {
        match self.child_excludes.get(&name_key(name)) {
            Some(nested) => Self::new(nested),
            None => Self::none(),
        }
    }

    /// Visible children of `dir`, keyed by case-insensitive name
    pub fn children<R: Read + Seek>(
        &self,
        file: &CompoundFile<R>,
        dir: EntryId,
    ) -> Result<BTreeMap<String, Entry>> {
        let mut visible = BTreeMap::new();
        for child in file.children(dir)? {
            let name = file.name(child.id())?;
            if !self.is_excluded(name) {
                visible.insert(name_key(name), child);
            }
        }
        Ok(visible)
    }
}

/// Copy every child of `src_dir` into `dst_dir`, recursively
///
/// Names, class IDs, state bits and timestamps are carried over. Entries
/// hidden by `filter` are skipped.
pub fn copy_nodes<R1, R2>(
    src: &mut CompoundFile<R1>,
    src_dir: EntryId,
    dst: &mut CompoundFile<R2>,
    dst_dir: EntryId,
    filter: &FilteringDirectory,
) -> Result<()>
where
    R1: Read + Seek,
    R2: Read + Seek,
{
    for (_, child) in filter.children(src, src_dir)? {
        let property = src.property(child.id())?.clone();
        let copied = match child {
            Entry::Directory(id) => {
                let new_dir = dst.create_directory(dst_dir, &property.name)?;
                copy_nodes(src, id, dst, new_dir, &filter.for_child(&property.name))?;
                new_dir
            },
            Entry::Document(id) => {
                let data = src.read_document(id)?;
                let new_doc = dst.create_document(dst_dir, &property.name, data.len() as u64)?;
                dst.write_document(new_doc, 0, &data)?;
                new_doc
            },
        };

        let target = &mut dst.properties.get_mut(copied)?.property;
        target.clsid = property.clsid;
        target.state_bits = property.state_bits;
        target.created = property.created;
        target.modified = property.modified;
    }
    Ok(())
}

/// Whether two documents hold identical bytes
pub fn documents_equal<R1, R2>(
    a: &mut CompoundFile<R1>,
    a_doc: EntryId,
    b: &mut CompoundFile<R2>,
    b_doc: EntryId,
) -> Result<bool>
where
    R1: Read + Seek,
    R2: Read + Seek,
{
    if a.size(a_doc)? != b.size(b_doc)? {
        return Ok(false);
    }
    Ok(a.read_document(a_doc)? == b.read_document(b_doc)?)
}

/// Whether two directories hold the same names with equal content, recursively
///
/// The same filter is applied on both sides.
pub fn directories_equal<R1, R2>(
    a: &mut CompoundFile<R1>,
    a_dir: EntryId,
    b: &mut CompoundFile<R2>,
    b_dir: EntryId,
    filter: &FilteringDirectory,
) -> Result<bool>
where
    R1: Read + Seek,
    R2: Read + Seek,
{
    let left = filter.children(a, a_dir)?;
    let right = filter.children(b, b_dir)?;
    if left.len() != right.len() || left.keys().ne(right.keys()) {
        return Ok(false);
    }

    for (&l, &r) in left.values().zip(right.values()) {
        let equal = match (l, r) {
            (Entry::Directory(l), Entry::Directory(r)) => {
                let name = a.name(l)?.to_string();
                directories_equal(a, l, b, r, &filter.for_child(&name))?
            },
            (Entry::Document(l), Entry::Document(r)) => documents_equal(a, l, b, r)?,
            _ => false,
        };
        if !equal {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerOptions;

    #[test]
    fn test_filter_patterns() {
        let filter = FilteringDirectory::new(["Secret", "Dir/Hidden"]);
        assert!(filter.is_excluded("secret"));
        assert!(!filter.is_excluded("Dir"));

        let inner = filter.for_child("DIR");
        assert!(inner.is_excluded("Hidden"));
        assert!(!inner.is_excluded("Secret"));
        assert!(!filter.for_child("Other").is_excluded("Hidden"));
    }

    #[test]
    fn test_filtered_children() {
        let mut file = CompoundFile::create(ContainerOptions::default());
        file.create_stream(&["A"], b"a").unwrap();
        file.create_stream(&["B"], b"b").unwrap();

        let filter = FilteringDirectory::new(["b"]);
        let visible = filter.children(&file, file.root()).unwrap();
        assert_eq!(visible.keys().collect::<Vec<_>>(), vec!["A"]);
    }
}
