//! Container serialization.
//!
//! Saving never patches the original layout. The tree is flattened and laid
//! out from scratch in a fixed order: header, mini stream, Mini-FAT,
//! directory, large documents, DIFAT, FAT. The FAT comes last because its own
//! size depends on the total block count.

/// FAT generation
mod fat;

/// Mini-FAT and mini stream generation
mod minifat;

/// DIFAT generation
mod difat;

/// Directory stream generation
mod directory;

/// Layout and output
mod core;

/// Integration tests for open, mutate and save
#[cfg(test)]
mod tests;

pub use core::{ContainerWriter, WriteEntry};
