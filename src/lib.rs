//! Cfbstore - A read-write engine for Compound File Binary containers
//!
//! Compound files (also known as OLE2 structured storage or POIFS) pack a
//! small file system into one file: a tree of directories ("storages") and
//! documents ("streams") stored in fixed-size blocks. Legacy Microsoft
//! Office formats (.doc, .xls, .ppt, .msg) are all built on it.
//!
//! # Features
//!
//! - **Read and write**: Open existing containers, edit them in memory and
//!   save a freshly laid out image
//! - **Version 3 and 4**: 512-byte and 4096-byte sectors
//! - **Mini stream**: Small documents are stored in 64-byte units and move to
//!   regular blocks transparently when they grow
//! - **Best-effort recovery**: Damaged containers open with every problem
//!   recorded, or fail fast in strict mode
//! - **Tree helpers**: Copy and compare subtrees across containers
//!
//! # Example - Reading a stream
//!
//! ```no_run
//! use cfbstore::CompoundFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = CompoundFile::open_path("document.doc")?;
//!
//! for path in file.list_streams()? {
//!     println!("Stream: {}", path.join("/"));
//! }
//!
//! let data = file.open_stream(&["WordDocument"])?;
//! println!("Stream size: {} bytes", data.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Editing through handles
//!
//! ```no_run
//! use cfbstore::{CompoundFile, ContainerOptions, OpenMode};
//! use std::io::Write;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = CompoundFile::create(ContainerOptions::default());
//! let root = file.root();
//! let storage = file.create_directory(root, "Storage")?;
//! let doc = file.create_document(storage, "Contents", 0)?;
//!
//! let mut cursor = file.open_document(doc, OpenMode::ReadWrite)?;
//! cursor.write_all(b"hello")?;
//!
//! file.save("out.cfb")?;
//! # Ok(())
//! # }
//! ```

/// Allocation tables (FAT, Mini-FAT) and DIFAT traversal
pub mod alloc;

/// Block-addressed access to the backing medium
pub mod block_store;

/// Container and save options
pub mod config;

/// Format constants
pub mod consts;

/// Error types
pub mod error;

/// The open container
pub mod file;

/// Compound file header
pub mod header;

/// Directory entries and the in-memory entry table
pub mod property;

/// Byte-level document access
pub mod stream;

/// Directory tree navigation and editing
pub mod tree;

/// Serialization of a container into a fresh image
pub mod writer;

pub use alloc::TableKind;
pub use config::{ContainerOptions, SaveOptions, SectorSize, SiblingOrder};
pub use error::{CfbError, Result};
pub use file::CompoundFile;
pub use header::is_compound_file;
pub use property::{EntryId, EntryType, Property};
pub use stream::{OpenMode, StreamCursor};
pub use tree::{Entry, FilteringDirectory, copy_nodes, directories_equal, documents_equal};
