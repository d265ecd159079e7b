//! Error types for compound file access.
//!
//! Errors fall into three groups. Structural corruption means the container
//! cannot be trusted, logical misuse means the caller asked for something the
//! tree does not allow, and I/O errors come straight from the backing medium.
use thiserror::Error;

/// Main error type for compound file operations.
#[derive(Error, Debug)]
pub enum CfbError {
    /// IO error from the backing medium
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The data does not start with the compound file signature
    #[error("Not a compound file")]
    NotCompoundFile,

    /// Header fields are inconsistent or unsupported
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A FAT or Mini-FAT chain loops or points outside the table
    #[error("Corrupt chain at block {block}: {reason}")]
    CorruptChain { block: u32, reason: String },

    /// The directory (property) table is malformed
    #[error("Corrupt directory: {0}")]
    CorruptDirectory(String),

    /// Saving was refused because corruption was recorded during open
    #[error("Container was opened with {} recorded problem(s); saving requires an explicit override", .0.len())]
    CorruptContainer(Vec<String>),

    /// A block index beyond the end of the block store
    #[error("Block {index} out of range (block count {count})")]
    OutOfRange { index: u32, count: u32 },

    /// A block write that would leave a gap or has the wrong size
    #[error("Invalid block write: {0}")]
    InvalidWrite(String),

    /// No entry with that name exists in the directory
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// A sibling with the same case-insensitive name already exists
    #[error("Duplicate entry name: {0}")]
    DuplicateName(String),

    /// Tried to delete a directory that still has children
    #[error("Directory is not empty: {0}")]
    NotEmpty(String),

    /// Name is empty, too long, or contains a reserved character
    #[error("Invalid entry name: {0:?}")]
    InvalidName(String),

    /// The entry exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// The entry exists but is not a document
    #[error("Not a document: {0}")]
    NotADocument(String),

    /// Read or truncate past the end of a stream
    #[error("Range {offset}+{length} out of bounds for stream of {size} bytes")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    /// A write would grow a stream past what the container can record
    #[error("Stream of {size} bytes exceeds the container limit of {limit} bytes")]
    StreamTooLarge { size: u64, limit: u64 },

    /// The handle refers to an entry that has been deleted
    #[error("Entry handle used after the entry was deleted")]
    StaleHandle,

    /// Write attempted through a read-only cursor
    #[error("Stream was opened read-only")]
    ReadOnly,

    /// A directory cannot be moved into its own subtree
    #[error("Cannot move {0} into its own subtree")]
    InvalidMove(String),

    /// The root entry cannot be renamed, moved or deleted
    #[error("The root entry cannot be modified this way")]
    RootImmutable,

    /// The writer found its own bookkeeping inconsistent
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl CfbError {
    /// Shorthand for a [`CfbError::CorruptChain`]
    pub(crate) fn chain(block: u32, reason: impl Into<String>) -> Self {
        CfbError::CorruptChain {
            block,
            reason: reason.into(),
        }
    }

    /// True for errors that mean the container itself is damaged
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CfbError::NotCompoundFile
                | CfbError::InvalidHeader(_)
                | CfbError::CorruptChain { .. }
                | CfbError::CorruptDirectory(_)
                | CfbError::CorruptContainer(_)
        )
    }
}

/// Result type for compound file operations.
pub type Result<T> = std::result::Result<T, CfbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(CfbError::chain(3, "loop").is_corruption());
        assert!(CfbError::NotCompoundFile.is_corruption());
        assert!(!CfbError::DuplicateName("a".into()).is_corruption());
        assert!(!CfbError::StaleHandle.is_corruption());
    }

    #[test]
    fn test_messages() {
        let err = CfbError::OutOfBounds {
            offset: 10,
            length: 5,
            size: 12,
        };
        assert_eq!(
            err.to_string(),
            "Range 10+5 out of bounds for stream of 12 bytes"
        );

        let err = CfbError::CorruptContainer(vec!["a".into(), "b".into()]);
        assert!(err.to_string().contains("2 recorded problem(s)"));
    }
}
