//! Directory entries ("properties") and the table that holds them.

/// 128-byte directory entry codec
mod entry;

/// Sibling ordering rules
mod ordering;

/// In-memory directory table
mod table;

pub use entry::{
    EntryType, Property, datetime_to_filetime, empty_slot, filetime_to_datetime, validate_name,
};
pub use ordering::{compare_names, name_key};
pub use table::{EntryId, Node, PropertyTable};
