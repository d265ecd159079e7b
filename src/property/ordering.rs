//! Sibling ordering for directory entries.
//!
//! ## Reference order
//!
//! Microsoft Office and Apache POI sort siblings by:
//!
//! 1. **Name length** in UTF-16 units (shorter names first)
//! 2. **Case-insensitive comparison** for same-length names
//! 3. **Special case**: `_VBA_PROJECT` always comes last
//! 4. **Special case**: names starting with `__` are pushed later
//!
//! Example ordering:
//! - `"Data"` (length 4) comes before `"1Table"` (length 6)
//! - `"1Table"` (length 6) comes before `"WordDocument"` (length 12)
//! - `"ABC"` comes before `"xyz"` (both length 3)
//!
//! Readers accept any order; only bit-exact output depends on this.

use crate::config::SiblingOrder;
use std::cmp::Ordering;

const VBA_PROJECT: &str = "_VBA_PROJECT";

/// Key used for case-insensitive name uniqueness within a directory
pub fn name_key(name: &str) -> String {
    name.to_uppercase()
}

fn utf16_len(name: &str) -> usize {
    name.encode_utf16().count()
}

/// Compare two sibling names under the given ordering
pub fn compare_names(order: SiblingOrder, name1: &str, name2: &str) -> Ordering {
    match order {
        SiblingOrder::Reference => compare_reference(name1, name2),
        SiblingOrder::Lexicographic => name_key(name1).cmp(&name_key(name2)),
    }
}

fn compare_reference(name1: &str, name2: &str) -> Ordering {
    match utf16_len(name1).cmp(&utf16_len(name2)) {
        Ordering::Equal => {
            if name1 == VBA_PROJECT {
                return Ordering::Greater;
            }
            if name2 == VBA_PROJECT {
                return Ordering::Less;
            }
            match (name1.starts_with("__"), name2.starts_with("__")) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => name_key(name1).cmp(&name_key(name2)),
            }
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(order: SiblingOrder, names: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        v.sort_by(|a, b| compare_names(order, a, b));
        v
    }

    #[test]
    fn test_reference_order_length_first() {
        assert_eq!(
            sorted(SiblingOrder::Reference, &["WordDocument", "1Table", "Data"]),
            vec!["Data", "1Table", "WordDocument"]
        );
    }

    #[test]
    fn test_reference_order_special_names() {
        assert_eq!(
            sorted(
                SiblingOrder::Reference,
                &["_VBA_PROJECT", "__SRP_0xyz", "abcdefghijkm", "ABCDEFGHIJKL"]
            ),
            vec!["__SRP_0xyz", "ABCDEFGHIJKL", "abcdefghijkm", "_VBA_PROJECT"]
        );
        assert_eq!(
            sorted(SiblingOrder::Reference, &["__ab", "zzzz"]),
            vec!["zzzz", "__ab"]
        );
    }

    #[test]
    fn test_lexicographic_order() {
        assert_eq!(
            sorted(SiblingOrder::Lexicographic, &["b", "Zeta", "alpha"]),
            vec!["alpha", "b", "Zeta"]
        );
    }

    #[test]
    fn test_name_key_is_case_insensitive() {
        assert_eq!(name_key("EntryA"), name_key("entrya"));
    }
}
