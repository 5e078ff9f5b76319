//! Block dictionaries: write-side builder and read-side lookup.
//!
//! Write path assembles the set of distinct string-like field values for one
//! block and serializes them sorted. Read path covers both the version 9+
//! packed form (offset-indexed, NUL-terminated) and the pre-9 prefix-tree
//! form, plus the pre-8 visitor dictionary.

mod builder;
mod reader;

pub use builder::DictBuilder;
pub use reader::{BlockDictionary, VisitorDictionary};
