//! Read-side dictionary lookup for both dictionary generations.
//!
//! Version 9+ stores one packed buffer: an origin NUL followed by
//! NUL-terminated entries, addressed by 1-based byte offset. Versions
//! before 9 stored an 8-byte-block prefix tree: each entry holds the next
//! eight characters of a value, reversed and right-aligned, plus a
//! back-pointer to the entry carrying the preceding characters.

use crate::error::{Result, ZdwError};

pub enum BlockDictionary {
    Packed {
        /// Origin NUL plus packed entries; `buf.len()` is the advertised size.
        buf: Vec<u8>,
    },
    PrefixTree {
        /// Entry 0 is the chain terminator; entries are 1-based.
        blocks: Vec<[u8; 8]>,
        prev: Vec<u64>,
    },
}

impl BlockDictionary {
    pub fn empty() -> Self {
        BlockDictionary::Packed { buf: Vec::new() }
    }

    /// Number of addressable units: bytes for the packed form, entries for
    /// the prefix tree. Offsets beyond this are corrupt.
    pub fn size(&self) -> u64 {
        match self {
            BlockDictionary::Packed { buf } => buf.len() as u64,
            BlockDictionary::PrefixTree { blocks, .. } => blocks.len().saturating_sub(1) as u64,
        }
    }

    /// Resolve a non-zero offset to the value bytes. The packed form
    /// returns a slice of the buffer; the prefix tree reconstructs into
    /// `scratch`.
    pub fn lookup<'a>(&'a self, offset: u64, scratch: &'a mut Vec<u8>) -> Result<&'a [u8]> {
        if offset > self.size() {
            return Err(ZdwError::CorruptedData(format!(
                "dictionary offset {offset} out of range (size {})",
                self.size()
            )));
        }
        match self {
            BlockDictionary::Packed { buf } => {
                let start = offset as usize;
                if start >= buf.len() {
                    return Ok(&[]);
                }
                let rest = &buf[start..];
                match rest.iter().position(|&b| b == 0) {
                    Some(end) => Ok(&rest[..end]),
                    None => Err(ZdwError::CorruptedData(
                        "unterminated dictionary entry".into(),
                    )),
                }
            }
            BlockDictionary::PrefixTree { blocks, prev } => {
                scratch.clear();
                let mut idx = offset;
                while idx > 0 {
                    let i = idx as usize;
                    if i >= blocks.len() {
                        return Err(ZdwError::CorruptedData(format!(
                            "prefix-tree index {idx} out of range"
                        )));
                    }
                    scratch.extend_from_slice(&blocks[i]);
                    let next = prev[i];
                    if next >= idx {
                        // back-pointers must strictly decrease or the chain cycles
                        return Err(ZdwError::CorruptedData(
                            "prefix-tree back-pointer does not decrease".into(),
                        ));
                    }
                    idx = next;
                }
                scratch.reverse();
                let len = scratch.iter().position(|&b| b == 0).unwrap_or(scratch.len());
                scratch.truncate(len);
                Ok(&scratch[..])
            }
        }
    }
}

/// Pre-version-8 visitor-ID dictionary. `VISID_HIGH` fields index this
/// table directly; the matching `VISID_LOW` value is the entry the
/// back-pointer designates.
pub struct VisitorDictionary {
    ids: Vec<u64>,
    prev: Vec<u64>,
}

impl VisitorDictionary {
    pub fn empty() -> Self {
        Self {
            ids: vec![0],
            prev: vec![0],
        }
    }

    pub fn from_entries(ids: Vec<u64>, prev: Vec<u64>) -> Self {
        debug_assert_eq!(ids.len(), prev.len());
        Self { ids, prev }
    }

    pub fn len(&self) -> u64 {
        self.ids.len().saturating_sub(1) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `(high, low)` for a visitor index.
    pub fn lookup(&self, index: u64) -> Result<(u64, u64)> {
        if index > self.len() {
            return Err(ZdwError::CorruptedData(format!(
                "visitor index {index} out of range (count {})",
                self.len()
            )));
        }
        let i = index as usize;
        let p = self.prev[i] as usize;
        if p >= self.ids.len() {
            return Err(ZdwError::CorruptedData(
                "visitor back-pointer out of range".into(),
            ));
        }
        Ok((self.ids[i], self.ids[p]))
    }
}
