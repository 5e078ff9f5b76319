//! Write-side dictionary: dedup set of field values with offsets assigned
//! at serialization time.
//!
//! The dedup map is unordered; sortedness of the wire form comes from an
//! explicit byte-wise sort during `serialize`. Sorted output matters: the
//! outer compressor stage exploits runs of shared prefixes.

use crate::error::{Result, ZdwError};
use crate::memory::MemoryLimit;
use crate::stats::byte_width;
use rustc_hash::FxHashMap;
use std::io::Write;

/// Rough per-entry bookkeeping cost (map entry, heap header) charged against
/// the memory budget on top of the string bytes themselves.
const ENTRY_OVERHEAD: u64 = 48;

pub struct DictBuilder {
    /// value -> 1-based byte offset; offsets are zero until `serialize`.
    map: FxHashMap<Box<[u8]>, u64>,
    /// Sum of entry lengths including each NUL terminator.
    string_bytes: u64,
    low_memory: bool,
    serialized: bool,
    limit: MemoryLimit,
}

impl DictBuilder {
    pub fn new(limit: MemoryLimit) -> Self {
        Self {
            map: FxHashMap::default(),
            string_bytes: 0,
            low_memory: false,
            serialized: false,
            limit,
        }
    }

    /// Insert a field value. Returns `false` once the memory budget has been
    /// exceeded; the insertion itself still happens (soft limit), and the
    /// caller is expected to close the current block at the row boundary.
    pub fn insert(&mut self, value: &[u8]) -> bool {
        if !self.map.contains_key(value) {
            self.string_bytes += value.len() as u64 + 1;
            self.map.insert(value.into(), 0);
            if self.limit.exceeded_by(self.estimated_bytes()) {
                self.low_memory = true;
            }
        }
        !self.low_memory
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn num_entries(&self) -> usize {
        self.map.len()
    }

    /// Total serialized buffer length, including the origin NUL byte.
    pub fn byte_size(&self) -> u64 {
        self.string_bytes + 1
    }

    /// Estimated live footprint charged against the memory budget.
    pub fn estimated_bytes(&self) -> u64 {
        self.string_bytes + self.map.len() as u64 * ENTRY_OVERHEAD
    }

    /// Byte width needed to store the largest offset.
    pub fn offset_width(&self) -> u8 {
        byte_width(self.byte_size())
    }

    /// Write the wire encoding and assign offsets.
    ///
    /// Layout: `width u8` (0 for an empty dictionary, nothing follows),
    /// `size` in `width` little-endian bytes, one origin NUL, then each
    /// entry's bytes plus NUL in ascending byte order.
    pub fn serialize<W: Write>(&mut self, out: &mut W) -> Result<()> {
        if self.map.is_empty() {
            out.write_all(&[0])?;
            self.serialized = true;
            return Ok(());
        }

        let width = self.offset_width();
        out.write_all(&[width])?;
        let size = self.byte_size();
        out.write_all(&size.to_le_bytes()[..width as usize])?;
        out.write_all(&[0])?; // origin: offset 0 means "absent"

        let mut entries: Vec<Box<[u8]>> = std::mem::take(&mut self.map).into_keys().collect();
        entries.sort_unstable();

        let mut map =
            FxHashMap::with_capacity_and_hasher(entries.len(), Default::default());
        let mut offset = 1u64;
        for entry in entries {
            out.write_all(&entry)?;
            out.write_all(&[0])?;
            let next = offset + entry.len() as u64 + 1;
            map.insert(entry, offset);
            offset = next;
        }
        debug_assert_eq!(offset, size);
        self.map = map;
        self.serialized = true;
        Ok(())
    }

    /// Offset of a previously inserted value. Only valid after
    /// [`Self::serialize`].
    pub fn offset(&self, value: &[u8]) -> Result<u64> {
        debug_assert!(self.serialized, "offset() before serialize()");
        self.map.get(value).copied().ok_or_else(|| {
            ZdwError::CorruptedData("field value missing from block dictionary".into())
        })
    }

    /// Drop all entries and start a fresh block.
    pub fn clear(&mut self) {
        self.map.clear();
        self.string_bytes = 0;
        self.low_memory = false;
        self.serialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> DictBuilder {
        DictBuilder::new(MemoryLimit::default())
    }

    #[test]
    fn serializes_sorted_with_origin_nul() {
        let mut d = builder();
        assert!(d.insert(b"world"));
        assert!(d.insert(b"hi"));
        assert!(d.insert(b"hi")); // dedup

        let mut buf = Vec::new();
        d.serialize(&mut buf).unwrap();

        // width 1, size 10, origin NUL, "hi\0world\0"
        assert_eq!(buf, b"\x01\x0a\x00hi\x00world\x00".to_vec());
        assert_eq!(d.offset(b"hi").unwrap(), 1);
        assert_eq!(d.offset(b"world").unwrap(), 4);
    }

    #[test]
    fn empty_dictionary_writes_single_zero() {
        let mut d = builder();
        let mut buf = Vec::new();
        d.serialize(&mut buf).unwrap();
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn offset_width_grows_with_size() {
        let mut d = builder();
        assert_eq!(d.offset_width(), 1); // empty: size 1
        for i in 0..40 {
            d.insert(format!("value-{i:04}").as_bytes());
        }
        // 40 entries x 11 bytes + origin = 441 > 255
        assert_eq!(d.offset_width(), 2);
    }

    #[test]
    fn low_memory_trips_and_sticks() {
        let mut d = DictBuilder::new(MemoryLimit::from_mb(0));
        assert!(!d.insert(b"anything"));
        assert!(!d.insert(b"more"));
        d.clear();
        assert!(d.is_empty());
    }

    #[test]
    fn byte_order_sorting_not_lexicographic_locale() {
        let mut d = builder();
        d.insert(b"Z");
        d.insert(b"a");
        d.insert(b"B");
        let mut buf = Vec::new();
        d.serialize(&mut buf).unwrap();
        // ASCII order: B < Z < a
        assert_eq!(&buf[3..], b"B\x00Z\x00a\x00");
    }
}
