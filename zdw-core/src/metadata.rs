//! File-level metadata: `key=value` pairs carried in the version 11+ header.
//!
//! Keys may contain neither `=` nor a newline; values may not contain a
//! newline. Pairs are stored sorted by key, which makes the wire encoding
//! deterministic.

use crate::error::{Result, ZdwError};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pairs: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.pairs.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check the key/value character constraints for every pair.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.pairs {
            if key.contains('=') || key.contains('\n') || value.contains('\n') {
                return Err(ZdwError::BadMetadataParam);
            }
        }
        Ok(())
    }

    /// Load `key=value` lines from a metadata file. Blank lines are
    /// ignored; a line without `=` is rejected with its 1-based number.
    pub fn load_file(path: &Path) -> Result<Metadata> {
        let file = std::fs::File::open(path)?;
        Self::from_lines(std::io::BufReader::new(file))
    }

    pub fn from_lines<R: BufRead>(reader: R) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ZdwError::BadMetadataFile { line: idx + 1 });
            };
            metadata.insert(key.to_string(), value.to_string());
        }
        Ok(metadata)
    }

    /// Byte length of the wire encoding (pairs only, not the length prefix).
    pub fn wire_len(&self) -> u32 {
        self.pairs
            .iter()
            .map(|(k, v)| k.len() as u32 + v.len() as u32 + 2)
            .sum()
    }

    /// Write the header block: `len: u32` then `(key NUL value NUL)*`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.wire_len().to_le_bytes())?;
        for (key, value) in &self.pairs {
            out.write_all(key.as_bytes())?;
            out.write_all(&[0])?;
            out.write_all(value.as_bytes())?;
            out.write_all(&[0])?;
        }
        Ok(())
    }

    /// Parse the pair bytes of a header metadata block (after the length
    /// prefix has been consumed).
    pub fn from_wire(bytes: &[u8]) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let key_end = find_nul(bytes, pos)?;
            let value_end = find_nul(bytes, key_end + 1)?;
            let key = String::from_utf8_lossy(&bytes[pos..key_end]).into_owned();
            let value = String::from_utf8_lossy(&bytes[key_end + 1..value_end]).into_owned();
            metadata.insert(key, value);
            pos = value_end + 1;
        }
        Ok(metadata)
    }
}

fn find_nul(bytes: &[u8], from: usize) -> Result<usize> {
    bytes[from..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| from + p)
        .ok_or_else(|| ZdwError::CorruptedData("unterminated metadata entry".into()))
}
