//! Spill files for streaming input.
//!
//! When the encoder reads from a pipe it cannot seek back for the second
//! pass, so every row consumed during pass 1 is copied to a gzip temp file
//! (`<base>.tmp.<n>.gz`) and replayed from there. Spill files are deleted
//! once the block is written, or kept until validation has compared them
//! against the decoded output.

use crate::error::{Result, ZdwError};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct SpillWriter {
    out: GzEncoder<BufWriter<File>>,
    path: PathBuf,
}

impl SpillWriter {
    /// Create `<base>.tmp.<piece>.gz`.
    pub fn create(base: &Path, piece: usize) -> Result<SpillWriter> {
        let path = spill_path(base, piece);
        let file = File::create(&path)
            .map_err(|_| ZdwError::CantOpenTempFile(path.display().to_string()))?;
        Ok(SpillWriter {
            out: GzEncoder::new(BufWriter::new(file), Compression::fast()),
            path,
        })
    }

    /// Append one logical row (LF re-appended).
    pub fn write_row(&mut self, row: &[u8]) -> Result<()> {
        self.out.write_all(row)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Append one row from its split fields (used in trim mode, where the
    /// spilled copy must carry the trimmed bytes).
    pub fn write_fields(&mut self, fields: &[&[u8]]) -> Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.out.write_all(b"\t")?;
            }
            self.out.write_all(field)?;
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Flush and close, returning the finished file's path.
    pub fn finish(self) -> Result<PathBuf> {
        self.out.finish()?.flush()?;
        Ok(self.path)
    }
}

/// Reopen a finished spill file for the second pass.
pub fn open_spill(path: &Path) -> Result<impl BufRead> {
    let file = File::open(path)
        .map_err(|_| ZdwError::CantOpenTempFile(path.display().to_string()))?;
    Ok(BufReader::new(MultiGzDecoder::new(file)))
}

pub fn spill_path(base: &Path, piece: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".tmp.{piece}.gz"));
    PathBuf::from(name)
}

/// Best-effort removal of spill files.
pub fn remove_spills(paths: &[PathBuf]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn round_trips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out");

        let mut w = SpillWriter::create(&base, 0).unwrap();
        w.write_row(b"a\tb").unwrap();
        w.write_fields(&[b"c".as_slice(), b"".as_slice(), b"d".as_slice()])
            .unwrap();
        let path = w.finish().unwrap();
        assert!(path.to_string_lossy().ends_with(".tmp.0.gz"));

        let mut contents = Vec::new();
        open_spill(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"a\tb\nc\t\td\n");

        remove_spills(&[path.clone()]);
        assert!(!path.exists());
    }
}
