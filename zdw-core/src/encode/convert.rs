//! File-level conversion driver: paths, sidecars, the compressor pipe, and
//! post-encode validation.
//!
//! Output is streamed through an external compressor process into
//! `<stub>.creating.zdw.<ext>` and renamed to `<stub>.zdw.<ext>` once the
//! whole file (and optional validation) has succeeded; a failed conversion
//! leaves nothing behind.

use super::spill;
use super::{EncodeOptions, EncodeSummary, Encoder};
use crate::decode::output::DirectSink;
use crate::decode::Decoder;
use crate::error::{Result, ZdwError};
use crate::memory::MemoryLimit;
use crate::metadata::Metadata;
use crate::schema::Schema;
use crate::tokenizer::RowTokenizer;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compressor {
    #[default]
    Gzip,
    Bzip2,
    Xz,
}

impl Compressor {
    pub fn extension(self) -> &'static str {
        match self {
            Compressor::Gzip => ".gz",
            Compressor::Bzip2 => ".bz2",
            Compressor::Xz => ".xz",
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Compressor::Gzip => "gzip",
            Compressor::Bzip2 => "bzip2",
            Compressor::Xz => "xz",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub compressor: Compressor,
    pub output_dir: Option<PathBuf>,
    pub trim_trailing_spaces: bool,
    /// Re-decode the finished file and byte-compare it against the source.
    pub validate: bool,
    pub metadata: Metadata,
    /// Extra arguments for the compressor process.
    pub compressor_args: Vec<String>,
    pub memory_limit: Option<MemoryLimit>,
}

#[derive(Debug)]
pub struct ConvertSummary {
    pub rows: u64,
    pub blocks: usize,
    pub output_path: PathBuf,
}

/// Convert `<stub>.sql` (with its `<stub>.desc.sql` sidecar) into
/// `<stub>.zdw.<ext>`.
pub fn convert_file(input: &Path, opts: &ConvertOptions) -> Result<ConvertSummary> {
    let input_str = input.to_string_lossy().into_owned();
    let stub = input_str
        .strip_suffix(".sql")
        .ok_or_else(|| ZdwError::MissingSqlFile(input_str.clone()))?
        .to_string();

    let source = File::open(&input_str).map_err(|_| ZdwError::MissingSqlFile(input_str.clone()))?;
    run_conversion(&stub, SourceKind::File(source), opts)
}

/// Convert rows read from standard input. `name` is the implied source
/// filename and must carry the `.sql` extension; it determines the output
/// stub.
pub fn convert_stdin(name: &str, opts: &ConvertOptions) -> Result<ConvertSummary> {
    let stub = name
        .strip_suffix(".sql")
        .ok_or_else(|| ZdwError::MissingSqlFile(name.to_string()))?
        .to_string();
    run_conversion(&stub, SourceKind::Stdin, opts)
}

enum SourceKind {
    File(File),
    Stdin,
}

fn run_conversion(stub: &str, source: SourceKind, opts: &ConvertOptions) -> Result<ConvertSummary> {
    let desc_path = format!("{stub}.desc.sql");
    let desc = File::open(&desc_path).map_err(|_| ZdwError::MissingDescFile(desc_path.clone()))?;
    let schema = Schema::from_desc(BufReader::new(desc))?;

    let mut metadata = opts.metadata.clone();
    if metadata.is_empty() {
        let metadata_path = PathBuf::from(format!("{stub}.metadata"));
        if metadata_path.exists() {
            metadata = Metadata::load_file(&metadata_path)?;
        }
    }
    metadata.validate()?;

    // Output lands next to the source unless a directory was given.
    let out_base: PathBuf = match &opts.output_dir {
        Some(dir) => {
            let base = stub.rsplit('/').next().unwrap_or(stub);
            dir.join(base)
        }
        None => PathBuf::from(stub),
    };
    let ext = opts.compressor.extension();
    let final_path = path_with_suffix(&out_base, &format!(".zdw{ext}"));
    let temp_path = path_with_suffix(&out_base, &format!(".creating.zdw{ext}"));

    let result = encode_to_temp(source, opts, &schema, metadata, &out_base, &temp_path);

    match result {
        Ok((summary, streamed)) => {
            let validation = if opts.validate {
                validate_output(&temp_path, stub, opts, streamed, &summary.spill_files)
            } else {
                Ok(())
            };
            spill::remove_spills(&summary.spill_files);
            if let Err(e) = validation {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }

            std::fs::rename(&temp_path, &final_path)
                .map_err(|_| ZdwError::FileCreationErr(final_path.display().to_string()))?;
            debug!(path = %final_path.display(), rows = summary.rows, "conversion complete");
            Ok(ConvertSummary {
                rows: summary.rows,
                blocks: summary.blocks,
                output_path: final_path,
            })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            remove_spills_by_probe(&out_base);
            Err(e)
        }
    }
}

fn encode_to_temp(
    source: SourceKind,
    opts: &ConvertOptions,
    schema: &Schema,
    metadata: Metadata,
    out_base: &Path,
    temp_path: &Path,
) -> Result<(EncodeSummary, bool)> {
    let temp_file = File::create(temp_path)
        .map_err(|_| ZdwError::FileCreationErr(temp_path.display().to_string()))?;
    let mut child = spawn_compressor(opts, temp_file)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ZdwError::FileCreationErr(temp_path.display().to_string()))?;
    let mut out = BufWriter::new(stdin);

    let encode_opts = EncodeOptions {
        trim_trailing_spaces: opts.trim_trailing_spaces,
        memory_limit: opts.memory_limit.unwrap_or_default(),
        metadata,
    };
    let mut encoder = Encoder::new(schema.clone(), encode_opts);

    let encoded = match source {
        SourceKind::File(file) => encoder.encode_file(file, &mut out).map(|s| (s, false)),
        SourceKind::Stdin => {
            let stdin_reader: Box<dyn BufRead + Send> =
                Box::new(BufReader::new(io::stdin()));
            encoder
                .encode_stream(stdin_reader, out_base, &mut out)
                .map(|s| (s, true))
        }
    };

    // Close the pipe before waiting, or the compressor never sees EOF.
    let flushed = out.flush();
    drop(out);
    let status = child.wait()?;

    let (summary, streamed) = encoded?;
    flushed?;
    if !status.success() {
        warn!(compressor = opts.compressor.command(), ?status, "compressor failed");
        return Err(ZdwError::FileCreationErr(temp_path.display().to_string()));
    }
    Ok((summary, streamed))
}

fn spawn_compressor(opts: &ConvertOptions, temp_file: File) -> Result<Child> {
    Command::new(opts.compressor.command())
        .args(&opts.compressor_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(temp_file))
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| {
            ZdwError::FileCreationErr(format!(
                "{} (compressor process)",
                opts.compressor.command()
            ))
        })
}

/// Decode the freshly written file and byte-compare against the source
/// rows. Streaming input compares against the spill files; trim mode
/// compares against a re-tokenized, trimmed rendition of the source.
fn validate_output(
    temp_path: &Path,
    stub: &str,
    opts: &ConvertOptions,
    streamed: bool,
    spill_files: &[PathBuf],
) -> Result<()> {
    let reference: Box<dyn Read> = if streamed {
        let mut readers: Vec<Box<dyn Read>> = Vec::with_capacity(spill_files.len());
        for path in spill_files {
            readers.push(Box::new(spill::open_spill(path)?));
        }
        Box::new(ChainedReader::new(readers))
    } else {
        let source_path = format!("{stub}.sql");
        let file = File::open(&source_path).map_err(|_| ZdwError::MissingSqlFile(source_path))?;
        if opts.trim_trailing_spaces {
            Box::new(TrimmedRows::new(BufReader::new(file)))
        } else {
            Box::new(file)
        }
    };

    let mut decoder = Decoder::open(temp_path, None)?;
    let mut sink = DirectSink::new(CompareWriter::new(BufReader::new(reference)));
    decoder.unconvert(&mut sink)?;
    let mut compare = sink.into_inner();
    if compare.matches()? {
        Ok(())
    } else {
        Err(ZdwError::FilesDiffer)
    }
}

/// Spill file names are deterministic; on an error path the encode summary
/// is gone, so probe upward from piece 0.
fn remove_spills_by_probe(out_base: &Path) {
    for piece in 0.. {
        let path = spill::spill_path(out_base, piece);
        if std::fs::remove_file(&path).is_err() {
            break;
        }
    }
}

fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// `Write` half of validation: compares everything written against a
/// reference stream. Divergence latches; the remaining bytes are swallowed.
struct CompareWriter<R: Read> {
    reference: R,
    diverged: bool,
    buf: Vec<u8>,
}

impl<R: Read> CompareWriter<R> {
    fn new(reference: R) -> Self {
        Self {
            reference,
            diverged: false,
            buf: vec![0u8; 16 * 1024],
        }
    }

    /// True when every written byte matched and the reference is drained.
    fn matches(&mut self) -> io::Result<bool> {
        if self.diverged {
            return Ok(false);
        }
        let mut probe = [0u8; 1];
        Ok(read_full(&mut self.reference, &mut probe)? == 0)
    }
}

impl<R: Read> Write for CompareWriter<R> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.diverged {
            let mut pos = 0usize;
            while pos < data.len() {
                let want = (data.len() - pos).min(self.buf.len());
                let got = read_full(&mut self.reference, &mut self.buf[..want])?;
                if self.buf[..got] != data[pos..pos + got] || got < want {
                    self.diverged = true;
                    break;
                }
                pos += got;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Sequential concatenation of readers (the decompressed spill files).
struct ChainedReader {
    readers: Vec<Box<dyn Read>>,
    current: usize,
}

impl ChainedReader {
    fn new(readers: Vec<Box<dyn Read>>) -> Self {
        Self {
            readers,
            current: 0,
        }
    }
}

impl Read for ChainedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current < self.readers.len() {
            let n = self.readers[self.current].read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

/// Re-emits the source rows through the tokenizer with trailing-space
/// trimming applied, as a byte stream for comparison.
struct TrimmedRows<R: BufRead> {
    input: R,
    tokenizer: RowTokenizer,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: BufRead> TrimmedRows<R> {
    fn new(input: R) -> Self {
        Self {
            input,
            tokenizer: RowTokenizer::new(true),
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;
        if self.done {
            return Ok(());
        }
        if !self.tokenizer.next_row(&mut self.input)? {
            self.done = true;
            return Ok(());
        }
        let row = self.tokenizer.row().to_vec();
        let fields = self.tokenizer.split_fields(&row);
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.pending.push(b'\t');
            }
            self.pending.extend_from_slice(field);
        }
        self.pending.push(b'\n');
        Ok(())
    }
}

impl<R: BufRead> Read for TrimmedRows<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_writer_matches_identical_streams() {
        let mut w = CompareWriter::new(io::Cursor::new(b"hello world".to_vec()));
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        assert!(w.matches().unwrap());
    }

    #[test]
    fn compare_writer_detects_divergence() {
        let mut w = CompareWriter::new(io::Cursor::new(b"hello".to_vec()));
        w.write_all(b"help!").unwrap();
        assert!(!w.matches().unwrap());
    }

    #[test]
    fn compare_writer_detects_leftover_reference() {
        let mut w = CompareWriter::new(io::Cursor::new(b"hello more".to_vec()));
        w.write_all(b"hello").unwrap();
        assert!(!w.matches().unwrap());
    }

    #[test]
    fn compare_writer_detects_overrun() {
        let mut w = CompareWriter::new(io::Cursor::new(b"hi".to_vec()));
        w.write_all(b"hi there").unwrap();
        assert!(!w.matches().unwrap());
    }

    #[test]
    fn trimmed_rows_strips_field_tails() {
        let mut r = TrimmedRows::new(io::Cursor::new(b"a \tb  \nc\t d \n".to_vec()));
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        assert_eq!(out, "a\tb\nc\t d\n");
    }

    #[test]
    fn chained_reader_concatenates() {
        let readers: Vec<Box<dyn Read>> = vec![
            Box::new(io::Cursor::new(b"ab".to_vec())),
            Box::new(io::Cursor::new(b"".to_vec())),
            Box::new(io::Cursor::new(b"cd".to_vec())),
        ];
        let mut out = Vec::new();
        ChainedReader::new(readers).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");
    }
}
