//! ZDW encoder: two-pass, multi-block conversion of tab-separated dumps.
//!
//! Pass 1 of each block scans rows, feeding string-like fields into the
//! block dictionary and numeric/char fields into the range tracker, until
//! the input ends or the dictionary reports its memory budget exhausted.
//! Pass 2 replays the same rows (by seeking back, or from a spill file when
//! the input is a pipe) and emits the delta-encoded row stream. Blocks
//! repeat until the input is drained.

mod block;
pub mod convert;
pub mod spill;

pub use convert::{convert_file, convert_stdin, Compressor, ConvertOptions, ConvertSummary};

use crate::dict::DictBuilder;
use crate::error::{Result, ZdwError};
use crate::memory::MemoryLimit;
use crate::metadata::Metadata;
use crate::schema::Schema;
use crate::stats::RangeTracker;
use crate::tokenizer::RowTokenizer;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File format version this encoder writes.
pub const CURRENT_VERSION: u16 = 11;

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub trim_trailing_spaces: bool,
    pub memory_limit: MemoryLimit,
    pub metadata: Metadata,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            trim_trailing_spaces: false,
            memory_limit: MemoryLimit::default(),
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EncodeSummary {
    pub rows: u64,
    pub blocks: usize,
    /// Spill files written for streaming input, in block order. Retained by
    /// the caller until validation is done, then removed.
    pub spill_files: Vec<PathBuf>,
}

/// Where pass 1 reads from, and how pass 2 gets the same rows again.
enum Source {
    Seekable(BufReader<File>),
    Streaming {
        input: Box<dyn BufRead + Send>,
        spill_base: PathBuf,
    },
}

pub struct Encoder {
    schema: Schema,
    opts: EncodeOptions,
    tokenizer: RowTokenizer,
    dict: DictBuilder,
    tracker: RangeTracker,
    /// Total rows encoded so far, for error reporting.
    total_rows: u64,
}

impl Encoder {
    pub fn new(schema: Schema, opts: EncodeOptions) -> Encoder {
        let num_columns = schema.len();
        let tokenizer = RowTokenizer::new(opts.trim_trailing_spaces);
        let dict = DictBuilder::new(opts.memory_limit);
        Encoder {
            schema,
            opts,
            tokenizer,
            dict,
            tracker: RangeTracker::new(num_columns),
            total_rows: 0,
        }
    }

    /// Encode a seekable file into `out` (raw ZDW bytes; the compression
    /// stage wraps `out`).
    pub fn encode_file<W: Write>(&mut self, input: File, out: &mut W) -> Result<EncodeSummary> {
        self.encode(Source::Seekable(BufReader::new(input)), out)
    }

    /// Encode a non-seekable stream, spilling rows to `<spill_base>.tmp.N.gz`
    /// for the second pass.
    pub fn encode_stream<W: Write>(
        &mut self,
        input: Box<dyn BufRead + Send>,
        spill_base: &Path,
        out: &mut W,
    ) -> Result<EncodeSummary> {
        self.encode(
            Source::Streaming {
                input,
                spill_base: spill_base.to_path_buf(),
            },
            out,
        )
    }

    fn encode<W: Write>(&mut self, mut source: Source, out: &mut W) -> Result<EncodeSummary> {
        self.opts.metadata.validate()?;
        self.write_file_header(out)?;

        let mut summary = EncodeSummary::default();
        let mut exhausted = false;
        while !exhausted {
            let _span =
                tracing::debug_span!("zdw_encode_block", block = summary.blocks).entered();

            self.dict.clear();
            self.tracker.reset();

            // Pass 1: scan rows, build dictionary and ranges.
            let pass1 = match &mut source {
                Source::Seekable(reader) => {
                    let begin = reader.stream_position()?;
                    let scan = self.scan_rows(reader, None)?;
                    (scan, Some(begin), None)
                }
                Source::Streaming { input, spill_base } => {
                    let spill = spill::SpillWriter::create(spill_base, summary.blocks)?;
                    let mut spill = Some(spill);
                    let scan = self.scan_rows(input, spill.as_mut())?;
                    let path = spill
                        .take()
                        .expect("spill writer present for streaming pass 1")
                        .finish()?;
                    (scan, None, Some(path))
                }
            };
            let (scan, begin, spill_path) = pass1;
            exhausted = scan.exhausted;

            if let Some(path) = &spill_path {
                summary.spill_files.push(path.clone());
            }

            if scan.rows == 0 {
                // Only end of input leaves a scan empty (a budget trip on a
                // block's first row errors inside scan_rows). Empty input,
                // or trailing skipped lines after a block that went out
                // non-terminal: a zero-row terminal block keeps the file
                // decodable either way.
                debug_assert!(exhausted);
                self.write_empty_terminal_block(out)?;
                summary.blocks += 1;
                break;
            }

            debug!(
                rows = scan.rows,
                dict_entries = self.dict.num_entries(),
                dict_bytes = self.dict.byte_size(),
                "pass 1 complete"
            );

            // Pass 2: replay the rows and emit the encoded block.
            match &mut source {
                Source::Seekable(reader) => {
                    reader.seek(SeekFrom::Start(
                        begin.expect("seekable pass 1 records its start offset"),
                    ))?;
                    self.write_block(reader, out, scan.rows, exhausted)?;
                }
                Source::Streaming { .. } => {
                    let path = spill_path.as_deref().expect("streaming pass 1 spills");
                    let mut replay = spill::open_spill(path)?;
                    self.write_block(&mut replay, out, scan.rows, exhausted)?;
                }
            }

            self.total_rows += u64::from(scan.rows);
            summary.rows += u64::from(scan.rows);
            summary.blocks += 1;
        }

        out.flush()?;
        debug!(
            rows = summary.rows,
            blocks = summary.blocks,
            "encode complete"
        );
        Ok(summary)
    }

    /// File header: version, metadata block, column names, type tags, char
    /// sizes.
    fn write_file_header<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&CURRENT_VERSION.to_le_bytes())?;
        self.opts.metadata.write_to(out)?;

        for column in &self.schema.columns {
            out.write_all(column.name.as_bytes())?;
            out.write_all(&[0])?;
        }
        out.write_all(&[0])?;

        for column in &self.schema.columns {
            out.write_all(&[column.ctype.as_u8()])?;
        }
        for column in &self.schema.columns {
            out.write_all(&column.char_size.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_empty_terminal_block<W: Write>(&mut self, out: &mut W) -> Result<()> {
        out.write_all(&0u32.to_le_bytes())?; // rows
        out.write_all(&self.tokenizer.line_capacity().to_le_bytes())?;
        out.write_all(&[1])?; // terminal
        out.write_all(&[0])?; // empty dictionary
        out.write_all(&vec![0u8; self.schema.len()])?; // no used columns
        Ok(())
    }

    /// Pass 1 over one block's rows. Returns when input is drained or the
    /// dictionary trips its budget (after finishing the row in progress).
    /// A trip on the block's very first row is `OutOfMemory`: that row
    /// cannot be held even by an empty dictionary, so rotation is useless.
    fn scan_rows<R: BufRead>(
        &mut self,
        input: &mut R,
        mut spill: Option<&mut spill::SpillWriter>,
    ) -> Result<ScanResult> {
        let num_columns = self.schema.len();
        let mut rows = 0u32;

        loop {
            if !self.tokenizer.next_row(input)? {
                return Ok(ScanResult {
                    rows,
                    exhausted: true,
                });
            }
            let row = self.tokenizer.row().to_vec();
            let fields = self.tokenizer.split_fields(&row);

            if let Some(spill) = spill.as_deref_mut() {
                if self.tokenizer.trims_trailing_spaces() {
                    spill.write_fields(&fields)?;
                } else {
                    spill.write_row(&row)?;
                }
            }

            if fields.len() != num_columns {
                return Err(ZdwError::WrongNumOfColumnsOnARow {
                    row: self.total_rows + u64::from(rows) + 1,
                });
            }

            let mut fits = true;
            for (c, field) in fields.iter().enumerate() {
                if field.is_empty() {
                    continue;
                }
                let ctype = self.schema.columns[c].ctype;
                if ctype.is_string_like() {
                    self.tracker.mark_used(c);
                    fits &= self.dict.insert(field);
                } else if ctype == crate::types::ColumnType::Char {
                    self.tracker.update(c, block::char_field_value(field));
                } else {
                    debug_assert!(ctype.is_numeric());
                    self.tracker.update(c, block::parse_u64_prefix(field));
                }
            }

            rows += 1;
            if !fits {
                if rows == 1 {
                    // the block's first row alone overflows the budget;
                    // rotating cannot help
                    return Err(ZdwError::OutOfMemory);
                }
                // Budget exceeded: close the block at this row boundary. A
                // peek decides whether this block is also the last one.
                let exhausted = input.fill_buf()?.is_empty();
                return Ok(ScanResult { rows, exhausted });
            }
        }
    }

    /// Emit one block: header, dictionary, column stats, then pass 2 over
    /// the replayed rows.
    fn write_block<R: BufRead, W: Write>(
        &mut self,
        replay: &mut R,
        out: &mut W,
        num_rows: u32,
        last_block: bool,
    ) -> Result<()> {
        out.write_all(&num_rows.to_le_bytes())?;
        out.write_all(&self.tokenizer.line_capacity().to_le_bytes())?;
        out.write_all(&[u8::from(last_block)])?;

        self.dict.serialize(out)?;

        let stats = block::ColumnStats::compute(&self.schema, &self.tracker, &self.dict);
        stats.write(out)?;

        block::write_rows(
            replay,
            out,
            &mut self.tokenizer,
            &self.schema,
            &self.dict,
            &stats,
            num_rows,
        )?;
        Ok(())
    }
}

struct ScanResult {
    rows: u32,
    exhausted: bool,
}
