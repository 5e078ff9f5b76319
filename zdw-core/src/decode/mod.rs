//! ZDW decoder: file header, block parsing, and row reconstruction.
//!
//! Handles format versions 1 through 11. Version fan-out, in brief:
//! versions 1-2 keep the row count and a 16-bit line length in the file
//! header (single block); version 6 widens the per-block line length to 32
//! bits; version 7 adds per-column char sizes; version 8 drops the visitor
//! dictionary; version 9 replaces the 8-char prefix-tree dictionary with
//! the packed sorted form; version 11 adds the metadata block.

pub mod output;
pub mod projection;

use crate::dict::{BlockDictionary, VisitorDictionary};
use crate::error::{Result, ZdwError};
use crate::input::InputStream;
use crate::metadata::Metadata;
use crate::types::{
    ColumnType, VIRTUAL_EXPORT_BASENAME_COLUMN_NAME, VIRTUAL_EXPORT_ROW_COLUMN_NAME,
};
use output::RowSink;
use projection::{ColumnSelection, ResolvedProjection};
use std::path::Path;
use tracing::debug;

/// Highest file version this decoder understands.
pub const MAX_SUPPORTED_VERSION: u16 = 11;

const DECIMAL_FACTOR: f64 = 1_000_000_000_000.0; // versions 2-3
const DECIMAL_FACTOR_VERSION_1: f64 = 1_000_000_000.0;

/// Per-block figures, retained for the statistics display.
#[derive(Debug, Clone, Copy)]
pub struct BlockStats {
    pub rows: u32,
    pub line_len: u32,
    pub dict_size: u64,
    pub bits_set: u64,
}

pub struct Decoder {
    input: InputStream,
    /// Input basename with directories and every trailing `.zdw*` suffix
    /// removed; the value of the virtual basename column.
    basename: String,
    selection: Option<ColumnSelection>,

    version: u16,
    metadata: Metadata,
    column_names: Vec<String>,
    column_types: Vec<ColumnType>,
    char_sizes: Vec<u16>,
    num_export_columns: usize,
    resolved: Option<ResolvedProjection>,
    header_read: bool,

    // versions 1-2 carry these at file level
    v2_num_lines: u32,
    v2_line_len: u32,

    last_block: bool,
    current_row: u64,
    block_stats: Vec<BlockStats>,
}

struct Block {
    num_lines: u32,
    line_len: u32,
    dict: BlockDictionary,
    visitors: VisitorDictionary,
    column_size: Vec<u8>,
    column_base: Vec<u64>,
    column_val: Vec<u64>,
    bitmap: Vec<u8>,
    rows_read: u32,
    bits_set: u64,
    scratch: Vec<u8>,
}

impl Decoder {
    /// Open a `.zdw*` file, picking the transport from its extension.
    pub fn open(path: &Path, selection: Option<ColumnSelection>) -> Result<Decoder> {
        let input = InputStream::open(path)?;
        let name = path.to_string_lossy().into_owned();
        Ok(Self::from_input(input, &name, selection))
    }

    /// Decode raw ZDW bytes from standard input.
    pub fn from_stdin(selection: Option<ColumnSelection>) -> Decoder {
        Self::from_input(InputStream::from_stdin(), "", selection)
    }

    pub fn from_input(
        input: InputStream,
        input_name: &str,
        selection: Option<ColumnSelection>,
    ) -> Decoder {
        Decoder {
            input,
            basename: strip_zdw_basename(input_name),
            selection,
            version: 0,
            metadata: Metadata::new(),
            column_names: Vec::new(),
            column_types: Vec::new(),
            char_sizes: Vec::new(),
            num_export_columns: 0,
            resolved: None,
            header_read: false,
            v2_num_lines: 0,
            v2_line_len: 0,
            last_block: false,
            current_row: 0,
            block_stats: Vec::new(),
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn block_stats(&self) -> &[BlockStats] {
        &self.block_stats
    }

    /// Parse the file header: version, metadata, column names, types, and
    /// char sizes; then resolve the output projection.
    pub fn read_header(&mut self) -> Result<()> {
        debug_assert!(!self.header_read);

        self.version = self.input.read_u16()?;
        if self.version > MAX_SUPPORTED_VERSION {
            return Err(ZdwError::UnsupportedZdwVersion {
                version: self.version,
                max: MAX_SUPPORTED_VERSION,
            });
        }

        if self.version >= 11 {
            let meta_len = self.input.read_u32()? as usize;
            let mut bytes = vec![0u8; meta_len];
            self.input.read_exact(&mut bytes)?;
            self.metadata = Metadata::from_wire(&bytes)?;
        }

        if self.version <= 2 {
            self.v2_num_lines = self.input.read_u32()?;
            self.v2_line_len = u32::from(self.input.read_u16()?);
        }

        // Column names: NUL-terminated strings; an empty name ends the list.
        loop {
            let mut name = Vec::new();
            loop {
                let b = self.input.read_u8()?;
                if b == 0 {
                    break;
                }
                name.push(b);
            }
            if name.is_empty() {
                break;
            }
            self.column_names
                .push(String::from_utf8_lossy(&name).into_owned());
        }
        self.num_export_columns = self.column_names.len();

        let mut types = vec![0u8; self.num_export_columns];
        self.input.read_exact(&mut types)?;
        self.column_types = types
            .iter()
            .map(|&b| ColumnType::from_u8(b))
            .collect::<Result<_>>()?;

        if self.version >= 7 {
            self.char_sizes = Vec::with_capacity(self.num_export_columns);
            for _ in 0..self.num_export_columns {
                self.char_sizes.push(self.input.read_u16()?);
            }
        } else {
            self.char_sizes = vec![0; self.num_export_columns];
        }

        // Virtual columns join the schema only when explicitly requested.
        if let Some(selection) = &self.selection {
            if selection.enables_virtual_basename() {
                self.column_names
                    .push(VIRTUAL_EXPORT_BASENAME_COLUMN_NAME.to_string());
                self.column_types.push(ColumnType::VirtualExportBaseName);
                self.char_sizes.push(self.basename.len() as u16 + 1);
            }
            if selection.enables_virtual_row() {
                self.column_names
                    .push(VIRTUAL_EXPORT_ROW_COLUMN_NAME.to_string());
                self.column_types.push(ColumnType::VirtualExportRow);
                self.char_sizes.push(0);
            }
            self.resolved = Some(selection.resolve(&self.column_names)?);
        }

        self.header_read = true;
        debug!(
            version = self.version,
            columns = self.num_export_columns,
            metadata = self.metadata.len(),
            "zdw header read"
        );
        Ok(())
    }

    /// Build the routing table for an [`output::OrderedSink`]: one output
    /// position per non-ignored column in file order.
    pub fn ordered_routing(&self) -> Option<(Vec<usize>, usize)> {
        let resolved = self.resolved.as_ref()?;
        let routing = resolved
            .output_columns
            .iter()
            .filter(|&&p| p >= 0)
            .map(|&p| p as usize)
            .collect();
        Some((routing, resolved.num_positions))
    }

    /// `.desc` sidecar lines for the columns being output, in output order.
    pub fn desc_lines(&self) -> Vec<String> {
        let (positions, blank_columns) = match &self.resolved {
            Some(r) => (r.num_positions, &r.blank_columns),
            None => {
                return self
                    .column_names
                    .iter()
                    .zip(&self.column_types)
                    .zip(&self.char_sizes)
                    .map(|((name, ctype), &size)| {
                        format!("{name}\t{}", ctype.sql_desc(size))
                    })
                    .collect()
            }
        };

        let mut lines = vec![String::new(); positions];
        if let Some(r) = &self.resolved {
            for (c, &pos) in r.output_columns.iter().enumerate() {
                if pos >= 0 {
                    lines[pos as usize] = format!(
                        "{}\t{}",
                        self.column_names[c],
                        self.column_types[c].sql_desc(self.char_sizes[c])
                    );
                }
            }
        }
        for (&pos, name) in blank_columns {
            lines[pos] = format!("{name}\ttext");
        }
        lines
    }

    /// Decode every block into `sink`. Returns the total row count.
    pub fn unconvert<S: RowSink>(&mut self, sink: &mut S) -> Result<u64> {
        if !self.header_read {
            self.read_header()?;
        }

        let mut total_rows = 0u64;
        loop {
            let mut block = self.parse_block_header()?;
            let _span = tracing::debug_span!(
                "zdw_decode_block",
                rows = block.num_lines,
                dict = block.dict.size()
            )
            .entered();

            while block.rows_read < block.num_lines {
                if self.input.at_eof() {
                    return Err(ZdwError::RowCountMismatch);
                }
                self.read_next_row(&mut block, sink)?;
            }
            total_rows += u64::from(block.rows_read);
            self.block_stats.push(BlockStats {
                rows: block.num_lines,
                line_len: block.line_len,
                dict_size: block.dict.size(),
                bits_set: block.bits_set,
            });
            if self.last_block {
                break;
            }
        }
        sink.flush()?;

        // One extra read: success means trailing bytes follow the terminal
        // block.
        if self.input.read_byte()?.is_some() {
            return Err(ZdwError::FileLongerThanExpected);
        }
        debug!(total_rows, blocks = self.block_stats.len(), "zdw decoded");
        Ok(total_rows)
    }

    fn parse_block_header(&mut self) -> Result<Block> {
        let (num_lines, line_len) = if self.version >= 3 {
            let num_lines = self.input.read_u32()?;
            let line_len = if self.version >= 6 {
                self.input.read_u32()?
            } else {
                u32::from(self.input.read_u16()?)
            };
            self.last_block = self.input.read_u8()? != 0;
            (num_lines, line_len)
        } else {
            self.last_block = true;
            (self.v2_num_lines, self.v2_line_len)
        };

        let dict = self.read_dictionary()?;
        let visitors = if self.version < 8 {
            self.read_visitor_dictionary()?
        } else {
            VisitorDictionary::empty()
        };

        let num_columns = self.column_names.len();
        let mut column_size = vec![0u8; num_columns];
        self.input
            .read_exact(&mut column_size[..self.num_export_columns])?;
        if let Some(&bad) = column_size.iter().find(|&&s| s > 8) {
            return Err(ZdwError::CorruptedData(format!(
                "column width {bad} exceeds 8 bytes"
            )));
        }
        let mut column_base = vec![0u64; num_columns];
        let mut used = 0usize;
        for c in 0..self.num_export_columns {
            if column_size[c] != 0 {
                column_base[c] = self.input.read_u64()?;
                used += 1;
            }
        }

        Ok(Block {
            num_lines,
            line_len,
            dict,
            visitors,
            column_size,
            column_base,
            column_val: vec![0u64; num_columns],
            bitmap: vec![0u8; used.div_ceil(8)],
            rows_read: 0,
            bits_set: 0,
            scratch: Vec::new(),
        })
    }

    fn read_dictionary(&mut self) -> Result<BlockDictionary> {
        let width = self.input.read_u8()?;
        if width == 0 {
            return Ok(BlockDictionary::empty());
        }
        if width > 8 {
            return Err(ZdwError::CorruptedData(format!(
                "dictionary size width {width} exceeds 8 bytes"
            )));
        }
        let size = self.input.read_uint(width as usize)?;

        if self.version >= 9 {
            let mut buf = vec![0u8; size as usize];
            self.input.read_exact(&mut buf)?;
            Ok(BlockDictionary::Packed { buf })
        } else {
            let count = size as usize;
            let mut blocks = Vec::with_capacity(count + 1);
            let mut prev = Vec::with_capacity(count + 1);
            blocks.push([0u8; 8]);
            prev.push(0u64);
            for _ in 0..count {
                let mut chars = [0u8; 8];
                self.input.read_exact(&mut chars)?;
                blocks.push(chars);
                prev.push(self.input.read_uint(width as usize)?);
            }
            Ok(BlockDictionary::PrefixTree { blocks, prev })
        }
    }

    fn read_visitor_dictionary(&mut self) -> Result<VisitorDictionary> {
        let width = self.input.read_u8()?;
        if width == 0 {
            return Ok(VisitorDictionary::empty());
        }
        if width > 8 {
            return Err(ZdwError::CorruptedData(format!(
                "visitor index width {width} exceeds 8 bytes"
            )));
        }
        let count = self.input.read_uint(width as usize)? as usize;
        let mut ids = Vec::with_capacity(count + 1);
        let mut prev = Vec::with_capacity(count + 1);
        ids.push(0u64);
        prev.push(0u64);
        for _ in 0..count {
            ids.push(self.input.read_u64()?);
            prev.push(self.input.read_uint(width as usize)?);
        }
        Ok(VisitorDictionary::from_entries(ids, prev))
    }

    fn read_next_row<S: RowSink>(&mut self, block: &mut Block, sink: &mut S) -> Result<()> {
        self.current_row += 1;
        self.input.read_exact(&mut block.bitmap)?;
        block.bits_set += block
            .bitmap
            .iter()
            .map(|b| u64::from(b.count_ones()))
            .sum::<u64>();

        let mut u = 0usize; // position among used columns
        let mut column_written = false;
        let mut visid_low = 0u64;
        let mut digits = [0u8; 24];

        for c in 0..self.column_names.len() {
            let ctype = self.column_types[c];
            let out_pos = match &self.resolved {
                Some(r) => r.output_columns[c],
                None => c as i32,
            };

            if ctype == ColumnType::VisidLow {
                // Emitted in lockstep with the adjacent VISID_HIGH column.
                if out_pos >= 0 {
                    if column_written {
                        sink.separator()?;
                    }
                    sink.field(fmt_u64(visid_low, &mut digits))?;
                    column_written = true;
                }
                continue;
            }

            if out_pos < 0 {
                // Not selected for output: consume bytes to stay in sync.
                if block.column_size[c] != 0 {
                    if bit_is_set(&block.bitmap, u) {
                        block.column_val[c] =
                            self.input.read_uint(block.column_size[c] as usize)?;
                    }
                    u += 1;
                    if ctype == ColumnType::VisidHigh {
                        let index =
                            block.column_val[c].wrapping_add(block.column_base[c]);
                        let (_, low) = block.visitors.lookup(index)?;
                        visid_low = low;
                    }
                }
                continue;
            }

            if column_written {
                sink.separator()?;
            }

            if block.column_size[c] == 0 {
                self.output_default(ctype, sink)?;
                column_written = true;
                continue;
            }

            if bit_is_set(&block.bitmap, u) {
                block.column_val[c] = self.input.read_uint(block.column_size[c] as usize)?;
            }
            u += 1;
            let val = block.column_val[c];
            let base = block.column_base[c];

            match ctype {
                ColumnType::Varchar
                | ColumnType::Text
                | ColumnType::TinyText
                | ColumnType::MediumText
                | ColumnType::LongText
                | ColumnType::Datetime
                | ColumnType::Char2 => {
                    if val != 0 {
                        let word = block.dict.lookup(val.wrapping_add(base), &mut block.scratch)?;
                        sink.field(word)?;
                    } else {
                        sink.empty_field()?;
                    }
                }
                ColumnType::VisidHigh => {
                    let index = val.wrapping_add(base);
                    let (high, low) = block.visitors.lookup(index)?;
                    sink.field(fmt_u64(high, &mut digits))?;
                    visid_low = low;
                }
                ColumnType::Char => {
                    if val != 0 {
                        if self.version >= 5 {
                            let tuple = val.wrapping_add(base);
                            let low = (tuple & 0xff) as u8;
                            if low == b'\\' {
                                // escaped two-character sequence
                                let pair = [low, ((tuple >> 8) & 0xff) as u8];
                                sink.field(&pair)?;
                            } else if low == 0 {
                                sink.empty_field()?;
                            } else {
                                sink.field(&[low])?;
                            }
                        } else {
                            // pre-v5 stored a single byte, base not applied
                            sink.field(&[(val & 0xff) as u8])?;
                        }
                    } else {
                        sink.empty_field()?;
                    }
                }
                ColumnType::Tiny | ColumnType::Short | ColumnType::Long | ColumnType::LongLong => {
                    let n = if val != 0 { val.wrapping_add(base) } else { 0 };
                    sink.field(fmt_u64(n, &mut digits))?;
                }
                ColumnType::TinySigned
                | ColumnType::ShortSigned
                | ColumnType::LongSigned
                | ColumnType::LongLongSigned => {
                    let n = if val != 0 { val.wrapping_add(base) } else { 0 };
                    sink.field(fmt_i64(n as i64, &mut digits))?;
                }
                ColumnType::Decimal => {
                    if val != 0 {
                        if self.version >= 4 {
                            let word =
                                block.dict.lookup(val.wrapping_add(base), &mut block.scratch)?;
                            sink.field(word)?;
                        } else {
                            let factor = if self.version == 1 {
                                DECIMAL_FACTOR_VERSION_1
                            } else {
                                DECIMAL_FACTOR
                            };
                            let text = format!(
                                "{:.12}",
                                val.wrapping_add(base) as f64 / factor
                            );
                            sink.field(text.as_bytes())?;
                        }
                    } else {
                        self.output_default(ColumnType::Decimal, sink)?;
                    }
                }
                ColumnType::VisidLow
                | ColumnType::VirtualExportBaseName
                | ColumnType::VirtualExportRow => {
                    // these never carry block storage
                    return Err(ZdwError::CorruptedData(format!(
                        "column type {:?} has storage bytes",
                        ctype
                    )));
                }
            }
            column_written = true;
        }

        sink.end_row()?;
        block.rows_read += 1;
        Ok(())
    }

    /// Default value for a column with no storage this block.
    fn output_default<S: RowSink>(&self, ctype: ColumnType, sink: &mut S) -> Result<()> {
        let mut digits = [0u8; 24];
        match ctype {
            ColumnType::Char
            | ColumnType::Varchar
            | ColumnType::Text
            | ColumnType::TinyText
            | ColumnType::MediumText
            | ColumnType::LongText
            | ColumnType::Datetime
            | ColumnType::Char2 => sink.empty_field()?,
            ColumnType::VisidHigh
            | ColumnType::VisidLow
            | ColumnType::Tiny
            | ColumnType::TinySigned
            | ColumnType::Short
            | ColumnType::ShortSigned
            | ColumnType::Long
            | ColumnType::LongSigned
            | ColumnType::LongLong
            | ColumnType::LongLongSigned => sink.field(b"0")?,
            ColumnType::Decimal => sink.field(b"0.000000000000")?,
            ColumnType::VirtualExportBaseName => sink.field(self.basename.as_bytes())?,
            ColumnType::VirtualExportRow => {
                sink.field(fmt_u64(self.current_row, &mut digits))?
            }
        }
        Ok(())
    }

    /// Decoder-side view of the metadata output modes: all pairs, or a
    /// selected key set.
    pub fn metadata_lines(
        &self,
        keys: Option<&[String]>,
        allow_missing: bool,
    ) -> Result<Vec<String>> {
        match keys {
            None => Ok(self
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect()),
            Some(keys) => {
                let mut lines = Vec::with_capacity(keys.len());
                for key in keys {
                    match self.metadata.get(key) {
                        Some(value) => lines.push(format!("{key}={value}")),
                        None if allow_missing => {}
                        None => {
                            return Err(ZdwError::MetadataKeyNotPresent(key.clone()))
                        }
                    }
                }
                Ok(lines)
            }
        }
    }
}

#[inline]
fn bit_is_set(bitmap: &[u8], u: usize) -> bool {
    bitmap[u / 8] & (1u8 << (u % 8)) != 0
}

/// Format an unsigned value into `buf`, returning the digit slice.
fn fmt_u64(mut value: u64, buf: &mut [u8; 24]) -> &[u8] {
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[pos..]
}

/// Signed variant of [`fmt_u64`].
fn fmt_i64(value: i64, buf: &mut [u8; 24]) -> &[u8] {
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        buf[pos] = b'-';
    }
    &buf[pos..]
}

/// Strip directory components and every trailing `.zdw*` suffix from an
/// input path, yielding the virtual basename column value.
pub fn strip_zdw_basename(input_name: &str) -> String {
    if input_name.is_empty() {
        return String::new();
    }
    let base = input_name
        .rsplit('/')
        .next()
        .unwrap_or(input_name);
    match base.rfind(".zdw") {
        Some(pos) => base[..pos].to_string(),
        None => base.to_string(),
    }
}
