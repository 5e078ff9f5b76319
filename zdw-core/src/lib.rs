//! ZDW: a column-oriented binary container for tab-separated relational
//! dumps.
//!
//! The encoder turns a `.sql` dump (rows of typed, tab-separated fields,
//! described by a `.desc.sql` sidecar) into a compact block-structured
//! container; the decoder restores the dump byte for byte. Compression
//! comes from three layers: per-block dictionaries of distinct string
//! values (sorted so the outer compressor can exploit shared prefixes),
//! per-column delta bases that shrink numeric fields to their minimal byte
//! width, and a per-row sameness bitmap that elides values repeated from
//! the previous row. Blocks are bounded by a configurable memory budget
//! and are independently decodable.
//!
//! The crate deals in raw ZDW bytes; the outer gzip/bzip2/xz stage runs as
//! a piped child process at the file-level entry points
//! ([`encode::convert_file`] / [`decode::Decoder::open`]).

pub mod decode;
pub mod dict;
pub mod encode;
pub mod error;
pub mod input;
pub mod memory;
pub mod metadata;
pub mod schema;
pub mod stats;
pub mod tokenizer;
pub mod types;

pub use decode::projection::{ColumnSelection, InclusionRule};
pub use decode::Decoder;
pub use encode::{
    convert_file, convert_stdin, Compressor, ConvertOptions, ConvertSummary, EncodeOptions,
    Encoder, CURRENT_VERSION,
};
pub use error::{Result, ZdwError};
pub use memory::MemoryLimit;
pub use metadata::Metadata;
pub use schema::{Column, Schema};
pub use types::ColumnType;
