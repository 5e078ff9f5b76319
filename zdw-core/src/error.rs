//! Error types for ZDW conversion and unconversion.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZdwError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input file does not carry the `.sql` extension, or could not be read.
    #[error("missing or unreadable .sql input: {0}")]
    MissingSqlFile(String),

    /// The `.desc.sql` sidecar is absent.
    #[error("missing .desc.sql sidecar: {0}")]
    MissingDescFile(String),

    /// A content line of the `.desc.sql` sidecar has no tab-separated type.
    #[error("desc file is missing type info")]
    DescFileMissingTypeInfo,

    #[error("could not open {0} for reading")]
    FileOpenErr(String),

    #[error("could not create {0}")]
    FileCreationErr(String),

    #[error("could not open temp file {0}")]
    CantOpenTempFile(String),

    /// Metadata file line without `key=value` shape.
    #[error("bad metadata file: line {line}")]
    BadMetadataFile { line: usize },

    /// Metadata key contains `=`/newline, or value contains a newline.
    #[error("invalid metadata parameter")]
    BadMetadataParam,

    /// Row arity mismatch against the schema; `row` is 1-based over the
    /// whole input, not the current block.
    #[error("row {row} does not have the expected number of columns")]
    WrongNumOfColumnsOnARow { row: u64 },

    /// The dictionary budget is exhausted and even a single row will not fit.
    #[error("out of memory: dictionary budget exhausted before any row was stored")]
    OutOfMemory,

    #[error("unsupported ZDW version {version} (max supported {max})")]
    UnsupportedZdwVersion { version: u16, max: u16 },

    /// Short read from the underlying transport.
    #[error("short read from input transport")]
    GzreadFailed,

    /// Dictionary index out of range, or similar structural damage.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// A block held fewer rows than its header promised.
    #[error("rows unpacked do not match the block header row count")]
    RowCountMismatch,

    /// Bytes remain after the terminal block.
    #[error("file is longer than expected (trailing bytes after final block)")]
    FileLongerThanExpected,

    /// A requested output column does not exist in the file, or was
    /// requested more than once.
    #[error("bad requested column: {0}")]
    BadRequestedColumn(String),

    /// A projection left nothing to output.
    #[error("no requested columns exist in this file")]
    NoColumnsToOutput,

    /// A requested metadata key is not present in the file.
    #[error("metadata key not present: {0}")]
    MetadataKeyNotPresent(String),

    /// Post-encode validation found a byte difference.
    #[error("validation failed: decoded output differs from source data")]
    FilesDiffer,
}

pub type Result<T> = std::result::Result<T, ZdwError>;
