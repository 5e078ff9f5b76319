//! Encoder driver: converts `.sql` dumps (with `.desc.sql` sidecars) into
//! `.zdw.{gz,bz2,xz}` containers.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use zdw_cli::{init_tracing, print_error};
use zdw_core::{Compressor, ConvertOptions, MemoryLimit, Metadata, ZdwError};

#[derive(Parser)]
#[command(
    name = "zdw-convert",
    about = "Convert tab-delimited .sql dumps into ZDW containers",
    version
)]
struct Cli {
    /// Input .sql files (with -i: the implied name of the stdin stream)
    files: Vec<PathBuf>,

    /// Output to this directory (default: same directory as the source)
    #[arg(short = 'd', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Compress with bzip2 (default: gzip)
    #[arg(short = 'b', conflicts_with = "xz")]
    bzip2: bool,

    /// Compress with xz (default: gzip)
    #[arg(short = 'J', long = "xz")]
    xz: bool,

    /// Read row data from stdin; the first file argument names the stream
    #[arg(short = 'i', long = "stdin")]
    streaming: bool,

    /// No status output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Remove the source .sql and .desc.sql after a good conversion
    #[arg(short = 'r', long = "remove-old")]
    remove_old: bool,

    /// Trim trailing spaces from fields (for MySQL 5 exports)
    #[arg(short = 't', long = "trim-trailing-spaces")]
    trim: bool,

    /// Re-decode the finished file and byte-compare it against the source
    #[arg(short = 'v', long)]
    validate: bool,

    /// Extra arguments for the compressor process
    #[arg(long = "zargs", value_name = "ARGS", allow_hyphen_values = true)]
    zargs: Option<String>,

    /// Memory budget in MiB for the block dictionary (default 3072)
    #[arg(long = "mem-limit", value_name = "MB")]
    mem_limit_mb: Option<u64>,

    /// File metadata pair; repeatable
    #[arg(long = "metadata", value_name = "KEY=VALUE")]
    metadata: Vec<String>,

    /// Load file metadata pairs from a key=value file
    #[arg(long = "metadata-file", value_name = "PATH")]
    metadata_file: Option<PathBuf>,
}

// Historical encoder exit codes; the API other tooling greps for.
const EXIT_OK: u8 = 0;
const EXIT_NO_ARGS: u8 = 1;
const EXIT_CONVERSION_FAILED: u8 = 2;
const EXIT_BAD_PARAMETER: u8 = 16;
const EXIT_NO_INPUT_FILES: u8 = 18;
const EXIT_BAD_METADATA_FILE: u8 = 22;

fn err_code_text(err: &ZdwError) -> (u8, &'static str) {
    match err {
        ZdwError::MissingDescFile(_) => (4, "MISSING_DESC_FILE"),
        ZdwError::MissingSqlFile(_) => (5, "MISSING_SQL_FILE"),
        ZdwError::FileCreationErr(_) => (6, "FILE_CREATION_ERR"),
        ZdwError::OutOfMemory => (7, "OUT_OF_MEMORY"),
        ZdwError::FilesDiffer => (10, "FILES_DIFFER"),
        ZdwError::DescFileMissingTypeInfo => (14, "DESC_FILE_MISSING_TYPE_INFO"),
        ZdwError::WrongNumOfColumnsOnARow { .. } => (15, "WRONG_NUM_OF_COLUMNS_ON_A_ROW"),
        ZdwError::CantOpenTempFile(_) => (19, "CANT_OPEN_TEMP_FILE"),
        ZdwError::BadMetadataParam => (21, "BAD_METADATA_PARAMETER"),
        ZdwError::BadMetadataFile { .. } => (22, "BAD_METADATA_FILE"),
        _ => (20, "UNKNOWN_ERROR"),
    }
}

fn main() -> ExitCode {
    init_tracing();

    // No command-line tokens at all is its own historical code, distinct
    // from "flags given but no files".
    if std::env::args().len() <= 1 {
        print_error("no arguments (run with --help for usage)");
        return ExitCode::from(EXIT_NO_ARGS);
    }
    let cli = Cli::parse();

    if cli.files.is_empty() {
        print_error("no input files");
        return ExitCode::from(EXIT_NO_INPUT_FILES);
    }
    if cli.streaming && cli.files.len() > 1 {
        print_error("-i accepts a single implied filename");
        return ExitCode::from(EXIT_BAD_PARAMETER);
    }

    let mut metadata = Metadata::new();
    for pair in &cli.metadata {
        let Some((key, value)) = pair.split_once('=') else {
            print_error(&format!("bad --metadata pair '{pair}'"));
            return ExitCode::from(EXIT_BAD_PARAMETER);
        };
        metadata.insert(key.to_string(), value.to_string());
    }
    if let Some(path) = &cli.metadata_file {
        match Metadata::load_file(path) {
            Ok(loaded) => {
                for (k, v) in loaded.iter() {
                    metadata.insert(k.to_string(), v.to_string());
                }
            }
            Err(e) => {
                print_error(&e.to_string());
                return ExitCode::from(EXIT_BAD_METADATA_FILE);
            }
        }
    }

    let opts = ConvertOptions {
        compressor: if cli.bzip2 {
            Compressor::Bzip2
        } else if cli.xz {
            Compressor::Xz
        } else {
            Compressor::Gzip
        },
        output_dir: cli.output_dir.clone(),
        trim_trailing_spaces: cli.trim,
        validate: cli.validate,
        metadata,
        compressor_args: cli
            .zargs
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        memory_limit: cli.mem_limit_mb.map(MemoryLimit::from_mb),
    };

    let mut failed = false;
    for file in &cli.files {
        let result = if cli.streaming {
            zdw_core::convert_stdin(&file.to_string_lossy(), &opts)
        } else {
            zdw_core::convert_file(file, &opts)
        };

        match result {
            Ok(summary) => {
                if !cli.quiet {
                    eprintln!("Rows={}", summary.rows);
                    eprintln!("{}", summary.output_path.display());
                }
                if cli.remove_old && !cli.streaming {
                    let stub = file.to_string_lossy();
                    let stub = stub.strip_suffix(".sql").unwrap_or(&stub);
                    let _ = std::fs::remove_file(format!("{stub}.desc.sql"));
                    let _ = std::fs::remove_file(format!("{stub}.sql"));
                }
            }
            Err(e) => {
                let (code, text) = err_code_text(&e);
                print_error(&e.to_string());
                if !cli.quiet {
                    eprintln!(
                        "ZDW conversion failed.  Internal error code={code} ({text})"
                    );
                }
                failed = true;
            }
        }
    }

    ExitCode::from(if failed {
        EXIT_CONVERSION_FAILED
    } else {
        EXIT_OK
    })
}
