//! Decoder driver: restores `.zdw*` containers to tab-delimited text.

use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zdw_cli::{init_tracing, print_error, version_hint};
use zdw_core::decode::output::{DirectSink, NullSink, OrderedSink};
use zdw_core::decode::strip_zdw_basename;
use zdw_core::{ColumnSelection, Decoder, InclusionRule, ZdwError};

#[derive(Parser)]
#[command(
    name = "zdw-unconvert",
    about = "Restore ZDW containers to tab-delimited text",
    version
)]
struct Cli {
    /// Input .zdw files (with -i: an optional output basename for stdin)
    files: Vec<String>,

    /// Place output files in this directory (default: alongside the input)
    #[arg(short = 'd', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Comma-separated column names to output, in the given order;
    /// unknown or duplicate names are errors
    #[arg(short = 'c', long = "columns", value_name = "NAMES")]
    columns: Option<String>,

    /// Like -c, but silently skip unknown and duplicate names
    #[arg(long = "ci", value_name = "NAMES", conflicts_with = "columns")]
    columns_lenient: Option<String>,

    /// Like -c, but emit an empty column where a requested name is absent
    #[arg(
        long = "ce",
        value_name = "NAMES",
        conflicts_with_all = ["columns", "columns_lenient"]
    )]
    columns_pad: Option<String>,

    /// Output every column except these, in file order
    #[arg(
        long = "cx",
        value_name = "NAMES",
        conflicts_with_all = ["columns", "columns_lenient", "columns_pad"]
    )]
    columns_exclude: Option<String>,

    /// Read ZDW data from stdin (output goes to stdout unless a filename
    /// argument provides an output name)
    #[arg(short = 'i', long = "stdin")]
    stdin: bool,

    /// Write only the .desc file, then exit
    #[arg(short = 'o', long = "desc-only")]
    desc_only: bool,

    /// No progress output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Show basic file statistics only
    #[arg(short = 's', long = "stats")]
    stats: bool,

    /// Test file integrity without writing output
    #[arg(short = 't', long = "test")]
    test_only: bool,

    /// Show row progress
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Give output files no extension (default: .sql)
    #[arg(short = 'w', long = "no-extension")]
    no_extension: bool,

    /// Use this extension for output files instead of .sql
    #[arg(short = 'a', long = "extension", value_name = "EXT")]
    extension: Option<String>,

    /// Stream the restored text to stdout (no .desc file)
    #[arg(long)]
    stdout: bool,

    /// Print the file metadata and exit
    #[arg(long = "metadata-only")]
    metadata_only: bool,

    /// With --metadata-only: print only these comma-separated keys
    #[arg(long = "metadata-keys", value_name = "KEYS")]
    metadata_keys: Option<String>,

    /// Missing --metadata-keys entries are not an error
    #[arg(long = "allow-missing-keys")]
    allow_missing_keys: bool,
}

// Historical decoder exit codes.
fn err_code(err: &ZdwError) -> u8 {
    match err {
        ZdwError::GzreadFailed => 2,
        ZdwError::FileCreationErr(_) => 3,
        ZdwError::FileOpenErr(_) | ZdwError::MissingSqlFile(_) => 4,
        ZdwError::UnsupportedZdwVersion { .. } => 5,
        ZdwError::FileLongerThanExpected => 6,
        ZdwError::RowCountMismatch => 8,
        ZdwError::CorruptedData(_) => 9,
        ZdwError::BadRequestedColumn(_) => 13,
        ZdwError::NoColumnsToOutput => 14,
        ZdwError::MetadataKeyNotPresent(_) => 17,
        ZdwError::Io(_) => 15,
        _ => 1,
    }
}

fn selection(cli: &Cli) -> Result<Option<ColumnSelection>, ZdwError> {
    let (csv, rule) = if let Some(csv) = &cli.columns {
        (csv, InclusionRule::FailOnInvalid)
    } else if let Some(csv) = &cli.columns_lenient {
        (csv, InclusionRule::SkipInvalid)
    } else if let Some(csv) = &cli.columns_pad {
        (csv, InclusionRule::ProvideEmptyMissing)
    } else if let Some(csv) = &cli.columns_exclude {
        (csv, InclusionRule::ExcludeSpecified)
    } else {
        return Ok(None);
    };
    ColumnSelection::parse(csv, rule).map(Some)
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if !cli.stdin && cli.files.is_empty() {
        print_error("no input files");
        return ExitCode::from(1);
    }

    let mut exit = 0u8;
    if cli.stdin {
        let name = cli.files.first().cloned();
        if let Err(e) = run_one(None, name.as_deref(), &cli) {
            report(&e);
            exit = err_code(&e);
        }
    } else {
        for file in &cli.files {
            if let Err(e) = run_one(Some(Path::new(file)), None, &cli) {
                report(&e);
                exit = err_code(&e);
            }
        }
    }
    ExitCode::from(exit)
}

fn report(err: &ZdwError) {
    print_error(&err.to_string());
    if let Some(hint) = version_hint(err) {
        eprintln!("  {hint}");
    }
}

fn run_one(path: Option<&Path>, stdin_name: Option<&str>, cli: &Cli) -> Result<(), ZdwError> {
    let selection = selection(cli)?;

    let mut decoder = match path {
        Some(path) => Decoder::open(path, selection)?,
        None => Decoder::from_stdin(selection),
    };
    decoder.read_header()?;

    if cli.metadata_only {
        let keys: Option<Vec<String>> = cli
            .metadata_keys
            .as_deref()
            .map(|s| s.split(',').filter(|k| !k.is_empty()).map(str::to_string).collect());
        for line in decoder.metadata_lines(keys.as_deref(), cli.allow_missing_keys)? {
            println!("{line}");
        }
        return Ok(());
    }

    if cli.stats {
        let mut sink = NullSink;
        decoder.unconvert(&mut sink)?;
        println!("File version {}", decoder.version());
        for (i, stats) in decoder.block_stats().iter().enumerate() {
            println!(
                "Block {}: rows={} max_line_length={} dictionary_bytes={} delta_bits_set={}",
                i + 1,
                stats.rows,
                stats.line_len,
                stats.dict_size,
                stats.bits_set
            );
        }
        return Ok(());
    }

    if cli.test_only {
        let mut sink = NullSink;
        let rows = decoder.unconvert(&mut sink)?;
        if !cli.quiet {
            eprintln!("{} tested good ({rows} rows)", input_display(path));
        }
        return Ok(());
    }

    // Output naming: strip the directory and every .zdw* suffix.
    let to_stdout = cli.stdout || (path.is_none() && stdin_name.is_none());
    let basename = match (path, stdin_name) {
        (Some(p), _) => strip_zdw_basename(&p.to_string_lossy()),
        (None, Some(name)) => name.to_string(),
        (None, None) => "stdin".to_string(),
    };
    let out_dir: PathBuf = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => path
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let ext = if cli.no_extension {
        String::new()
    } else {
        cli.extension.clone().unwrap_or_else(|| ".sql".to_string())
    };

    if cli.desc_only {
        if to_stdout {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for line in decoder.desc_lines() {
                writeln!(out, "{line}")?;
            }
        } else {
            write_desc(&decoder, &out_dir, &basename, &ext)?;
        }
        return Ok(());
    }

    if !to_stdout {
        write_desc(&decoder, &out_dir, &basename, &ext)?;
        if !decoder.metadata().is_empty() {
            let path = out_dir.join(format!("{basename}.metadata"));
            let mut out = BufWriter::new(create_file(&path)?);
            for (k, v) in decoder.metadata().iter() {
                writeln!(out, "{k}={v}")?;
            }
            out.flush()?;
        }
    }

    let rows = {
        let out: Box<dyn Write> = if to_stdout {
            Box::new(std::io::stdout().lock())
        } else {
            let out_path = out_dir.join(format!("{basename}{ext}"));
            if !cli.quiet {
                eprintln!("Writing {}", out_path.display());
            }
            Box::new(create_file(&out_path)?)
        };
        let out = BufWriter::new(out);

        match decoder.ordered_routing() {
            Some((routing, positions)) => {
                let mut sink = OrderedSink::new(out, routing, positions);
                decoder.unconvert(&mut sink)?
            }
            None => {
                let mut sink = DirectSink::new(out);
                decoder.unconvert(&mut sink)?
            }
        }
    };

    if cli.verbose && !cli.quiet {
        eprintln!("{rows} rows");
    }
    if !cli.quiet {
        eprintln!("{} uncompressed", input_display(path));
    }
    Ok(())
}

fn write_desc(
    decoder: &Decoder,
    out_dir: &Path,
    basename: &str,
    ext: &str,
) -> Result<(), ZdwError> {
    let path = out_dir.join(format!("{basename}.desc{ext}"));
    let mut out = BufWriter::new(create_file(&path)?);
    for line in decoder.desc_lines() {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn create_file(path: &Path) -> Result<File, ZdwError> {
    File::create(path).map_err(|_| ZdwError::FileCreationErr(path.display().to_string()))
}

fn input_display(path: Option<&Path>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "stdin".to_string(),
    }
}
