//! Shared plumbing for the `zdw-convert` / `zdw-unconvert` binaries.

use colored::Colorize;

/// Install a tracing subscriber driven by `RUST_LOG`; silent by default so
/// CLI output stays clean.
pub fn init_tracing() {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "off".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `error:`-prefixed message on stderr.
pub fn print_error(msg: &str) {
    eprintln!("{} {msg}", "error:".red().bold());
}

/// Extra context for version errors on inputs that look still-compressed.
pub fn version_hint(err: &zdw_core::ZdwError) -> Option<&'static str> {
    match err {
        zdw_core::ZdwError::UnsupportedZdwVersion { version, .. } if *version > 10000 => {
            Some("maybe you are trying to read a tar or gzip file?")
        }
        _ => None,
    }
}
