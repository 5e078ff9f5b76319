//! File-level conversion: sidecars, the compressor pipe, temp-file rename,
//! and post-encode validation.
//!
//! These tests spawn the real `gzip` binary, the default output stage.

use std::fs;
use std::path::Path;
use zdw_core::decode::output::DirectSink;
use zdw_core::decode::Decoder;
use zdw_core::{convert_file, ConvertOptions, MemoryLimit, Metadata, ZdwError};

fn write_fixture(dir: &Path, stub: &str, desc: &str, rows: &str) -> std::path::PathBuf {
    fs::write(dir.join(format!("{stub}.desc.sql")), desc).unwrap();
    let sql = dir.join(format!("{stub}.sql"));
    fs::write(&sql, rows).unwrap();
    sql
}

fn decode_file(path: &Path) -> String {
    let mut decoder = Decoder::open(path, None).unwrap();
    let mut sink = DirectSink::new(Vec::new());
    decoder.unconvert(&mut sink).unwrap();
    String::from_utf8(sink.into_inner()).unwrap()
}

#[test]
fn convert_produces_named_gzip_output() {
    let dir = tempfile::tempdir().unwrap();
    let rows = "1\talpha\n2\tbeta\n2\tbeta\n";
    let sql = write_fixture(dir.path(), "export", "id\tint(11)\nname\ttext\n", rows);

    let summary = convert_file(&sql, &ConvertOptions::default()).unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.output_path, dir.path().join("export.zdw.gz"));
    assert!(summary.output_path.exists());
    // the in-progress name must be gone after the rename
    assert!(!dir.path().join("export.creating.zdw.gz").exists());

    assert_eq!(decode_file(&summary.output_path), rows);
}

#[test]
fn convert_validates_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let rows = "a\t1\nb\t2\na\t1\n";
    let sql = write_fixture(dir.path(), "v", "s\ttext\nn\tint(11)\n", rows);

    let opts = ConvertOptions {
        validate: true,
        ..Default::default()
    };
    let summary = convert_file(&sql, &opts).unwrap();
    assert!(summary.output_path.exists());
}

#[test]
fn convert_to_output_directory() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let sql = write_fixture(src.path(), "part", "a\ttext\n", "x\n");

    let opts = ConvertOptions {
        output_dir: Some(dst.path().to_path_buf()),
        ..Default::default()
    };
    let summary = convert_file(&sql, &opts).unwrap();
    assert_eq!(summary.output_path, dst.path().join("part.zdw.gz"));
    assert_eq!(decode_file(&summary.output_path), "x\n");
}

#[test]
fn convert_requires_sql_extension() {
    let err = convert_file(Path::new("rows.txt"), &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, ZdwError::MissingSqlFile(_)));
}

#[test]
fn convert_requires_desc_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let sql = dir.path().join("lonely.sql");
    fs::write(&sql, "1\n").unwrap();
    let err = convert_file(&sql, &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, ZdwError::MissingDescFile(_)));
}

#[test]
fn implicit_metadata_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let sql = write_fixture(dir.path(), "m", "a\ttext\n", "x\n");
    fs::write(dir.path().join("m.metadata"), "origin=nightly\n").unwrap();

    let summary = convert_file(&sql, &ConvertOptions::default()).unwrap();
    let mut decoder = Decoder::open(&summary.output_path, None).unwrap();
    decoder.read_header().unwrap();
    assert_eq!(decoder.metadata().get("origin"), Some("nightly"));
}

#[test]
fn explicit_metadata_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let sql = write_fixture(dir.path(), "m2", "a\ttext\n", "x\n");
    fs::write(dir.path().join("m2.metadata"), "origin=nightly\n").unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("origin".into(), "manual".into());
    let opts = ConvertOptions {
        metadata,
        ..Default::default()
    };
    let summary = convert_file(&sql, &opts).unwrap();
    let mut decoder = Decoder::open(&summary.output_path, None).unwrap();
    decoder.read_header().unwrap();
    assert_eq!(decoder.metadata().get("origin"), Some("manual"));
}

#[test]
fn bad_metadata_pairs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sql = write_fixture(dir.path(), "bad", "a\ttext\n", "x\n");

    let mut metadata = Metadata::new();
    metadata.insert("key=broken".into(), "v".into());
    let opts = ConvertOptions {
        metadata,
        ..Default::default()
    };
    let err = convert_file(&sql, &opts).unwrap_err();
    assert!(matches!(err, ZdwError::BadMetadataParam));
    assert!(!dir.path().join("bad.zdw.gz").exists());
    assert!(!dir.path().join("bad.creating.zdw.gz").exists());
}

#[test]
fn failed_conversion_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    // second row has the wrong arity
    let sql = write_fixture(dir.path(), "torn", "a\tint(11)\nb\tint(11)\n", "1\t2\n3\n");

    let err = convert_file(&sql, &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, ZdwError::WrongNumOfColumnsOnARow { row: 2 }));
    assert!(!dir.path().join("torn.zdw.gz").exists());
    assert!(!dir.path().join("torn.creating.zdw.gz").exists());
}

#[test]
fn out_of_memory_conversion_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let sql = write_fixture(dir.path(), "oom", "s\ttext\n", "abc\n");

    let opts = ConvertOptions {
        memory_limit: Some(MemoryLimit::from_mb(0)),
        ..Default::default()
    };
    let err = convert_file(&sql, &opts).unwrap_err();
    assert!(matches!(err, ZdwError::OutOfMemory));
    assert!(!dir.path().join("oom.zdw.gz").exists());
    assert!(!dir.path().join("oom.creating.zdw.gz").exists());
}

#[test]
fn trim_mode_validates_against_trimmed_source() {
    let dir = tempfile::tempdir().unwrap();
    let sql = write_fixture(dir.path(), "trim", "a\ttext\nb\ttext\n", "x \ty  \nz\tw\n");

    let opts = ConvertOptions {
        trim_trailing_spaces: true,
        validate: true,
        ..Default::default()
    };
    let summary = convert_file(&sql, &opts).unwrap();
    assert_eq!(decode_file(&summary.output_path), "x\ty\nz\tw\n");
}
