//! End-to-end codec tests: encode raw ZDW bytes, decode them back, and
//! check both the restored text and (for the small fixtures) the exact wire
//! bytes.

use std::fs::File;
use std::io::{Cursor, Write};
use zdw_core::decode::output::DirectSink;
use zdw_core::decode::Decoder;
use zdw_core::input::InputStream;
use zdw_core::schema::Schema;
use zdw_core::{ColumnSelection, EncodeOptions, Encoder, MemoryLimit, Metadata, ZdwError};

fn schema(desc: &str) -> Schema {
    Schema::from_desc(Cursor::new(desc.as_bytes())).unwrap()
}

fn encode(desc: &str, input: &str, opts: EncodeOptions) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.sql");
    File::create(&path)
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();

    let mut encoder = Encoder::new(schema(desc), opts);
    let mut out = Vec::new();
    encoder
        .encode_file(File::open(&path).unwrap(), &mut out)
        .unwrap();
    out
}

fn decoder_for(bytes: &[u8], name: &str, selection: Option<ColumnSelection>) -> Decoder {
    let input = InputStream::from_reader(Box::new(Cursor::new(bytes.to_vec())));
    Decoder::from_input(input, name, selection)
}

fn decode(bytes: &[u8], selection: Option<ColumnSelection>) -> Result<String, ZdwError> {
    let mut decoder = decoder_for(bytes, "test.zdw", selection);
    decoder.read_header()?;
    match decoder.ordered_routing() {
        Some((routing, positions)) => {
            let mut sink =
                zdw_core::decode::output::OrderedSink::new(Vec::new(), routing, positions);
            decoder.unconvert(&mut sink)?;
            Ok(String::from_utf8(sink.into_inner()).unwrap())
        }
        None => {
            let mut sink = DirectSink::new(Vec::new());
            decoder.unconvert(&mut sink)?;
            Ok(String::from_utf8(sink.into_inner()).unwrap())
        }
    }
}

fn round_trip(desc: &str, input: &str) {
    let bytes = encode(desc, input, EncodeOptions::default());
    assert_eq!(decode(&bytes, None).unwrap(), input);
}

// ---------------------------------------------------------------------------
// wire-level fixtures
// ---------------------------------------------------------------------------

#[test]
fn minimal_varchar_wire_bytes() {
    let bytes = encode("c\tvarchar(8)\n", "hi\nhi\nworld\n", EncodeOptions::default());

    let mut expected = Vec::new();
    expected.extend_from_slice(&11u16.to_le_bytes()); // version
    expected.extend_from_slice(&0u32.to_le_bytes()); // empty metadata
    expected.extend_from_slice(b"c\x00\x00"); // column names
    expected.push(0); // VARCHAR
    expected.extend_from_slice(&8u16.to_le_bytes()); // char size
    expected.extend_from_slice(&3u32.to_le_bytes()); // rows
    expected.extend_from_slice(&16384u32.to_le_bytes()); // line length
    expected.push(1); // terminal block
    expected.push(1); // offset width
    expected.push(10); // dictionary size: \0 hi\0 world\0
    expected.extend_from_slice(b"\x00hi\x00world\x00");
    expected.push(1); // col_sizes[c] = offset width
    expected.extend_from_slice(&0u64.to_le_bytes()); // string column: min 0
    expected.extend_from_slice(&[0b001, 0x01]); // row 1: "hi" -> offset 1
    expected.extend_from_slice(&[0b000]); // row 2: same value
    expected.extend_from_slice(&[0b001, 0x04]); // row 3: "world" -> offset 4
    assert_eq!(bytes, expected);

    assert_eq!(decode(&bytes, None).unwrap(), "hi\nhi\nworld\n");
}

#[test]
fn empty_value_delta_bits() {
    let bytes = encode(
        "a\tint(11)\nb\ttext\n",
        "1\t\n1\tx\n",
        EncodeOptions::default(),
    );

    // Block payload starts after: version(2) + meta(4) + names(5) +
    // types(2) + char sizes(4) = 17; block header 9; dict 5; col_sizes 2;
    // mins 16.
    let rows = &bytes[17 + 9 + 5 + 2 + 16..];
    // row 1: only column a differs from the zeroed previous-row vector
    // (b is empty -> stored 0); row 2: only b differs.
    assert_eq!(rows, &[0b01, 0x01, 0b10, 0x01]);

    assert_eq!(decode(&bytes, None).unwrap(), "1\t\n1\tx\n");
}

#[test]
fn corrupt_dictionary_offset_is_detected() {
    let mut bytes = encode("c\tvarchar(8)\n", "hi\nhi\nworld\n", EncodeOptions::default());
    let last = bytes.len() - 1;
    bytes[last] = 0x7f; // offset 127 in a 10-byte dictionary
    assert!(matches!(
        decode(&bytes, None),
        Err(ZdwError::CorruptedData(_))
    ));
}

#[test]
fn trailing_bytes_are_an_error() {
    let mut bytes = encode("c\tvarchar(8)\n", "hi\n", EncodeOptions::default());
    bytes.push(0xab);
    assert!(matches!(
        decode(&bytes, None),
        Err(ZdwError::FileLongerThanExpected)
    ));
}

#[test]
fn future_version_is_rejected() {
    let mut bytes = 12u16.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0; 16]);
    assert!(matches!(
        decode(&bytes, None),
        Err(ZdwError::UnsupportedZdwVersion { version: 12, .. })
    ));

    // a still-gzipped stream reads as a huge version number
    let bytes = vec![0x1f, 0x8b, 0x08, 0x00];
    assert!(matches!(
        decode(&bytes, None),
        Err(ZdwError::UnsupportedZdwVersion { .. })
    ));
}

// ---------------------------------------------------------------------------
// escapes and field edge cases
// ---------------------------------------------------------------------------

#[test]
fn escaped_tab_stays_one_field() {
    round_trip("s\ttext\n", "a\\\tb\n");
}

#[test]
fn escaped_newline_travels_inside_field() {
    round_trip("s\ttext\nt\ttext\n", "a\\\nb\tc\nplain\td\n");
}

#[test]
fn backslash_runs_round_trip() {
    round_trip("s\ttext\n", "x\\\\\ny\\\\\\\tz\n\\\\\n");
}

#[test]
fn char_escape_preserved() {
    // backslash + tab in a char(1) column is stored as two bytes
    round_trip("c\tchar(1)\n", "\\\t\n");
}

#[test]
fn char_plain_values() {
    round_trip("c\tchar(1)\nn\tint(11)\n", "a\t1\nb\t2\na\t3\n");
}

#[test]
fn char2_goes_through_dictionary() {
    round_trip("c\tchar(2)\n", "ab\ncd\nab\n");
}

#[test]
fn carriage_returns_are_data() {
    round_trip("s\ttext\n", "line\r\nplain\n");
}

#[test]
fn empty_string_fields_round_trip() {
    round_trip("a\ttext\nb\tvarchar(4)\n", "\t\nx\t\n\ty\n");
}

// ---------------------------------------------------------------------------
// numeric handling
// ---------------------------------------------------------------------------

#[test]
fn signed_and_unsigned_integers() {
    round_trip(
        "a\ttinyint(3)\nb\tbigint(20) unsigned\nc\tint(11)\n",
        "-5\t18446744073709551615\t-2147483648\n0\t0\t0\n127\t1\t2147483647\n",
    );
}

#[test]
fn repeated_rows_compress_to_empty_bitmaps() {
    let input = "7\tsame\n7\tsame\n7\tsame\n7\tsame\n";
    let bytes = encode("a\tint(11)\nb\ttext\n", input, EncodeOptions::default());
    assert_eq!(decode(&bytes, None).unwrap(), input);

    // rows after the first should be single zero bitmap bytes
    let tail = &bytes[bytes.len() - 3..];
    assert_eq!(tail, &[0, 0, 0]);
}

#[test]
fn decimal_values_round_trip() {
    round_trip(
        "d\tdecimal(24,12)\n",
        "3.140000000000\n-1.500000000000\n3.140000000000\n",
    );
}

#[test]
fn datetime_values_round_trip() {
    round_trip(
        "t\tdatetime\n",
        "2016-03-01 00:00:00\n2016-03-01 00:00:01\n2016-03-01 00:00:00\n",
    );
}

#[test]
fn wide_range_forces_multibyte_widths() {
    round_trip(
        "a\tbigint(20) unsigned\n",
        "1\n65536\n4294967296\n1099511627776\n2\n",
    );
}

// ---------------------------------------------------------------------------
// whole-file behaviors
// ---------------------------------------------------------------------------

#[test]
fn mixed_schema_round_trip() {
    let desc = "id\tint(11) unsigned\nname\tvarchar(32)\nflag\tchar(1)\npair\tchar(2)\n\
                when\tdatetime\namount\tdecimal(24,12)\nnote\ttext\n";
    let input = "\
1\talice\ty\tok\t2016-01-01 10:00:00\t1.000000000000\thello
2\tbob\tn\tno\t2016-01-01 10:00:01\t2.500000000000\tworld
2\tbob\tn\tno\t2016-01-01 10:00:01\t2.500000000000\tworld
3\t\ty\tok\t2016-01-01 10:00:02\t1.000000000000\t
";
    round_trip(desc, input);
}

#[test]
fn empty_input_produces_decodable_file() {
    let bytes = encode("a\ttext\n", "", EncodeOptions::default());
    assert_eq!(decode(&bytes, None).unwrap(), "");
}

#[test]
fn wrong_column_count_reports_row_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.sql");
    File::create(&path)
        .unwrap()
        .write_all(b"1\t2\n1\t2\n1\n")
        .unwrap();

    let mut encoder = Encoder::new(
        schema("a\tint(11)\nb\tint(11)\n"),
        EncodeOptions::default(),
    );
    let mut out = Vec::new();
    let err = encoder
        .encode_file(File::open(&path).unwrap(), &mut out)
        .unwrap_err();
    assert!(matches!(
        err,
        ZdwError::WrongNumOfColumnsOnARow { row: 3 }
    ));
}

#[test]
fn trim_mode_drops_trailing_spaces() {
    let opts = EncodeOptions {
        trim_trailing_spaces: true,
        ..Default::default()
    };
    let bytes = encode("a\ttext\nb\ttext\n", "x  \ty \nkeep\t inner \n", opts);
    assert_eq!(decode(&bytes, None).unwrap(), "x\ty\nkeep\t inner\n");
}

#[test]
fn metadata_travels_in_the_header() {
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), "unit-test".into());
    metadata.insert("export_id".into(), "42".into());
    let opts = EncodeOptions {
        metadata,
        ..Default::default()
    };
    let bytes = encode("a\ttext\n", "x\n", opts);

    let mut decoder = decoder_for(&bytes, "test.zdw", None);
    decoder.read_header().unwrap();
    assert_eq!(decoder.metadata().get("source"), Some("unit-test"));
    assert_eq!(decoder.metadata().get("export_id"), Some("42"));

    let lines = decoder.metadata_lines(None, false).unwrap();
    assert_eq!(lines, vec!["export_id=42", "source=unit-test"]);
}

#[test]
fn block_rotation_under_memory_pressure() {
    // distinct 200-byte values with a 1 MiB budget force several blocks
    let mut input = String::new();
    for i in 0..12_000 {
        input.push_str(&format!("{i:0>200}\n"));
    }
    let opts = EncodeOptions {
        memory_limit: MemoryLimit::from_mb(1),
        ..Default::default()
    };
    let bytes = encode("s\ttext\n", &input, opts);

    let mut decoder = decoder_for(&bytes, "test.zdw", None);
    let mut sink = DirectSink::new(Vec::new());
    let rows = decoder.unconvert(&mut sink).unwrap();
    assert_eq!(rows, 12_000);
    assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), input);

    let stats = decoder.block_stats();
    assert!(stats.len() >= 2, "expected multiple blocks, got {}", stats.len());
    for block in stats {
        assert!(block.dict_size <= 1024 * 1024);
    }
}

#[test]
fn streaming_input_spills_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let spill_base = dir.path().join("out");
    let input = "1\ta\n2\tb\n3\ta\n";

    let mut encoder = Encoder::new(
        schema("n\tint(11)\ns\ttext\n"),
        EncodeOptions::default(),
    );
    let mut out = Vec::new();
    let summary = encoder
        .encode_stream(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            &spill_base,
            &mut out,
        )
        .unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.spill_files.len(), 1);
    assert!(summary.spill_files[0].exists());

    assert_eq!(decode(&out, None).unwrap(), input);
    zdw_core::encode::spill::remove_spills(&summary.spill_files);
}

#[test]
fn first_row_overflowing_the_budget_is_out_of_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.sql");
    File::create(&path)
        .unwrap()
        .write_all(b"abc\ndef\n")
        .unwrap();

    // zero budget: even the very first row cannot be held, and rotating
    // blocks cannot help
    let opts = EncodeOptions {
        memory_limit: MemoryLimit::from_mb(0),
        ..Default::default()
    };
    let mut encoder = Encoder::new(schema("s\ttext\n"), opts);
    let mut out = Vec::new();
    let err = encoder
        .encode_file(File::open(&path).unwrap(), &mut out)
        .unwrap_err();
    assert!(matches!(err, ZdwError::OutOfMemory));
}
