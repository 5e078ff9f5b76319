//! Block internals: per-column stats and the pass-2 row emitter.

use crate::dict::DictBuilder;
use crate::error::{Result, ZdwError};
use crate::schema::Schema;
use crate::stats::{byte_width, RangeTracker};
use crate::tokenizer::RowTokenizer;
use std::io::{BufRead, Write};

/// Per-column storage decisions for one block.
pub(crate) struct ColumnStats {
    /// Stored byte width per column; 0 = unused this block.
    pub sizes: Vec<u8>,
    /// Delta base per column (already decremented for char/numeric columns;
    /// zero for string-like and unused columns).
    pub mins: Vec<u64>,
    /// Indices of used columns, in column order.
    pub used: Vec<usize>,
}

impl ColumnStats {
    /// Decide widths and delta bases from the pass-1 ranges.
    ///
    /// For char/numeric columns the observed minimum is decremented by one
    /// so that stored values of present fields start at 1, keeping 0 free
    /// to mean "empty". String-like columns store dictionary offsets, whose
    /// width is uniform across the block.
    pub fn compute(schema: &Schema, tracker: &RangeTracker, dict: &DictBuilder) -> ColumnStats {
        let offset_width = dict.offset_width();
        let n = schema.len();
        let mut sizes = vec![0u8; n];
        let mut mins = vec![0u64; n];
        let mut used = Vec::new();

        for c in 0..n {
            if !tracker.is_used(c) {
                continue;
            }
            if schema.columns[c].ctype.is_string_like() {
                sizes[c] = offset_width;
                mins[c] = 0;
            } else {
                let min = tracker.min(c) - 1;
                sizes[c] = byte_width(tracker.max(c) - min);
                mins[c] = min;
            }
            used.push(c);
        }

        ColumnStats { sizes, mins, used }
    }

    /// Wire form: width byte per column, then the delta base of each used
    /// column as a full `u64`.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.sizes)?;
        for &c in &self.used {
            out.write_all(&self.mins[c].to_le_bytes())?;
        }
        Ok(())
    }
}

/// Pass 2: replay `num_rows` rows and emit bitmap + payload records.
pub(crate) fn write_rows<R: BufRead, W: Write>(
    replay: &mut R,
    out: &mut W,
    tokenizer: &mut RowTokenizer,
    schema: &Schema,
    dict: &DictBuilder,
    stats: &ColumnStats,
    num_rows: u32,
) -> Result<()> {
    let mut prev = vec![0u64; schema.len()];
    let mut bitmap = vec![0u8; stats.used.len().div_ceil(8)];
    let mut payload: Vec<u8> = Vec::with_capacity(stats.used.len() * 8);

    for _ in 0..num_rows {
        if !tokenizer.next_row(replay)? {
            return Err(ZdwError::CorruptedData(
                "input ended early on the second encoding pass".into(),
            ));
        }
        let row = tokenizer.row().to_vec();
        let fields = tokenizer.split_fields(&row);
        if fields.len() != schema.len() {
            return Err(ZdwError::CorruptedData(
                "row arity changed between encoding passes".into(),
            ));
        }

        bitmap.fill(0);
        payload.clear();

        for (u, &c) in stats.used.iter().enumerate() {
            let field = fields[c];
            let ctype = schema.columns[c].ctype;

            let stored = if ctype.is_string_like() {
                if field.is_empty() {
                    0
                } else {
                    dict.offset(field)?
                }
            } else if ctype == crate::types::ColumnType::Char {
                let v = char_field_value(field);
                if v != 0 {
                    v - stats.mins[c]
                } else {
                    0
                }
            } else {
                let v = parse_u64_prefix(field);
                if v > 0 {
                    v.wrapping_sub(stats.mins[c])
                } else {
                    0
                }
            };

            if stored != prev[c] {
                bitmap[u / 8] |= 1u8 << (u % 8);
                payload.extend_from_slice(&stored.to_le_bytes()[..stats.sizes[c] as usize]);
                prev[c] = stored;
            }
        }

        out.write_all(&bitmap)?;
        out.write_all(&payload)?;
    }
    Ok(())
}

/// Encoded value of a CHAR field: the first byte, plus the second byte in
/// the high bits when the first is a backslash (escaped two-character
/// sequences survive verbatim).
#[inline]
pub(crate) fn char_field_value(field: &[u8]) -> u64 {
    let c0 = u64::from(field.first().copied().unwrap_or(0));
    if c0 == u64::from(b'\\') {
        c0 + 256 * u64::from(field.get(1).copied().unwrap_or(0))
    } else {
        c0
    }
}

/// `strtoull`-style prefix parse: optional sign, leading digits, anything
/// after the digits ignored. Negative values wrap as unsigned; overflow
/// saturates.
pub(crate) fn parse_u64_prefix(field: &[u8]) -> u64 {
    let mut i = 0usize;
    while i < field.len() && field[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut negative = false;
    if i < field.len() && (field[i] == b'+' || field[i] == b'-') {
        negative = field[i] == b'-';
        i += 1;
    }
    let mut value: u64 = 0;
    let mut overflowed = false;
    while i < field.len() && field[i].is_ascii_digit() {
        let digit = u64::from(field[i] - b'0');
        value = match value.checked_mul(10).and_then(|v| v.checked_add(digit)) {
            Some(v) => v,
            None => {
                overflowed = true;
                u64::MAX
            }
        };
        i += 1;
    }
    if overflowed {
        u64::MAX
    } else if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digit_prefixes() {
        assert_eq!(parse_u64_prefix(b"123"), 123);
        assert_eq!(parse_u64_prefix(b"123abc"), 123);
        assert_eq!(parse_u64_prefix(b""), 0);
        assert_eq!(parse_u64_prefix(b"abc"), 0);
        assert_eq!(parse_u64_prefix(b"  42"), 42);
        assert_eq!(parse_u64_prefix(b"+7"), 7);
    }

    #[test]
    fn negatives_wrap_as_unsigned() {
        assert_eq!(parse_u64_prefix(b"-1"), u64::MAX);
        assert_eq!(parse_u64_prefix(b"-5"), u64::MAX - 4);
        assert_eq!(parse_u64_prefix(b"-5") as i64, -5);
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(parse_u64_prefix(b"99999999999999999999999"), u64::MAX);
    }

    #[test]
    fn char_values_preserve_escapes() {
        assert_eq!(char_field_value(b"a"), u64::from(b'a'));
        assert_eq!(char_field_value(b""), 0);
        assert_eq!(char_field_value(b"\\\t"), u64::from(b'\\') + 256 * 9);
        // second byte only matters after a backslash
        assert_eq!(char_field_value(b"ab"), u64::from(b'a'));
    }
}
