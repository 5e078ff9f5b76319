//! Row tokenizer: assembles logical rows from tab-separated dump lines.
//!
//! A tab separates fields unless it is preceded by an odd number of
//! consecutive backslashes (an escaped tab belongs to the field). The same
//! rule applies to the line feed itself: a physical line ending in an odd
//! run of backslashes is incomplete, and further physical lines are appended
//! (the escaped LF stays inside the row) until the tally turns even.
//!
//! Carriage returns are not line terminators here; a CR before the final LF
//! travels as field content and survives a round trip.

use std::io::{self, BufRead};

/// Default row buffer size; doubles on overflow. The high-water capacity is
/// recorded in each block header.
pub const DEFAULT_LINE_LENGTH: usize = 16 * 1024;

pub struct RowTokenizer {
    row: Vec<u8>,
    /// Buffer capacity high-water mark, grown by doubling.
    line_capacity: usize,
    trim_trailing_spaces: bool,
}

impl RowTokenizer {
    pub fn new(trim_trailing_spaces: bool) -> Self {
        Self {
            row: Vec::with_capacity(DEFAULT_LINE_LENGTH),
            line_capacity: DEFAULT_LINE_LENGTH,
            trim_trailing_spaces,
        }
    }

    /// Largest row buffer capacity needed so far.
    pub fn line_capacity(&self) -> u32 {
        self.line_capacity.min(u32::MAX as usize) as u32
    }

    pub fn trims_trailing_spaces(&self) -> bool {
        self.trim_trailing_spaces
    }

    /// Read the next logical row. Returns `false` at end of input (including
    /// EOF in the middle of an escape continuation). The assembled row,
    /// without its terminating LF, is available via [`Self::row`].
    ///
    /// Physical lines shorter than two bytes (blank lines, or a stray final
    /// byte with no LF) are skipped.
    pub fn next_row<R: BufRead>(&mut self, input: &mut R) -> io::Result<bool> {
        loop {
            self.row.clear();
            let n = input.read_until(b'\n', &mut self.row)?;
            if n == 0 {
                return Ok(false); // end of input
            }
            if self.row.len() < 2 {
                continue; // blank line or terminal fragment
            }

            while !self.row_complete() {
                let before = self.row.len();
                let n = input.read_until(b'\n', &mut self.row)?;
                if n == 0 {
                    self.row.truncate(before);
                    return Ok(false); // EOF mid-escape: treat as end of input
                }
            }

            if self.row.last() == Some(&b'\n') {
                self.row.pop();
            }
            while self.row.capacity() > self.line_capacity {
                self.line_capacity *= 2;
            }
            return Ok(true);
        }
    }

    /// The current logical row (no trailing LF).
    pub fn row(&self) -> &[u8] {
        &self.row
    }

    /// A row is complete when it ends with an LF preceded by an even run of
    /// backslashes.
    fn row_complete(&self) -> bool {
        if self.row.last() != Some(&b'\n') {
            return false;
        }
        let body = &self.row[..self.row.len() - 1];
        trailing_backslashes(body) % 2 == 0
    }

    /// Split the current row into fields, honoring escaped tabs. In
    /// trim mode, trailing ASCII spaces are dropped from each field.
    pub fn split_fields<'a>(&self, row: &'a [u8]) -> Vec<&'a [u8]> {
        let mut fields = Vec::new();
        let mut start = 0usize;
        for (i, &b) in row.iter().enumerate() {
            if b == b'\t' && trailing_backslashes(&row[start..i]) % 2 == 0 {
                fields.push(self.trimmed(&row[start..i]));
                start = i + 1;
            }
        }
        fields.push(self.trimmed(&row[start..]));
        fields
    }

    fn trimmed<'a>(&self, field: &'a [u8]) -> &'a [u8] {
        if self.trim_trailing_spaces {
            let mut end = field.len();
            while end > 0 && field[end - 1] == b' ' {
                end -= 1;
            }
            &field[..end]
        } else {
            field
        }
    }
}

/// Number of consecutive backslashes at the end of `bytes`.
fn trailing_backslashes(bytes: &[u8]) -> usize {
    bytes.iter().rev().take_while(|&&b| b == b'\\').count()
}
