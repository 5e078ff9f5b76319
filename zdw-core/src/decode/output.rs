//! Row sinks: where reconstructed field values go.
//!
//! The decoder emits exactly one `field`/`empty_field` call per output
//! column, in file order, then `end_row`. `DirectSink` streams bytes with
//! tab separators; `OrderedSink` buffers one row of per-position slots so
//! columns can be emitted in a caller-chosen order; `NullSink` discards
//! everything (integrity testing).

use std::io::{self, Write};

pub trait RowSink {
    /// A column value, complete in one call.
    fn field(&mut self, data: &[u8]) -> io::Result<()>;

    /// An empty column value.
    fn empty_field(&mut self) -> io::Result<()>;

    /// Separator preceding the next column (direct output only).
    fn separator(&mut self) -> io::Result<()>;

    /// Terminate the current row.
    fn end_row(&mut self) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct DirectSink<W: Write> {
    out: W,
}

impl<W: Write> DirectSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for DirectSink<W> {
    fn field(&mut self, data: &[u8]) -> io::Result<()> {
        self.out.write_all(data)
    }

    fn empty_field(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn separator(&mut self) -> io::Result<()> {
        self.out.write_all(b"\t")
    }

    fn end_row(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Buffers each row in per-position slots; `end_row` emits
/// `slot[0]\t…\tslot[k-1]\n`.
///
/// `routing[i]` is the output position of the i-th written column (file
/// order). Positions for padded absent columns have no routing entry; their
/// slots simply stay empty.
pub struct OrderedSink<W: Write> {
    out: W,
    routing: Vec<usize>,
    slots: Vec<Vec<u8>>,
    cursor: usize,
    row: Vec<u8>,
}

impl<W: Write> OrderedSink<W> {
    pub fn new(out: W, routing: Vec<usize>, num_positions: usize) -> Self {
        debug_assert!(routing.iter().all(|&p| p < num_positions));
        Self {
            out,
            routing,
            slots: vec![Vec::new(); num_positions],
            cursor: 0,
            row: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for OrderedSink<W> {
    fn field(&mut self, data: &[u8]) -> io::Result<()> {
        let pos = self.routing[self.cursor];
        self.cursor += 1;
        let slot = &mut self.slots[pos];
        slot.clear();
        slot.extend_from_slice(data);
        Ok(())
    }

    fn empty_field(&mut self) -> io::Result<()> {
        let pos = self.routing[self.cursor];
        self.cursor += 1;
        self.slots[pos].clear();
        Ok(())
    }

    fn separator(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn end_row(&mut self) -> io::Result<()> {
        self.cursor = 0;
        self.row.clear();
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                self.row.push(b'\t');
            }
            self.row.extend_from_slice(slot);
        }
        self.row.push(b'\n');
        self.out.write_all(&self.row)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Discards everything; used when only structural validation is wanted.
#[derive(Default)]
pub struct NullSink;

impl RowSink for NullSink {
    fn field(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn empty_field(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn separator(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn end_row(&mut self) -> io::Result<()> {
        Ok(())
    }
}
