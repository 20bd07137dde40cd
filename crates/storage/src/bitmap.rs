//! Bitmaps persisted in a [`Table`]
//!
//! The bitmap's words are stored as little-endian bytes, `rowlen` bytes per
//! row, so row `r` holds words `r * rowlen / 8 ..`. Every mutation rewrites
//! the rows covering the bits it touched before returning. On open the whole
//! table is loaded and handed to the in-memory index.

use crate::table::Table;
use crate::Underlayer;
use byteorder::{ByteOrder, LittleEndian};
use reliant_bits::{self as bits, BitIndex};
use reliant_core::{Error, Replica, ReplicaConfig, Result};
use tracing::warn;

/// Persistent bitmap over a flat [`bits::Bitmap`]
pub type Bitmap = TableBitmap<bits::Bitmap>;

/// Persistent bitmap over a hierarchical [`bits::BigBitmap`]
pub type BigBitmap = TableBitmap<bits::BigBitmap>;

/// An in-memory bit index whose words are mirrored into a table
#[derive(Debug)]
pub struct TableBitmap<B> {
    index: B,
    table: Table,
}

impl<B: BitIndex> TableBitmap<B> {
    /// Load the table and build the in-memory index from its words.
    ///
    /// The table's row length must be a multiple of 8.
    pub fn open_with<F>(table: Table, build: F) -> Result<Self>
    where
        F: FnOnce(Vec<u64>) -> Result<B>,
    {
        let rowlen = table.row_len();
        if rowlen % 8 != 0 {
            warn!(rowlen, "Bitmap open: rowlen is not word aligned");
            return Err(Error::InvalidArgs(format!(
                "bitmap rowlen {} is not a multiple of 8",
                rowlen
            )));
        }

        let rows = table.rows()? as usize;
        let mut words = Vec::new();
        if rows > 0 {
            let mut bytes = vec![0u8; rows * rowlen];
            table.read_rows(0, &mut bytes)?;
            words = vec![0u64; bytes.len() / 8];
            LittleEndian::read_u64_into(&bytes, &mut words);
        }
        Ok(TableBitmap {
            index: build(words)?,
            table,
        })
    }

    /// In-memory index
    pub fn index(&self) -> &B {
        &self.index
    }

    /// Backing table
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Bytes `start..end` of the word array, zero past the last word.
    fn encode(&self, start: usize, end: usize) -> Vec<u8> {
        let mut buf = vec![0u8; end - start];
        let words = self.index.words().iter().skip(start / 8);
        for (chunk, &w) in buf.chunks_exact_mut(8).zip(words) {
            LittleEndian::write_u64(chunk, w);
        }
        buf
    }

    /// Persist the row holding bit `idx`.
    fn update(&self, idx: usize) -> Result<()> {
        if idx >> 6 >= self.index.words().len() {
            return Ok(());
        }
        let rowlen = self.table.row_len();
        let row = (idx >> 3) / rowlen;
        let start = row * rowlen;
        self.table
            .write_row(row as u64, &self.encode(start, start + rowlen))
    }

    /// Persist the rows holding bits `from..=to`.
    fn update_range(&self, from: usize, to: usize) -> Result<()> {
        let rowlen = self.table.row_len();
        let rowfrom = (from >> 3) / rowlen;
        let rowto = (to >> 3) / rowlen;
        let bytes = self.encode(rowfrom * rowlen, (rowto + 1) * rowlen);
        self.table.write_rows(rowfrom as u64, &bytes)
    }
}

impl TableBitmap<bits::Bitmap> {
    /// Flat bitmap over `table`
    pub fn open(table: Table) -> Result<Self> {
        Self::open_with(table, |words| Ok(bits::Bitmap::from_words(words)))
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, rowlen: usize) -> Result<Self> {
        Self::open(Table::open_files(config, rowlen)?)
    }
}

impl TableBitmap<bits::BigBitmap> {
    /// Hierarchical bitmap over `table` holding at least `maxbits` bits
    ///
    /// The last row may carry zero padding past the bitmap's capacity when
    /// `rowlen` does not divide it; that padding is dropped on load.
    pub fn open(table: Table, maxbits: usize) -> Result<Self> {
        Self::open_with(table, |mut words| {
            let ncap = bits::BigBitmap::words_for(maxbits);
            if words.len() > ncap && words[ncap..].iter().all(|&w| w == 0) {
                words.truncate(ncap);
            }
            bits::BigBitmap::new(words, maxbits)
        })
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, rowlen: usize, maxbits: usize) -> Result<Self> {
        Self::open(Table::open_files(config, rowlen)?, maxbits)
    }
}

impl<B: BitIndex> BitIndex for TableBitmap<B> {
    fn has(&self, idx: usize) -> bool {
        self.index.has(idx)
    }

    fn set(&mut self, idx: usize) -> Result<()> {
        self.index.set(idx)?;
        self.update(idx)
    }

    fn clear(&mut self, idx: usize) -> Result<()> {
        self.index.clear(idx)?;
        self.update(idx)
    }

    fn set_range(&mut self, from: usize, to: usize) -> Result<()> {
        self.index.set_range(from, to)?;
        self.update_range(from, to)
    }

    fn clear_range(&mut self, from: usize, to: usize) -> Result<()> {
        self.index.clear_range(from, to)?;
        self.update_range(from, to)
    }

    fn find(&mut self, do_clear: bool) -> Result<usize> {
        let idx = self.index.find(do_clear)?;
        if do_clear {
            self.update(idx)?;
        }
        Ok(idx)
    }

    fn find_from(&mut self, from: usize, do_clear: bool) -> Result<usize> {
        let idx = self.index.find_from(from, do_clear)?;
        if do_clear {
            self.update(idx)?;
        }
        Ok(idx)
    }

    fn words(&self) -> &[u64] {
        self.index.words()
    }
}

impl<B> Underlayer for TableBitmap<B> {
    fn underlayer(&self) -> &[Replica] {
        self.table.underlayer()
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        self.table.underlayer_mut()
    }
}
