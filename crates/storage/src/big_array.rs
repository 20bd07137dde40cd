//! Span-paged row array
//!
//! Rows are grouped into spans of `span` rows. A span is loaded from the
//! table the first time it is touched and stays resident afterwards, so
//! memory grows with the working set rather than the file.

use crate::array::{check_elem, check_elems, RowArray};
use crate::table::Table;
use crate::Underlayer;
use reliant_core::{Error, Replica, ReplicaConfig, Result};
use tracing::{debug, warn};

/// Row array that pages fixed-size spans on demand
#[derive(Debug)]
pub struct BigArray {
    spans: Vec<Option<Vec<u8>>>,
    table: Table,
    span: usize,
    rows: usize,
}

impl BigArray {
    /// Array over `table` with `span` rows per page. Nothing is loaded yet.
    pub fn open(table: Table, span: usize) -> Result<Self> {
        if span == 0 {
            warn!(rowlen = table.row_len(), "BigArray open: zero span");
            return Err(Error::InvalidArgs("span must be positive".into()));
        }
        let rows = table.rows()? as usize;
        Ok(BigArray {
            spans: vec![None; rows / span + 1],
            table,
            span,
            rows,
        })
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, elemlen: usize, span: usize) -> Result<Self> {
        Self::open(Table::open_files(config, elemlen)?, span)
    }

    /// Rows per span
    pub fn span(&self) -> usize {
        self.span
    }

    /// Number of spans currently held in memory
    pub fn resident_spans(&self) -> usize {
        self.spans.iter().filter(|s| s.is_some()).count()
    }

    fn span_len(&self) -> usize {
        self.span * self.table.row_len()
    }

    /// Read the rows of span `ispan` that exist; the rest stays zero.
    fn load_span(&self, ispan: usize) -> Result<Vec<u8>> {
        let rowlen = self.table.row_len();
        let mut data = vec![0u8; self.span_len()];
        let irow = ispan * self.span;
        if irow < self.rows {
            let nrow = (self.rows - irow).min(self.span);
            self.table.read_rows(irow as u64, &mut data[..nrow * rowlen])?;
        }
        Ok(data)
    }

    /// Make span `ispan` resident.
    fn require_span(&mut self, ispan: usize) -> Result<&mut Vec<u8>> {
        let data = match self.spans[ispan].take() {
            Some(data) => data,
            None => {
                debug!(ispan, span = self.span, "BigArray: loading span");
                self.load_span(ispan)?
            }
        };
        Ok(self.spans[ispan].insert(data))
    }
}

impl RowArray for BigArray {
    fn elem_len(&self) -> usize {
        self.table.row_len()
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn put(&mut self, ielem: usize, elem: &[u8]) -> Result<()> {
        let rowlen = self.elem_len();
        let ispan = ielem / self.span;
        let ioff = (ielem % self.span) * rowlen;

        self.table.write_row(ielem as u64, elem)?;

        if ispan >= self.spans.len() {
            self.spans.resize(ispan + 1, None);
        }
        if self.spans[ispan].is_none() && self.rows <= ispan * self.span {
            // nothing on disk for this span yet
            self.spans[ispan] = Some(vec![0u8; self.span_len()]);
        }
        let data = self.require_span(ispan)?;
        data[ioff..ioff + rowlen].copy_from_slice(elem);

        if self.rows <= ielem {
            self.rows = ielem + 1;
        }
        Ok(())
    }

    fn puts(&mut self, ielem: usize, elems: &[u8]) -> Result<()> {
        let rowlen = self.elem_len();
        check_elems("BigArray::puts", elems.len(), rowlen)?;
        for (k, elem) in elems.chunks_exact(rowlen).enumerate() {
            self.put(ielem + k, elem)?;
        }
        Ok(())
    }

    fn get(&mut self, ielem: usize, elem: &mut [u8]) -> Result<()> {
        let rowlen = self.elem_len();
        check_elem("BigArray::get", elem.len(), rowlen)?;
        if ielem >= self.rows {
            return Err(Error::EndOfData);
        }

        let ispan = ielem / self.span;
        let ioff = (ielem % self.span) * rowlen;
        let data = self.require_span(ispan)?;
        elem.copy_from_slice(&data[ioff..ioff + rowlen]);
        Ok(())
    }

    fn gets(&mut self, ielem: usize, elems: &mut [u8]) -> Result<usize> {
        let rowlen = self.elem_len();
        check_elems("BigArray::gets", elems.len(), rowlen)?;

        let mut n = 0;
        for elem in elems.chunks_exact_mut(rowlen) {
            match self.get(ielem + n, elem) {
                Ok(()) => n += 1,
                Err(Error::EndOfData) if n > 0 => break,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    fn shrink(&mut self, n: usize) -> Result<()> {
        if n >= self.rows {
            return Ok(());
        }
        self.table.shrink(n as u64)?;

        let rowlen = self.elem_len();
        let nspans = (n + self.span - 1) / self.span;
        self.spans.truncate(nspans);
        self.rows = n;

        let last = (n % self.span) * rowlen;
        if last > 0 {
            if let Some(Some(data)) = self.spans.last_mut() {
                data[last..].fill(0);
            }
        }
        Ok(())
    }
}

impl Underlayer for BigArray {
    fn underlayer(&self) -> &[Replica] {
        self.table.underlayer()
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        self.table.underlayer_mut()
    }
}
