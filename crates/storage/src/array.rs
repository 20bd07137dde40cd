//! Row arrays over a [`Table`]
//!
//! [`Array`] mirrors every row in memory; reads never touch the replicas
//! after open. Writes go to the table first and are mirrored only once the
//! table accepted them.

use crate::table::Table;
use crate::Underlayer;
use reliant_core::{Error, Replica, ReplicaConfig, Result};
use tracing::{debug, warn};

/// Random access over fixed-length elements.
///
/// Element `i` is row `i` of the backing table. Writing past the end
/// extends the array; any gap reads back as zero elements.
pub trait RowArray: Underlayer {
    /// Bytes per element
    fn elem_len(&self) -> usize;

    /// Number of elements
    fn len(&self) -> usize;

    /// True if the array has no elements
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one element.
    fn put(&mut self, ielem: usize, elem: &[u8]) -> Result<()>;

    /// Write consecutive elements starting at `ielem`.
    fn puts(&mut self, ielem: usize, elems: &[u8]) -> Result<()>;

    /// Read one element. `EndOfData` if `ielem >= len()`.
    fn get(&mut self, ielem: usize, elem: &mut [u8]) -> Result<()>;

    /// Read consecutive elements starting at `ielem`.
    ///
    /// Returns how many whole elements were copied, which is less than
    /// requested when the array ends first. `EndOfData` if `ielem >= len()`.
    fn gets(&mut self, ielem: usize, elems: &mut [u8]) -> Result<usize>;

    /// Drop every element at or past `n`. No-op if the array is not longer.
    fn shrink(&mut self, n: usize) -> Result<()>;
}

pub(crate) fn check_elem(op: &str, len: usize, elemlen: usize) -> Result<()> {
    if len != elemlen {
        warn!(op, len, elemlen, "Array: invalid element buffer");
        return Err(Error::InvalidArgs(format!(
            "{}: element buffer is {} bytes, element length is {}",
            op, len, elemlen
        )));
    }
    Ok(())
}

pub(crate) fn check_elems(op: &str, len: usize, elemlen: usize) -> Result<()> {
    if len % elemlen != 0 {
        warn!(op, len, elemlen, "Array: invalid elements buffer");
        return Err(Error::InvalidArgs(format!(
            "{}: buffer of {} bytes is not a multiple of element length {}",
            op, len, elemlen
        )));
    }
    Ok(())
}

/// Byte offset of element `ielem`, `OutOfRange` if it is not addressable.
pub(crate) fn elem_offset(ielem: usize, elemlen: usize) -> Result<usize> {
    ielem.checked_mul(elemlen).ok_or_else(|| {
        warn!(ielem, elemlen, "Array: element offset overflows");
        Error::OutOfRange {
            index: ielem,
            capacity: usize::MAX / elemlen,
        }
    })
}

/// Fully memory-resident row array
#[derive(Debug)]
pub struct Array {
    data: Vec<u8>,
    table: Table,
}

impl Array {
    /// Load every row of `table`.
    pub fn open(table: Table) -> Result<Self> {
        let rows = table.rows()? as usize;
        let mut data = vec![0u8; rows * table.row_len()];
        if rows > 0 {
            table.read_rows(0, &mut data)?;
        }
        debug!(rows, rowlen = table.row_len(), "Array loaded");
        Ok(Array { data, table })
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, elemlen: usize) -> Result<Self> {
        Self::open(Table::open_files(config, elemlen)?)
    }

    /// Backing table
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// In-memory copy of all elements
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn mirror(&mut self, ielem: usize, bytes: &[u8]) -> Result<()> {
        let ioff = elem_offset(ielem, self.elem_len())?;
        let iend = ioff.checked_add(bytes.len()).ok_or(Error::OutOfRange {
            index: ielem,
            capacity: usize::MAX / self.elem_len(),
        })?;
        if self.data.len() < iend {
            self.data.resize(iend, 0);
        }
        self.data[ioff..iend].copy_from_slice(bytes);
        Ok(())
    }
}

impl RowArray for Array {
    fn elem_len(&self) -> usize {
        self.table.row_len()
    }

    fn len(&self) -> usize {
        self.data.len() / self.table.row_len()
    }

    fn put(&mut self, ielem: usize, elem: &[u8]) -> Result<()> {
        self.table.write_row(ielem as u64, elem)?;
        self.mirror(ielem, elem)
    }

    fn puts(&mut self, ielem: usize, elems: &[u8]) -> Result<()> {
        if elems.is_empty() {
            return Ok(());
        }
        self.table.write_rows(ielem as u64, elems)?;
        self.mirror(ielem, elems)
    }

    fn get(&mut self, ielem: usize, elem: &mut [u8]) -> Result<()> {
        let rowlen = self.elem_len();
        check_elem("Array::get", elem.len(), rowlen)?;

        let ioff = elem_offset(ielem, rowlen)?;
        if ioff >= self.data.len() {
            return Err(Error::EndOfData);
        }
        elem.copy_from_slice(&self.data[ioff..ioff + rowlen]);
        Ok(())
    }

    fn gets(&mut self, ielem: usize, elems: &mut [u8]) -> Result<usize> {
        let rowlen = self.elem_len();
        check_elems("Array::gets", elems.len(), rowlen)?;

        let ioff = elem_offset(ielem, rowlen)?;
        if ioff >= self.data.len() {
            return Err(Error::EndOfData);
        }
        let ncopy = elems.len().min(self.data.len() - ioff);
        elems[..ncopy].copy_from_slice(&self.data[ioff..ioff + ncopy]);
        Ok(ncopy / rowlen)
    }

    fn shrink(&mut self, n: usize) -> Result<()> {
        if n >= self.len() {
            return Ok(());
        }
        self.table.shrink(n as u64)?;
        self.data.truncate(n * self.elem_len());
        Ok(())
    }
}

impl Underlayer for Array {
    fn underlayer(&self) -> &[Replica] {
        self.table.underlayer()
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        self.table.underlayer_mut()
    }
}
