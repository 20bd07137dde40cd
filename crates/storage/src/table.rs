//! Replicated fixed-row table
//!
//! # Row Format
//!
//! ```text
//! ┌──────────────────────┬──────────────┐
//! │ payload (rowlen)     │ CRC32 (4, LE)│
//! └──────────────────────┴──────────────┘
//! ```
//!
//! Row `i` lives at `i * (rowlen + 4)` on every replica. The CRC covers the
//! payload only. A row whose trailer is zero and whose payload is all zero is
//! valid: it was never written (a hole left by a write further out).
//!
//! Writes go to every replica; each failing replica (or hole) counts against
//! `allowfails`. Reads take the first replica whose copy of the row is valid.

use crate::Underlayer;
use byteorder::{ByteOrder, LittleEndian};
use reliant_core::{replica, Error, FailCounter, Replica, ReplicaConfig, Result};
use tracing::{debug, error, warn};

/// Bytes of CRC trailer per row
pub const CRC_LEN: usize = 4;

/// Encode `payload` followed by its CRC into `out` (`payload.len() + 4` bytes).
fn encode_row(payload: &[u8], out: &mut [u8]) {
    let n = payload.len();
    out[..n].copy_from_slice(payload);
    LittleEndian::write_u32(&mut out[n..n + CRC_LEN], crc32fast::hash(payload));
}

/// True if the stored row (`rowlen + 4` bytes) passes validation.
fn row_valid(stored: &[u8], rowlen: usize) -> bool {
    let payload = &stored[..rowlen];
    let crc = LittleEndian::read_u32(&stored[rowlen..rowlen + CRC_LEN]);
    if crc32fast::hash(payload) == crc {
        return true;
    }
    crc == 0 && payload.iter().all(|&b| b == 0)
}

/// Fixed-row-length table replicated across files
pub struct Table {
    files: Vec<Replica>,
    rowlen: usize,
    allowfails: usize,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("replicas", &self.files.len())
            .field("rowlen", &self.rowlen)
            .field("allowfails", &self.allowfails)
            .finish()
    }
}

impl Table {
    /// Table over already-open replicas
    pub fn open(files: Vec<Replica>, rowlen: usize, allowfails: usize) -> Result<Self> {
        if rowlen == 0 {
            return Err(Error::InvalidArgs("table rowlen must be positive".into()));
        }
        Ok(Table {
            files,
            rowlen,
            allowfails,
        })
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, rowlen: usize) -> Result<Self> {
        let files = replica::open(config)?;
        Self::open(files, rowlen, config.allowfails)
    }

    /// Payload bytes per row
    pub fn row_len(&self) -> usize {
        self.rowlen
    }

    /// Replica failures tolerated per operation
    pub fn allow_fails(&self) -> usize {
        self.allowfails
    }

    #[inline]
    fn stride(&self) -> u64 {
        (self.rowlen + CRC_LEN) as u64
    }

    /// Byte offset of `row`, checking that `rows` rows from there stay
    /// addressable.
    fn row_pos(&self, row: u64, rows: u64) -> Result<u64> {
        let stride = self.stride();
        row.checked_add(rows)
            .and_then(|end| end.checked_mul(stride))
            .map(|_| row * stride)
            .ok_or_else(|| {
                warn!(row, rows, rowlen = self.rowlen, "Table: row offset overflows");
                Error::OutOfRange {
                    index: usize::try_from(row).unwrap_or(usize::MAX),
                    capacity: usize::try_from(u64::MAX / stride).unwrap_or(usize::MAX),
                }
            })
    }

    /// Number of rows, derived from the largest replica.
    pub fn rows(&self) -> Result<u64> {
        let fsize = replica::fsize_of(&self.files, self.allowfails)?;
        Ok(fsize / self.stride())
    }

    /// Drop every row at or past `rows`. No-op if the table is not longer.
    pub fn shrink(&self, rows: u64) -> Result<()> {
        if rows >= self.rows()? {
            return Ok(());
        }

        let fsize = self.row_pos(rows, 0)?;
        let mut counter = FailCounter::new("shrink", self.allowfails);
        for (i, f) in self.files.iter().enumerate() {
            if let Some(f) = f {
                match f.truncate(fsize) {
                    Ok(()) => continue,
                    Err(e) => warn!(replica = i, rows, error = %e, "Table shrink: truncate failed"),
                }
            }
            counter.fail()?;
        }
        Ok(())
    }

    /// Write one row to every replica.
    pub fn write_row(&self, row: u64, buf: &[u8]) -> Result<()> {
        if buf.len() != self.rowlen {
            warn!(row, len = buf.len(), rowlen = self.rowlen, "Table write_row: invalid arguments");
            return Err(Error::InvalidArgs(format!(
                "row buffer is {} bytes, rowlen is {}",
                buf.len(),
                self.rowlen
            )));
        }

        let pos = self.row_pos(row, 1)?;
        let mut b = vec![0u8; self.rowlen + CRC_LEN];
        encode_row(buf, &mut b);
        self.fan_out("write_row", &b, pos)
    }

    /// Write consecutive rows starting at `row` with one write per replica.
    pub fn write_rows(&self, row: u64, bufs: &[u8]) -> Result<()> {
        let n = self.rowlen;
        if bufs.len() % n != 0 {
            warn!(row, len = bufs.len(), rowlen = n, "Table write_rows: invalid arguments");
            return Err(Error::InvalidArgs(format!(
                "rows buffer of {} bytes is not a multiple of rowlen {}",
                bufs.len(),
                n
            )));
        }

        if bufs.is_empty() {
            return Ok(());
        }

        let rows = bufs.len() / n;
        let pos = self.row_pos(row, rows as u64)?;
        let mut b = vec![0u8; (n + CRC_LEN) * rows];
        for (payload, out) in bufs.chunks_exact(n).zip(b.chunks_exact_mut(n + CRC_LEN)) {
            encode_row(payload, out);
        }
        self.fan_out("write_rows", &b, pos)
    }

    fn fan_out(&self, op: &'static str, b: &[u8], pos: u64) -> Result<()> {
        let mut counter = FailCounter::new(op, self.allowfails);
        for (i, f) in self.files.iter().enumerate() {
            if let Some(f) = f {
                match f.write_at(b, pos) {
                    Ok(()) => continue,
                    Err(e) => warn!(op, replica = i, pos, error = %e, "Table replica write failed"),
                }
            }
            if let Err(e) = counter.fail() {
                error!(op, pos, fails = counter.fails(), "Table write gave up");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Read one row from the first replica holding a valid copy.
    pub fn read_row(&self, row: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.rowlen {
            warn!(row, len = buf.len(), rowlen = self.rowlen, "Table read_row: invalid arguments");
            return Err(Error::InvalidArgs(format!(
                "row buffer is {} bytes, rowlen is {}",
                buf.len(),
                self.rowlen
            )));
        }
        let pos = self.row_pos(row, 1)?;
        read_row_from(&self.files, pos, buf, self.rowlen)
    }

    /// Read consecutive rows starting at `row`.
    ///
    /// The block is read from the first replica that can serve it; rows that
    /// fail validation there are repaired row-wise from the replicas after it.
    pub fn read_rows(&self, row: u64, bufs: &mut [u8]) -> Result<()> {
        let n = self.rowlen;
        if bufs.len() % n != 0 {
            warn!(row, len = bufs.len(), rowlen = n, "Table read_rows: invalid arguments");
            return Err(Error::InvalidArgs(format!(
                "rows buffer of {} bytes is not a multiple of rowlen {}",
                bufs.len(),
                n
            )));
        }

        let rows = bufs.len() / n;
        let pos = self.row_pos(row, rows as u64)?;
        let stride = n + CRC_LEN;
        let mut bs = vec![0u8; stride * rows];

        for (i, f) in self.files.iter().enumerate() {
            let Some(f) = f else { continue };
            if let Err(e) = f.read_at(&mut bs, pos) {
                warn!(replica = i, pos, error = %e, "Table read_rows: replica read failed");
                continue;
            }

            for (k, (stored, buf)) in bs
                .chunks_exact(stride)
                .zip(bufs.chunks_exact_mut(n))
                .enumerate()
            {
                if row_valid(stored, n) {
                    buf.copy_from_slice(&stored[..n]);
                    continue;
                }
                let rpos = pos + (k * stride) as u64;
                debug!(replica = i, pos = rpos, "Table read_rows: crc mismatch, trying later replicas");
                if let Err(e) = read_row_from(&self.files[i + 1..], rpos, buf, n) {
                    error!(pos = rpos, error = %e, "Table read_rows: row unrecoverable");
                    return Err(e);
                }
            }
            return Ok(());
        }

        error!(row, rows, "Table read_rows: no replica could serve the block");
        Err(Error::BadData(format!(
            "rows {}..{} unreadable on every replica",
            row,
            row + rows as u64
        )))
    }
}

fn read_row_from(files: &[Replica], pos: u64, buf: &mut [u8], rowlen: usize) -> Result<()> {
    let mut b = vec![0u8; rowlen + CRC_LEN];
    for (i, f) in files.iter().enumerate() {
        let Some(f) = f else { continue };
        if let Err(e) = f.read_at(&mut b, pos) {
            warn!(replica = i, pos, error = %e, "Table read_row: replica read failed");
            continue;
        }
        if !row_valid(&b, rowlen) {
            warn!(replica = i, pos, "Table read_row: crc checksum error");
            continue;
        }
        buf.copy_from_slice(&b[..rowlen]);
        return Ok(());
    }
    Err(Error::BadData(format!("no valid copy of the row at offset {}", pos)))
}

impl Underlayer for Table {
    fn underlayer(&self) -> &[Replica] {
        &self.files
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        &mut self.files
    }
}
