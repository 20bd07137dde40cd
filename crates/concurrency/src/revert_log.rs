//! Write-ahead revert log
//!
//! # Record Format
//!
//! ```text
//! ┌────────┬─────────────────────┬─────────────────────────┐
//! │ id (1) │ payload (variable)  │ record start (4, LE u32)│
//! └────────┴─────────────────────┴─────────────────────────┘
//! ```
//!
//! Records are appended back to back. The trailing back-pointer holds the
//! offset of the record's id byte, so the log is walked from the end towards
//! the front: newest record first. The payload is opaque to the log; it is
//! whatever the owning component needs to restore its pre-image.

use byteorder::{ByteOrder, LittleEndian};
use reliant_core::{Error, Result};
use tracing::warn;

/// Highest component id plus one
pub const MAX_COMPONENTS: usize = 64;

const OFFSET_LEN: usize = 4;

/// In-memory revert log of the running transaction
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RevertLog {
    buf: Vec<u8>,
}

impl RevertLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Log over already-encoded records
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        RevertLog { buf }
    }

    /// Encoded records
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no record was appended since the last reset
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the encoded records, leaving the log empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Append one record for component `id`; `payload` writes its body.
    pub fn append<F>(&mut self, id: usize, payload: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        if id >= MAX_COMPONENTS {
            return Err(Error::InvalidArgs(format!(
                "component id {} out of range (max {})",
                id,
                MAX_COMPONENTS - 1
            )));
        }
        let start = u32::try_from(self.buf.len())
            .map_err(|_| Error::InvalidArgs("revert log exceeds 4 GiB".into()))?;

        self.buf.push(id as u8);
        payload(&mut self.buf);
        let mut tail = [0u8; OFFSET_LEN];
        LittleEndian::write_u32(&mut tail, start);
        self.buf.extend_from_slice(&tail);
        Ok(())
    }
}

/// Walk `log` newest record first, handing each `(id, payload)` to `apply`.
///
/// Stops at the first error from `apply`. A log whose back-pointers do not
/// chain cleanly to offset 0 is `BadData`. Returns the number of records
/// applied.
pub fn replay<F>(log: &[u8], mut apply: F) -> Result<usize>
where
    F: FnMut(usize, &[u8]) -> Result<()>,
{
    let mut n = log.len();
    let mut records = 0;
    while n > OFFSET_LEN {
        let off = LittleEndian::read_u32(&log[n - OFFSET_LEN..n]) as usize;
        if off >= n - OFFSET_LEN {
            warn!(off, end = n - OFFSET_LEN, "Revert log back-pointer out of range");
            return Err(Error::BadData(format!(
                "revert log back-pointer {} past record end {}",
                off,
                n - OFFSET_LEN
            )));
        }
        let id = log[off] as usize;
        if id >= MAX_COMPONENTS {
            warn!(id, off, "Revert log names an out-of-range component");
            return Err(Error::BadData(format!(
                "revert log component id {} out of range",
                id
            )));
        }
        apply(id, &log[off + 1..n - OFFSET_LEN])?;
        records += 1;
        n = off;
    }
    if n != 0 {
        warn!(leftover = n, "Revert log has leftover bytes at the front");
        return Err(Error::BadData(format!(
            "revert log has {} leftover bytes",
            n
        )));
    }
    Ok(records)
}
