//! Error types for reliant
//!
//! One enum covers every storage and transaction failure. Variants are kinds,
//! not call sites: the same `TooManyFails` comes out of a table write, a config
//! write or a replica open. We use `thiserror` for `Display` and `Error`.

use std::io;
use thiserror::Error;

/// Result type alias for reliant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the reliant storage layer
#[derive(Debug, Error)]
pub enum Error {
    /// Index past a fixed capacity (bitmap words) or past the addressable
    /// range of a file (rows, elements)
    #[error("Out of range: index {index} >= capacity {capacity}")]
    OutOfRange {
        /// Offending index
        index: usize,
        /// Number of addressable indices
        capacity: usize,
    },

    /// Malformed call (range with from > to, buffer length mismatch, ...)
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Corrupt or malformed data on a replica or in a revert log
    #[error("Bad data: {0}")]
    BadData(String),

    /// Log line longer than the logger's line limit
    #[error("Line too long: {len} bytes, limit {max}")]
    LineTooLong {
        /// Encoded line length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Structure is fine but the checksum does not match
    #[error("CRC checksum error")]
    CrcChecksum,

    /// More replicas failed than the configured tolerance
    #[error("Too many fails: {fails} replica failures during {op} ({allowfails} allowed)")]
    TooManyFails {
        /// Operation that gave up
        op: &'static str,
        /// Failures counted when the operation gave up
        fails: usize,
        /// Configured tolerance
        allowfails: usize,
    },

    /// Read past the valid length; a normal end-of-iteration signal
    #[error("End of data")]
    EndOfData,

    /// Nothing matched (bit search exhausted, file absent)
    #[error("Not found")]
    NotFound,

    /// Slot already taken (component id registered twice)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// I/O error from an underlying file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// True for [`Error::EndOfData`]
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Error::EndOfData)
    }

    /// True for corruption of any flavour ([`Error::BadData`] or [`Error::CrcChecksum`])
    pub fn is_bad_data(&self) -> bool {
        matches!(self, Error::BadData(_) | Error::CrcChecksum)
    }

    /// True for [`Error::TooManyFails`]
    pub fn is_too_many_fails(&self) -> bool {
        matches!(self, Error::TooManyFails { .. })
    }

    pub(crate) fn too_many_fails(op: &'static str, fails: usize, allowfails: usize) -> Self {
        Error::TooManyFails {
            op,
            fails,
            allowfails,
        }
    }
}

/// Counts replica failures for one logical operation.
///
/// Every failing replica (or hole) calls [`FailCounter::fail`]; once the count
/// exceeds `allowfails` the operation must abort with the returned error.
#[derive(Debug)]
pub struct FailCounter {
    op: &'static str,
    fails: usize,
    allowfails: usize,
}

impl FailCounter {
    /// Start counting for `op`
    pub fn new(op: &'static str, allowfails: usize) -> Self {
        FailCounter {
            op,
            fails: 0,
            allowfails,
        }
    }

    /// Record one failure
    pub fn fail(&mut self) -> Result<()> {
        self.fails += 1;
        if self.fails > self.allowfails {
            return Err(Error::too_many_fails(self.op, self.fails, self.allowfails));
        }
        Ok(())
    }

    /// Failures recorded so far
    pub fn fails(&self) -> usize {
        self.fails
    }
}
