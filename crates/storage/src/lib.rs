//! Replicated storage structures for reliant
//!
//! Everything here sits on a replica set (`Vec<Replica>`) and tolerates up to
//! `allowfails` failing replicas per operation:
//!
//! - [`Table`]: fixed-length rows, each with a CRC32 trailer
//! - [`Config`]: a whole-file blob with a CRC32 header
//! - [`Array`] / [`BigArray`]: element arrays over a table, fully resident or
//!   paged by span
//! - [`Bitmap`] / [`BigBitmap`]: in-memory bit indices mirrored into a table
//! - [`Logger`]: an append-only line log with per-line CRC32
//! - [`rows`]: fixed-layout little-endian values read and written as table rows
//!
//! The [`Underlayer`] trait exposes a structure's replica slots so the
//! transaction layer can interpose on its files.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod big_array;
pub mod bitmap;
pub mod config;
pub mod json;
pub mod log;
pub mod rows;
pub mod table;
pub mod testing;

pub use array::{Array, RowArray};
pub use big_array::BigArray;
pub use bitmap::{BigBitmap, Bitmap, TableBitmap};
pub use config::Config;
pub use json::{read_json, write_json};
pub use log::{LogReader, Logger};
pub use rows::Row;
pub use table::Table;

use reliant_core::Replica;

/// Access to the replica files underneath a structure
pub trait Underlayer {
    /// Replica slots in read-preference order
    fn underlayer(&self) -> &[Replica];

    /// Mutable replica slots, for swapping file handles in place
    fn underlayer_mut(&mut self) -> &mut [Replica];
}
