//! Reliant - replicated row storage with revert-log transactions
//!
//! Reliant keeps fixed-length rows, whole-file blobs and bitmaps on a set of
//! replica files, checksums every row, and survives up to `allowfails`
//! failing replicas per operation. A transaction layer on top makes groups
//! of mutations atomic across crashes.
//!
//! # Quick Start
//!
//! ```no_run
//! use reliant::{concurrency, storage, ReplicaConfig};
//!
//! # fn main() -> reliant::Result<()> {
//! let txn = concurrency::Transaction::open_files(&ReplicaConfig::single("data/rlog"))?;
//! let slots = storage::BigBitmap::open_files(&ReplicaConfig::single("data/slots"), 64, 1 << 24)?;
//! let slots = concurrency::Bitmap::open(&txn, 0, slots)?;
//! txn.setup()?;
//!
//! let guard = txn.begin();
//! let slot = slots.find(true)?;
//! guard.end()?;
//! # let _ = slot;
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - errors, the [`File`] abstraction, replica sets and their config are
//!   re-exported at the top level
//! - [`bits`]: in-memory flat and hierarchical bitmaps
//! - [`storage`]: tables, config blobs, arrays and persistent bitmaps
//! - [`concurrency`]: the transaction coordinator and transactional wrappers

pub use reliant_bits as bits;
pub use reliant_concurrency as concurrency;
pub use reliant_storage as storage;

pub use reliant_core::{
    replica, ConfigError, Error, File, MemFile, OsFile, Replica, ReplicaConfig, Result,
};
