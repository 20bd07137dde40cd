//! Transactions for reliant
//!
//! This crate makes groups of storage mutations atomic across crashes:
//! - Transaction: lock, revert log, pending writes and the component registry
//! - RevertLog: pre-images of every mutation, replayed newest first
//! - TxnFile: replica shim that queues writes until commit
//! - Array / Bitmap / Config: transactional wrappers over the storage structures
//!
//! Writes reach the replicas only after the revert log is durable, so an
//! interrupted commit is always undone by [`Transaction::setup`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod bitmap;
pub mod config;
pub mod pending;
pub mod revert_log;
pub mod transaction;

pub use array::Array;
pub use bitmap::Bitmap;
pub use config::Config;
pub use pending::{PendingWrites, TxnFile};
pub use revert_log::{RevertLog, MAX_COMPONENTS};
pub use transaction::{Component, Recorder, Transaction, TxnGuard};
