//! Core types for reliant
//!
//! This crate defines the pieces every other layer builds on:
//! - Error: the error taxonomy shared by storage and transactions
//! - File: positional read/write/truncate handle (OS-backed or in-memory)
//! - Replica: one slot of a replica set, possibly a hole
//! - ReplicaConfig: which files make up a replica set and how many may fail

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod file;
pub mod replica;

pub use config::{ConfigError, ReplicaConfig};
pub use error::{Error, FailCounter, Result};
pub use file::{read_all, write_all, File, MemFile, OsFile};
pub use replica::Replica;
