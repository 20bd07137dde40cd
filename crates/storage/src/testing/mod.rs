//! Testing utilities for replica failure scenarios
//!
//! - **FaultyFile**: in-memory file whose writes follow a script
//!
//! # Example
//!
//! ```ignore
//! use reliant_storage::testing::{FaultyFile, WriteMode};
//!
//! // first write succeeds, second is corrupted, the rest succeed
//! let file = FaultyFile::new([WriteMode::Ok, WriteMode::Bad]);
//! ```

mod faulty;

pub use faulty::{FaultyFile, WriteMode};
