//! Replica set configuration
//!
//! Describes which files hold the copies of one structure and how many of them
//! may fail per operation. Can be built in code or loaded from TOML:
//!
//! ```toml
//! paths = ["/data/a/bitmap.tbl", "/data/b/bitmap.tbl", "/data/c/bitmap.tbl"]
//! allowfails = 1
//! ```

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Replica set configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Replica file paths, in read-preference order
    pub paths: Vec<PathBuf>,
    /// Replica failures tolerated by a single read or write
    #[serde(default)]
    pub allowfails: usize,
}

impl ReplicaConfig {
    /// Empty configuration (no replicas, no tolerance)
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-replica configuration
    pub fn single(path: impl Into<PathBuf>) -> Self {
        ReplicaConfig {
            paths: vec![path.into()],
            allowfails: 0,
        }
    }

    /// Append a replica path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Set failure tolerance
    pub fn with_allowfails(mut self, allowfails: usize) -> Self {
        self.allowfails = allowfails;
        self
    }

    /// Validate configuration
    ///
    /// At least one replica, and at least one replica that must succeed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::NoReplicas);
        }
        if self.allowfails >= self.paths.len() {
            return Err(ConfigError::AllowFailsTooLarge {
                allowfails: self.allowfails,
                replicas: self.paths.len(),
            });
        }
        Ok(())
    }

    /// Parse from a TOML document and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ReplicaConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No replica paths given
    #[error("Replica set has no paths")]
    NoReplicas,

    /// Tolerance leaves no replica that must succeed
    #[error("allowfails {allowfails} must be smaller than replica count {replicas}")]
    AllowFailsTooLarge {
        /// Configured tolerance
        allowfails: usize,
        /// Number of replicas
        replicas: usize,
    },

    /// TOML parse failure
    #[error("Invalid replica config: {0}")]
    Parse(String),

    /// Config file could not be read
    #[error("Cannot read replica config {path}: {reason}")]
    Read {
        /// Path that failed
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidArgs(e.to_string())
    }
}
