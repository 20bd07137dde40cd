//! Replicated whole-file blobs
//!
//! # Blob Format
//!
//! ```text
//! ┌──────────────────────────┬────────┬─────────────┐
//! │ CRC32 as 8 lowercase hex │ "\r\n" │ payload     │
//! └──────────────────────────┴────────┴─────────────┘
//! ```
//!
//! Every replica holds the whole blob. Writes replace the file content;
//! reads take the first replica that passes the header and checksum check.
//! The transaction engine keeps its revert log in one of these.

use crate::Underlayer;
use reliant_core::{file, replica, Error, FailCounter, File, Replica, ReplicaConfig, Result};
use tracing::{debug, warn};

const HEADER_LEN: usize = 10;

fn encode_blob(data: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(data.len() + HEADER_LEN);
    b.extend_from_slice(format!("{:08x}\r\n", crc32fast::hash(data)).as_bytes());
    b.extend_from_slice(data);
    b
}

fn parse_header(b: &[u8]) -> Result<u32> {
    if b.len() < HEADER_LEN || &b[8..HEADER_LEN] != b"\r\n" {
        return Err(Error::BadData("config blob has no crc32 header".into()));
    }
    let hex = &b[..8];
    if !hex.iter().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(Error::BadData("config blob header is not lowercase hex".into()));
    }
    let hex = std::str::from_utf8(hex)
        .map_err(|_| Error::BadData("config blob header is not lowercase hex".into()))?;
    u32::from_str_radix(hex, 16)
        .map_err(|_| Error::BadData("config blob header is not lowercase hex".into()))
}

fn load_blob(f: &dyn File) -> Result<Vec<u8>> {
    let mut b = file::read_all(f)?;
    let crc = parse_header(&b)?;
    if crc32fast::hash(&b[HEADER_LEN..]) != crc {
        return Err(Error::CrcChecksum);
    }
    b.drain(..HEADER_LEN);
    Ok(b)
}

/// Blob store replicated across files
pub struct Config {
    files: Vec<Replica>,
    allowfails: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("replicas", &self.files.len())
            .field("allowfails", &self.allowfails)
            .finish()
    }
}

impl Config {
    /// Blob store over already-open replicas
    pub fn open(files: Vec<Replica>, allowfails: usize) -> Self {
        Config { files, allowfails }
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig) -> Result<Self> {
        let files = replica::open(config)?;
        Ok(Self::open(files, config.allowfails))
    }

    /// Replica failures tolerated per write
    pub fn allow_fails(&self) -> usize {
        self.allowfails
    }

    /// `Ok` if some replica holds data, `NotFound` if every replica is empty.
    pub fn validate(&self) -> Result<()> {
        if replica::fsize_of(&self.files, self.allowfails)? == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Payload of the first replica holding an intact blob.
    pub fn read_file(&self) -> Result<Vec<u8>> {
        for (i, f) in self.files.iter().enumerate() {
            let Some(f) = f else { continue };
            match load_blob(f.as_ref()) {
                Ok(data) => return Ok(data),
                Err(e) => debug!(replica = i, error = %e, "Config replica unreadable"),
            }
        }
        warn!(replicas = self.files.len(), "Config read_file: no intact replica");
        Err(Error::TooManyFails {
            op: "read_file",
            fails: self.files.len(),
            allowfails: self.allowfails,
        })
    }

    /// Replace the blob on every replica and sync it to stable storage.
    ///
    /// A replica counts as written only once its sync succeeded.
    pub fn write_file(&self, data: &[u8]) -> Result<()> {
        let b = encode_blob(data);
        let mut counter = FailCounter::new("write_file", self.allowfails);
        for (i, f) in self.files.iter().enumerate() {
            if let Some(f) = f {
                match file::write_all(f.as_ref(), &b).and_then(|()| f.sync()) {
                    Ok(()) => continue,
                    Err(e) => warn!(replica = i, error = %e, "Config write_file: replica write failed"),
                }
            }
            counter.fail()?;
        }
        Ok(())
    }
}

impl Underlayer for Config {
    fn underlayer(&self) -> &[Replica] {
        &self.files
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        &mut self.files
    }
}
