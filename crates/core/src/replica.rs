//! Replica sets
//!
//! A replica set is an ordered list of files expected to hold byte-identical
//! content. A `None` slot is a hole: a replica already known to be unavailable.
//! Holes are skipped on I/O but still count as a failure, so a set with one
//! hole and `allowfails = 1` has no tolerance left.

use crate::config::ReplicaConfig;
use crate::error::{FailCounter, Result};
use crate::file::{File, OsFile};
use std::sync::Arc;
use tracing::{error, warn};

/// One slot of a replica set
pub type Replica = Option<Arc<dyn File>>;

/// Open (creating if needed) every file named by `config`.
///
/// Files that fail to open become holes. More than `allowfails` failures
/// abort the whole open and close whatever was already opened.
pub fn open(config: &ReplicaConfig) -> Result<Vec<Replica>> {
    config.validate()?;

    let mut counter = FailCounter::new("open", config.allowfails);
    let mut files: Vec<Replica> = Vec::with_capacity(config.paths.len());
    for path in &config.paths {
        match OsFile::open(path) {
            Ok(f) => files.push(Some(Arc::new(f))),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open replica");
                counter.fail()?;
                files.push(None);
            }
        }
    }
    Ok(files)
}

/// Size of the largest replica.
///
/// Replicas that cannot report their size (and holes) count as failures.
pub fn fsize_of(files: &[Replica], allowfails: usize) -> Result<u64> {
    let mut counter = FailCounter::new("fsize_of", allowfails);
    let mut fsize = 0u64;
    for (i, f) in files.iter().enumerate() {
        match f {
            Some(f) => match f.len() {
                Ok(len) => {
                    fsize = fsize.max(len);
                    continue;
                }
                Err(e) => warn!(replica = i, error = %e, "Replica size query failed"),
            },
            None => {}
        }
        if let Err(e) = counter.fail() {
            error!(replica = i, "Replica size query gave up: too many fails");
            return Err(e);
        }
    }
    Ok(fsize)
}

/// Wrap each file in its own slot.
pub fn from_files<I, F>(files: I) -> Vec<Replica>
where
    I: IntoIterator<Item = Arc<F>>,
    F: File + 'static,
{
    files
        .into_iter()
        .map(|f| Some(f as Arc<dyn File>))
        .collect()
}
