//! Transactional config blob
//!
//! The current payload is cached in memory; a write records the cached
//! payload as the revert record, so reverting is a plain rewrite.

use crate::transaction::{Component, Recorder, Transaction};
use parking_lot::Mutex;
use reliant_core::{Error, Result};
use std::sync::Arc;
use tracing::warn;

struct State {
    config: reliant_storage::Config,
    data: Vec<u8>,
}

/// A [`reliant_storage::Config`] whose writes can be reverted
pub struct Config {
    state: Mutex<State>,
    recorder: Recorder,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.recorder.id())
            .field("bytes", &self.state.lock().data.len())
            .finish()
    }
}

impl Config {
    /// Load `config` and register it with `txn` under component `id`.
    ///
    /// A config whose replicas are all empty opens with no payload; one that
    /// holds data but cannot be read is an error.
    pub fn open(txn: &Transaction, id: usize, config: reliant_storage::Config) -> Result<Arc<Self>> {
        let data = match config.read_file() {
            Ok(data) => data,
            Err(e) => match config.validate() {
                Err(v) if v.is_not_found() => Vec::new(),
                _ => {
                    warn!(id, error = %e, "Transactional config unreadable");
                    return Err(e);
                }
            },
        };
        txn.register(id, config, |config, recorder| Config {
            state: Mutex::new(State { config, data }),
            recorder,
        })
    }

    /// Cached payload; `NotFound` if there is none.
    pub fn read_file(&self) -> Result<Vec<u8>> {
        let state = self.state.lock();
        if state.data.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(state.data.clone())
    }

    /// `NotFound` if there is no payload.
    pub fn validate(&self) -> Result<()> {
        if self.state.lock().data.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Replace the payload.
    pub fn write_file(&self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        self.recorder
            .record(|b| b.extend_from_slice(&state.data))?;
        state.config.write_file(data)?;
        state.data = data.to_vec();
        Ok(())
    }
}

impl Component for Config {
    fn do_act(&self, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.config.write_file(payload)?;
        state.data = payload.to_vec();
        Ok(())
    }
}
