//! Transaction coordinator
//!
//! A [`Transaction`] owns the revert log, the pending-write list and a
//! registry of up to [`MAX_COMPONENTS`] components. Registering a component
//! swaps its replica files for [`TxnFile`] shims, so every write it makes is
//! queued until commit while the component's in-memory state moves ahead.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. begin()                - take the exclusive lock
//! 2. component mutations    - each appends a pre-image record, then queues writes
//! 3. rlf.write_file(log)    - persist the revert log (DURABILITY POINT)
//! 4. pending.commit()       - apply queued writes to the replicas
//! 5. rlf.write_file([])     - clear the persisted revert log
//! ```
//!
//! A crash before step 3 leaves the disk untouched. A crash between 3 and 5
//! leaves a revert log behind; [`Transaction::setup`] replays it on the next
//! open, restoring every component to its state before step 1.

use crate::pending::{PendingWrites, TxnFile};
use crate::revert_log::{self, RevertLog, MAX_COMPONENTS};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use reliant_core::{Error, ReplicaConfig, Result};
use reliant_storage::{Config, Underlayer};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A structure that can restore itself from its own revert records
pub trait Component: Send + Sync {
    /// Apply one revert record previously appended through a [`Recorder`].
    fn do_act(&self, payload: &[u8]) -> Result<()>;
}

pub(crate) struct Shared {
    log: Mutex<RevertLog>,
    pending: Arc<PendingWrites>,
}

/// Per-component handle for appending revert records
#[derive(Clone)]
pub struct Recorder {
    id: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder").field("id", &self.id).finish()
    }
}

impl Recorder {
    /// Component id this recorder writes under
    pub fn id(&self) -> usize {
        self.id
    }

    /// Append a record; `payload` writes the pre-image bytes.
    pub fn record<F>(&self, payload: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        self.shared.log.lock().append(self.id, payload)
    }
}

/// Revert-log transaction coordinator
pub struct Transaction {
    registry: Mutex<Vec<Option<Arc<dyn Component>>>>,
    shared: Arc<Shared>,
    lock: RwLock<()>,
    rlf: Config,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.registry.lock().iter().filter(|c| c.is_some()).count();
        f.debug_struct("Transaction")
            .field("components", &registered)
            .field("log_bytes", &self.shared.log.lock().len())
            .field("pending", &self.shared.pending.len())
            .field("rlf", &self.rlf)
            .finish()
    }
}

impl Transaction {
    /// Coordinator persisting its revert log in `rlf`
    pub fn open(rlf: Config) -> Self {
        Transaction {
            registry: Mutex::new(vec![None; MAX_COMPONENTS]),
            shared: Arc::new(Shared {
                log: Mutex::new(RevertLog::new()),
                pending: Arc::new(PendingWrites::new()),
            }),
            lock: RwLock::new(()),
            rlf,
        }
    }

    /// Open (or create) the revert-log replicas named by `config`.
    pub fn open_files(config: &ReplicaConfig) -> Result<Self> {
        Ok(Self::open(Config::open_files(config)?))
    }

    /// Revert-log blob store
    pub fn revert_log_file(&self) -> &Config {
        &self.rlf
    }

    /// Bytes of revert records appended since the last reset
    pub fn log_len(&self) -> usize {
        self.shared.log.lock().len()
    }

    /// Number of writes waiting for commit
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Bind `inner` to this transaction under `id`.
    ///
    /// Every replica file of `inner` is replaced by a [`TxnFile`]; `build`
    /// wraps the rebound structure into the component the caller keeps using.
    pub fn register<U, C, F>(&self, id: usize, mut inner: U, build: F) -> Result<Arc<C>>
    where
        U: Underlayer,
        C: Component + 'static,
        F: FnOnce(U, Recorder) -> C,
    {
        let mut registry = self.registry.lock();
        if id >= MAX_COMPONENTS {
            return Err(Error::InvalidArgs(format!(
                "component id {} out of range (max {})",
                id,
                MAX_COMPONENTS - 1
            )));
        }
        if registry[id].is_some() {
            return Err(Error::AlreadyExists(format!("component {}", id)));
        }

        for slot in inner.underlayer_mut() {
            if let Some(f) = slot.take() {
                *slot = Some(Arc::new(TxnFile::new(f, Arc::clone(&self.shared.pending))));
            }
        }
        let recorder = Recorder {
            id,
            shared: Arc::clone(&self.shared),
        };
        let component = Arc::new(build(inner, recorder));
        registry[id] = Some(component.clone() as Arc<dyn Component>);
        debug!(id, "Component registered");
        Ok(component)
    }

    /// Recover from a revert log left by an interrupted commit.
    ///
    /// Call once after every component is registered. No log (or an empty
    /// one) is a no-op. Otherwise the log is replayed, the restore writes are
    /// applied and the persisted log is cleared.
    pub fn setup(&self) -> Result<()> {
        let _lock = self.lock.write();

        let log = match self.rlf.read_file() {
            Ok(log) => log,
            Err(read_err) => {
                return match self.rlf.validate() {
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e),
                    Ok(()) => {
                        error!(error = %read_err, "Revert log present but unreadable");
                        Err(read_err)
                    }
                };
            }
        };
        if log.is_empty() {
            return Ok(());
        }

        info!(bytes = log.len(), "Replaying revert log left by an interrupted transaction");
        let records = self.replay(&log)?;
        self.shared.pending.commit()?;
        self.rlf.write_file(&[])?;
        info!(records, "Revert log replayed");
        Ok(())
    }

    /// Start a transaction, holding the exclusive lock until the guard ends.
    pub fn begin(&self) -> TxnGuard<'_> {
        TxnGuard {
            txn: self,
            _lock: self.lock.write(),
            done: false,
        }
    }

    /// Shared lock for readers outside any transaction
    pub fn rbegin(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    fn replay(&self, log: &[u8]) -> Result<usize> {
        let registry = self.registry.lock();
        revert_log::replay(log, |id, payload| match &registry[id] {
            Some(component) => component.do_act(payload),
            None => {
                warn!(id, "Revert log names an unregistered component");
                Err(Error::BadData(format!(
                    "revert log names unregistered component {}",
                    id
                )))
            }
        })
    }

    fn end_locked(&self, fail: bool) -> Result<()> {
        if self.shared.pending.is_empty() {
            self.shared.log.lock().clear();
            return Ok(());
        }

        let log = self.shared.log.lock().as_bytes().to_vec();
        if let Err(e) = self.rlf.write_file(&log) {
            error!(bytes = log.len(), error = %e, "Failed to persist revert log, rolling back");
            self.rollback_locked();
            return Err(e);
        }
        if fail {
            debug!(bytes = log.len(), "Transaction stopped after persisting its revert log");
            return Ok(());
        }

        if let Err(e) = self.shared.pending.commit() {
            warn!(error = %e, "Commit failed, restoring pre-transaction state");
            self.restore_after_failed_commit();
            return Err(e);
        }
        self.shared.log.lock().clear();
        if let Err(e) = self.rlf.write_file(&[]) {
            error!(error = %e, "Committed but failed to clear the revert log");
            return Err(e);
        }
        debug!(bytes = log.len(), "Transaction committed");
        Ok(())
    }

    /// Replay the log into memory; the restore writes are discarded.
    fn rollback_locked(&self) {
        self.shared.pending.clear();
        let log = self.shared.log.lock().take();
        if let Err(e) = self.replay(&log) {
            error!(error = %e, "Rollback failed to replay the revert log");
            panic!("transaction rollback failed: {}", e);
        }
        self.shared.pending.clear();
        debug!(bytes = log.len(), "Transaction rolled back");
    }

    /// Replay the log and write the pre-images back over a partial commit.
    ///
    /// The persisted log is cleared only once the restore writes landed; if
    /// they did not, the next `setup()` replays it again.
    fn restore_after_failed_commit(&self) {
        self.shared.pending.clear();
        let log = self.shared.log.lock().take();
        if let Err(e) = self.replay(&log) {
            error!(error = %e, "Restore failed to replay the revert log");
            panic!("transaction restore failed: {}", e);
        }
        match self.shared.pending.commit() {
            Ok(()) => {
                if let Err(e) = self.rlf.write_file(&[]) {
                    warn!(error = %e, "Restored, but failed to clear the revert log");
                }
            }
            Err(e) => {
                warn!(error = %e, "Restore writes failed, revert log kept for setup");
            }
        }
    }
}

/// Exclusive hold on a [`Transaction`]
///
/// Finish with [`end`](TxnGuard::end), [`end_with_fail`](TxnGuard::end_with_fail)
/// or [`rollback`](TxnGuard::rollback). A guard dropped without either is
/// rolled back.
#[must_use = "dropping the guard rolls the transaction back"]
pub struct TxnGuard<'a> {
    txn: &'a Transaction,
    _lock: RwLockWriteGuard<'a, ()>,
    done: bool,
}

impl std::fmt::Debug for TxnGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnGuard").field("done", &self.done).finish()
    }
}

impl TxnGuard<'_> {
    /// Persist the revert log, then apply every pending write.
    pub fn end(self) -> Result<()> {
        self.end_with_fail(false)
    }

    /// Like [`end`](TxnGuard::end); with `fail` it stops right after the
    /// revert log is persisted, leaving pending writes unapplied.
    pub fn end_with_fail(mut self, fail: bool) -> Result<()> {
        self.done = true;
        self.txn.end_locked(fail)
    }

    /// Undo every mutation in memory and drop the pending writes.
    ///
    /// # Panics
    ///
    /// If a component cannot apply its revert record.
    pub fn rollback(mut self) {
        self.done = true;
        self.txn.rollback_locked();
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if self.done || std::thread::panicking() {
            return;
        }
        warn!("Transaction guard dropped without end, rolling back");
        self.txn.rollback_locked();
    }
}
