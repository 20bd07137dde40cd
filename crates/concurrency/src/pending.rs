//! Buffered file writes of the running transaction
//!
//! Registered components see their replica files through [`TxnFile`]: writes
//! and truncates are queued in a shared [`PendingWrites`] list instead of
//! reaching the disk. Reads and size queries replay the queue over the real
//! file, so a component reading back its own rows sees what it wrote.
//! Commit applies the queue in order, then syncs every file it touched.

use parking_lot::Mutex;
use reliant_core::{File, Result};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Op {
    Write { off: u64, bytes: Vec<u8> },
    Truncate { size: u64 },
}

struct Pending {
    slot: usize,
    target: Arc<dyn File>,
    op: Op,
}

#[derive(Default)]
struct State {
    ops: Vec<Pending>,
    next_slot: usize,
}

/// Ordered list of writes waiting for commit
#[derive(Default)]
pub struct PendingWrites {
    state: Mutex<State>,
}

impl std::fmt::Debug for PendingWrites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingWrites")
            .field("ops", &state.ops.len())
            .field("files", &state.next_slot)
            .finish()
    }
}

impl PendingWrites {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.state.lock().ops.is_empty()
    }

    /// Discard every queued operation.
    pub fn clear(&self) {
        self.state.lock().ops.clear();
    }

    fn alloc_slot(&self) -> usize {
        let mut state = self.state.lock();
        let slot = state.next_slot;
        state.next_slot += 1;
        slot
    }

    fn push(&self, slot: usize, target: &Arc<dyn File>, op: Op) {
        self.state.lock().ops.push(Pending {
            slot,
            target: Arc::clone(target),
            op,
        });
    }

    /// Apply the queue in order, emptying it, then sync each touched file.
    ///
    /// Stops at the first failing operation; the ones after it are dropped.
    pub fn commit(&self) -> Result<()> {
        let ops = std::mem::take(&mut self.state.lock().ops);
        let total = ops.len();
        let mut touched: Vec<(usize, Arc<dyn File>)> = Vec::new();
        for (i, p) in ops.into_iter().enumerate() {
            let res = match &p.op {
                Op::Write { off, bytes } => p.target.write_at(bytes, *off),
                Op::Truncate { size } => p.target.truncate(*size),
            };
            if let Err(e) = res {
                warn!(file = p.slot, op = i, total, error = %e, "Pending write failed during commit");
                return Err(e.into());
            }
            if !touched.iter().any(|(slot, _)| *slot == p.slot) {
                touched.push((p.slot, p.target));
            }
        }
        for (slot, target) in &touched {
            if let Err(e) = target.sync() {
                warn!(file = slot, error = %e, "Sync failed during commit");
                return Err(e.into());
            }
        }
        debug!(ops = total, files = touched.len(), "Pending writes committed");
        Ok(())
    }

    /// Size of file `slot` once the queue is applied over `base`.
    fn len_of(&self, slot: usize, base: u64) -> u64 {
        let state = self.state.lock();
        let mine = state.ops.iter().filter(|p| p.slot == slot).map(|p| &p.op);
        len_after(mine, base)
    }
}

fn len_after<'a>(ops: impl IntoIterator<Item = &'a Op>, base: u64) -> u64 {
    ops.into_iter().fold(base, |len, op| match op {
        Op::Write { off, bytes } => len.max(off + bytes.len() as u64),
        Op::Truncate { size } => *size,
    })
}

/// A replica file whose mutations are deferred to commit
pub struct TxnFile {
    inner: Arc<dyn File>,
    pending: Arc<PendingWrites>,
    slot: usize,
}

impl std::fmt::Debug for TxnFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnFile").field("slot", &self.slot).finish()
    }
}

impl TxnFile {
    /// Route `inner`'s mutations through `pending`.
    pub fn new(inner: Arc<dyn File>, pending: Arc<PendingWrites>) -> Self {
        let slot = pending.alloc_slot();
        TxnFile {
            inner,
            pending,
            slot,
        }
    }

    /// The file commits are applied to
    pub fn inner(&self) -> &Arc<dyn File> {
        &self.inner
    }
}

impl File for TxnFile {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let state = self.pending.state.lock();
        let mine: Vec<&Op> = state
            .ops
            .iter()
            .filter(|p| p.slot == self.slot)
            .map(|p| &p.op)
            .collect();
        if mine.is_empty() {
            return self.inner.read_at(buf, off);
        }

        let base = self.inner.len()?;
        let len = len_after(mine.iter().copied(), base);
        let end = off + buf.len() as u64;
        if end > len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of pending file",
            ));
        }

        // real bytes first, zero where the real file is shorter
        buf.fill(0);
        if base > off {
            let n = (base.min(end) - off) as usize;
            self.inner.read_at(&mut buf[..n], off)?;
        }

        for op in mine {
            match op {
                Op::Write { off: woff, bytes } => {
                    let wend = woff + bytes.len() as u64;
                    let lo = off.max(*woff);
                    let hi = end.min(wend);
                    if lo < hi {
                        let dst = (lo - off) as usize..(hi - off) as usize;
                        let src = (lo - woff) as usize..(hi - woff) as usize;
                        buf[dst].copy_from_slice(&bytes[src]);
                    }
                }
                Op::Truncate { size } => {
                    if *size < end {
                        let from = size.saturating_sub(off) as usize;
                        buf[from..].fill(0);
                    }
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        if !buf.is_empty() {
            self.pending.push(
                self.slot,
                &self.inner,
                Op::Write {
                    off,
                    bytes: buf.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.pending
            .push(self.slot, &self.inner, Op::Truncate { size });
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        let base = self.inner.len()?;
        Ok(self.pending.len_of(self.slot, base))
    }

    /// No-op: the commit syncs the real file once its writes are applied.
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
