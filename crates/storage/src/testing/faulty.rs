//! Scripted-failure in-memory file
//!
//! Each `write_at` pops the next [`WriteMode`] from a queue; once the queue
//! is drained every write uses the fallback mode. Reads, truncates, syncs and
//! size queries always behave, unless truncates or syncs are switched to fail.

use parking_lot::Mutex;
use reliant_core::{File, MemFile};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Behaviour of one write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Write normally
    #[default]
    Ok,
    /// Return an error and write nothing
    Fail,
    /// Report success but store corrupted bytes
    Bad,
    /// Report success but drop the last 5 bytes
    Short,
}

/// In-memory [`File`] with scripted write failures
#[derive(Debug, Default)]
pub struct FaultyFile {
    inner: MemFile,
    modes: Mutex<VecDeque<WriteMode>>,
    fallback: Mutex<WriteMode>,
    fail_truncate: AtomicBool,
    fail_sync: AtomicBool,
    writes: AtomicUsize,
    syncs: AtomicUsize,
}

impl FaultyFile {
    /// File following `modes`, then writing normally
    pub fn new(modes: impl IntoIterator<Item = WriteMode>) -> Self {
        FaultyFile {
            modes: Mutex::new(modes.into_iter().collect()),
            ..Default::default()
        }
    }

    /// File that writes in `mode` forever
    pub fn always(mode: WriteMode) -> Self {
        let f = Self::default();
        f.set_fallback(mode);
        f
    }

    /// Mode used once the script is drained
    pub fn set_fallback(&self, mode: WriteMode) {
        *self.fallback.lock() = mode;
    }

    /// Append modes to the script
    pub fn push_modes(&self, modes: impl IntoIterator<Item = WriteMode>) {
        self.modes.lock().extend(modes);
    }

    /// Make every truncate fail (or succeed again)
    pub fn set_fail_truncate(&self, fail: bool) {
        self.fail_truncate.store(fail, Ordering::SeqCst);
    }

    /// Make every sync fail (or succeed again)
    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `sync` calls so far
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Number of `write_at` calls seen so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of the stored bytes
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.snapshot()
    }

    /// Underlying storage, for direct tampering
    pub fn inner(&self) -> &MemFile {
        &self.inner
    }

    fn next_mode(&self) -> WriteMode {
        match self.modes.lock().pop_front() {
            Some(mode) => mode,
            None => *self.fallback.lock(),
        }
    }
}

/// Flip two bytes past a 10-byte prefix when there is room, else the first.
fn corrupt(buf: &[u8]) -> Vec<u8> {
    let mut b = buf.to_vec();
    if b.len() >= 12 {
        b[10] ^= 0x8F;
        b[11] ^= 0xF7;
    } else if !b.is_empty() {
        b[0] ^= 0x77;
    }
    b
}

impl File for FaultyFile {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        self.inner.read_at(buf, off)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.next_mode() {
            WriteMode::Ok => self.inner.write_at(buf, off),
            WriteMode::Fail => Err(io::Error::new(io::ErrorKind::Other, "injected write failure")),
            WriteMode::Bad => self.inner.write_at(&corrupt(buf), off),
            WriteMode::Short => {
                let keep = buf.len().saturating_sub(5);
                self.inner.write_at(&buf[..keep], off)
            }
        }
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        if self.fail_truncate.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected truncate failure"));
        }
        self.inner.truncate(size)
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn sync(&self) -> io::Result<()> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure"));
        }
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
