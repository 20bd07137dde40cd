//! Positional file abstraction
//!
//! Storage structures never touch `std::fs` directly: they talk to a [`File`],
//! which may be a real file ([`OsFile`]), an in-memory buffer ([`MemFile`]), a
//! fault-injecting test double, or a transactional shim that buffers writes.
//!
//! All methods take `&self`; implementations synchronize internally so a handle
//! can be shared between a structure and a transaction's pending-write list.

use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Positional read/write handle.
///
/// Handles are closed when dropped.
pub trait File: Send + Sync {
    /// Fill `buf` from offset `off`.
    ///
    /// A short read is an error of kind `UnexpectedEof`.
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()>;

    /// Write all of `buf` at offset `off`, extending the file if needed.
    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()>;

    /// Set the file length to exactly `size` bytes.
    fn truncate(&self, size: u64) -> io::Result<()>;

    /// Current file length in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Flush written content to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// True if the file has no bytes.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Read the whole content of `f`.
pub fn read_all(f: &dyn File) -> io::Result<Vec<u8>> {
    let size = f.len()?;
    let size = usize::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "file too large to load"))?;
    let mut data = vec![0u8; size];
    f.read_at(&mut data, 0)?;
    Ok(data)
}

/// Replace the whole content of `f` with `data`.
pub fn write_all(f: &dyn File, data: &[u8]) -> io::Result<()> {
    f.write_at(data, 0)?;
    f.truncate(data.len() as u64)
}

// ============================================================================
// OsFile
// ============================================================================

/// A [`File`] backed by an OS file, using positional I/O.
#[derive(Debug)]
pub struct OsFile {
    file: std::fs::File,
    path: PathBuf,
}

impl OsFile {
    /// Open `path` read-write, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(OsFile { file, path })
    }

    /// Path this file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl File for OsFile {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, off)
    }

    #[cfg(windows)]
    fn read_at(&self, mut buf: &mut [u8], mut off: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, off) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    off += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, off)
    }

    #[cfg(windows)]
    fn write_at(&self, mut buf: &[u8], mut off: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_write(buf, off) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    off += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}

// ============================================================================
// MemFile
// ============================================================================

/// A [`File`] held entirely in memory.
///
/// Writes past the end zero-fill the gap, like a sparse OS file.
#[derive(Debug, Default)]
pub struct MemFile {
    data: RwLock<Vec<u8>>,
}

impl MemFile {
    /// Empty in-memory file
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory file with initial content
    pub fn with_data(data: Vec<u8>) -> Self {
        MemFile {
            data: RwLock::new(data),
        }
    }

    /// Copy of the current content
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Run `f` over the raw bytes, e.g. to flip bits in a test.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.data.write())
    }
}

impl File for MemFile {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let data = self.data.read();
        let start = usize::try_from(off).unwrap_or(usize::MAX);
        let end = start.saturating_add(buf.len());
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of in-memory file",
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        let mut data = self.data.write();
        let start = usize::try_from(off)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size too large"))?;
        self.data.write().resize(size, 0);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
