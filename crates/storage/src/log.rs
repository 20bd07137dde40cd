//! Replicated append-only line log
//!
//! # Line Format
//!
//! ```text
//! ┌──────────────────────────┬──────┬──────────────┬──────┐
//! │ CRC32 of message, base36 │ "\t" │ message      │ "\n" │
//! └──────────────────────────┴──────┴──────────────┴──────┘
//! ```
//!
//! Every replica receives each line at the same offset. A line (including
//! its `\n`) never exceeds `linemax` bytes, which is at least
//! [`MIN_LINE_MAX`].
//!
//! On open each replica's tail is inspected: anything after the last `\n` is a
//! torn write and the log resumes at the end of the last whole line. The torn
//! bytes stay on disk until the next line overwrites them. The log size is the
//! furthest resume point across replicas.
//!
//! Readers take lines from the first available replica and re-read any line
//! that fails its checksum from the replicas after it.

use crate::Underlayer;
use parking_lot::Mutex;
use reliant_core::{replica, Error, FailCounter, File, Replica, ReplicaConfig, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Smallest accepted line limit; smaller limits are raised to this
pub const MIN_LINE_MAX: usize = 4096;

const READ_CHUNK: usize = 64 * 1024;

// ============================================================================
// Line encoding
// ============================================================================

fn to_base36(mut v: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::with_capacity(7);
    loop {
        out.push(DIGITS[(v % 36) as usize]);
        v /= 36;
        if v == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &[u8]) -> Option<u32> {
    if s.is_empty() || !s.iter().all(u8::is_ascii_alphanumeric) {
        return None;
    }
    u32::from_str_radix(std::str::from_utf8(s).ok()?, 36).ok()
}

fn encode_line(msg: &[u8]) -> Vec<u8> {
    let crc = to_base36(crc32fast::hash(msg));
    let mut b = Vec::with_capacity(crc.len() + msg.len() + 2);
    b.extend_from_slice(crc.as_bytes());
    b.push(b'\t');
    b.extend_from_slice(msg);
    b.push(b'\n');
    b
}

/// Message of a stored line (without its `\n`).
fn check_line(line: &[u8]) -> Result<&[u8]> {
    let sep = line
        .iter()
        .position(|&c| c == b'\t')
        .ok_or_else(|| Error::BadData("log line has no crc separator".into()))?;
    let crc = from_base36(&line[..sep])
        .ok_or_else(|| Error::BadData("log line crc is not base36".into()))?;
    let msg = &line[sep + 1..];
    if crc32fast::hash(msg) != crc {
        return Err(Error::CrcChecksum);
    }
    Ok(msg)
}

/// Length of the run of whole, valid lines at the start of `lines`.
///
/// The error, if any, is the reason the run stopped before the last `\n`.
fn check_lines(lines: &[u8]) -> (usize, Result<()>) {
    let mut n = 0;
    let mut rest = lines;
    while let Some(eol) = rest.iter().position(|&c| c == b'\n') {
        if let Err(e) = check_line(&rest[..eol]) {
            return (n, Err(e));
        }
        n += eol + 1;
        rest = &rest[eol + 1..];
    }
    (n, Ok(()))
}

/// Read the line at `off` from `f` without buffering.
///
/// Returns the message and the stored line length.
fn read_line_at(f: &dyn File, off: u64, end: u64, linemax: usize) -> Result<(Vec<u8>, usize)> {
    let n = (end - off).min(linemax as u64) as usize;
    let mut b = vec![0u8; n];
    f.read_at(&mut b, off)?;
    let eol = match b.iter().position(|&c| c == b'\n') {
        Some(eol) => eol,
        None if n == linemax => return Err(Error::LineTooLong { len: n, max: linemax }),
        None => return Err(Error::BadData(format!("torn log line at offset {}", off))),
    };
    let msg = check_line(&b[..eol])?.to_vec();
    Ok((msg, eol + 1))
}

/// Offset just past the last whole line of `f`.
fn resume_point(f: &dyn File, linemax: usize) -> Result<u64> {
    let fsize = f.len()?;
    if fsize == 0 {
        return Ok(0);
    }

    let n = fsize.min(linemax as u64) as usize;
    let from = fsize - n as u64;
    let mut b = vec![0u8; n];
    f.read_at(&mut b, from)?;
    if b[n - 1] == b'\n' {
        return Ok(fsize);
    }

    match b.iter().rposition(|&c| c == b'\n') {
        Some(eol) => {
            let pos = from + eol as u64 + 1;
            info!(fsize, pos, torn = fsize - pos, "Log tail is torn, resuming after last line");
            Ok(pos)
        }
        // the whole file is a single torn line
        None if from == 0 => {
            info!(fsize, "Log holds only a torn line, resuming at 0");
            Ok(0)
        }
        None => Err(Error::LineTooLong { len: n, max: linemax }),
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Append-only line log replicated across files
pub struct Logger {
    files: Vec<Replica>,
    pos: Mutex<u64>,
    allowfails: usize,
    linemax: usize,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("replicas", &self.files.len())
            .field("pos", &*self.pos.lock())
            .field("allowfails", &self.allowfails)
            .field("linemax", &self.linemax)
            .finish()
    }
}

impl Logger {
    /// Log over already-open replicas, resuming after the last whole line.
    ///
    /// Replicas whose tail cannot be checked (and holes) count against
    /// `allowfails`.
    pub fn open(files: Vec<Replica>, linemax: usize, allowfails: usize) -> Result<Self> {
        let linemax = linemax.max(MIN_LINE_MAX);
        let mut counter = FailCounter::new("log_open", allowfails);
        let mut pos = 0u64;
        for (i, f) in files.iter().enumerate() {
            if let Some(f) = f {
                match resume_point(f.as_ref(), linemax) {
                    Ok(p) => {
                        pos = pos.max(p);
                        continue;
                    }
                    Err(e) => warn!(replica = i, error = %e, "Logger open: replica check failed"),
                }
            }
            counter.fail()?;
        }
        debug!(pos, replicas = files.len(), linemax, "Logger opened");
        Ok(Logger {
            files,
            pos: Mutex::new(pos),
            allowfails,
            linemax,
        })
    }

    /// Open (or create) the replica files named by `config`.
    pub fn open_files(config: &ReplicaConfig, linemax: usize) -> Result<Self> {
        let files = replica::open(config)?;
        Self::open(files, linemax, config.allowfails)
    }

    /// Bytes of whole lines in the log
    pub fn size(&self) -> u64 {
        *self.pos.lock()
    }

    /// Longest line accepted, `\n` included
    pub fn line_max(&self) -> usize {
        self.linemax
    }

    /// Replica failures tolerated per append
    pub fn allow_fails(&self) -> usize {
        self.allowfails
    }

    /// Append one line holding `msg`, which must not contain `\n`.
    pub fn log(&self, msg: &[u8]) -> Result<()> {
        if msg.contains(&b'\n') {
            warn!(len = msg.len(), "Logger log: message contains a newline");
            return Err(Error::InvalidArgs("log message contains a newline".into()));
        }
        let line = encode_line(msg);
        if line.len() > self.linemax {
            warn!(len = line.len(), linemax = self.linemax, "Logger log: line too long");
            return Err(Error::LineTooLong {
                len: line.len(),
                max: self.linemax,
            });
        }

        let mut pos = self.pos.lock();
        let mut counter = FailCounter::new("log", self.allowfails);
        for (i, f) in self.files.iter().enumerate() {
            if let Some(f) = f {
                match f.write_at(&line, *pos) {
                    Ok(()) => continue,
                    Err(e) => warn!(replica = i, pos = *pos, error = %e, "Logger replica write failed"),
                }
            }
            if let Err(e) = counter.fail() {
                error!(pos = *pos, fails = counter.fails(), "Logger append gave up");
                return Err(e);
            }
        }
        *pos += line.len() as u64;
        Ok(())
    }

    /// Append `value` as one line of compact JSON.
    pub fn log_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let msg = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidArgs(format!("cannot encode log record as json: {}", e)))?;
        self.log(&msg)
    }

    /// Reader over the lines from offset `from` to the current end.
    ///
    /// `from` must be a line boundary, such as a value of
    /// [`LogReader::tell`] or [`Logger::size`].
    pub fn reader(&self, from: u64) -> Result<LogReader> {
        let end = self.size();
        let Some(first) = self.files.iter().position(Option::is_some) else {
            return Err(Error::TooManyFails {
                op: "log_reader",
                fails: self.files.len(),
                allowfails: self.allowfails,
            });
        };
        Ok(LogReader {
            files: self.files[first..].to_vec(),
            off: from,
            end,
            linemax: self.linemax,
            buf: Vec::new(),
            buf_off: 0,
        })
    }

    /// Copy whole, valid lines starting at `from` into `buf`.
    ///
    /// Lines are taken from the first replica until one fails its checksum;
    /// the rest is taken from the next replica at that offset, and so on.
    /// Returns the number of bytes copied, always a run of whole lines.
    /// `EndOfData` if nothing could be copied and no replica failed.
    pub fn read_from(&self, buf: &mut [u8], from: u64) -> Result<usize> {
        let end = self.size();
        let mut from = from;
        let mut n = 0;
        let mut last_err = Error::EndOfData;

        for (i, f) in self.files.iter().enumerate() {
            let Some(f) = f else { continue };
            let want = end.saturating_sub(from).min((buf.len() - n) as u64) as usize;
            if want == 0 {
                break;
            }
            let dst = &mut buf[n..n + want];
            if let Err(e) = f.read_at(dst, from) {
                warn!(replica = i, from, error = %e, "Logger read_from: replica read failed");
                last_err = e.into();
                continue;
            }
            let (ok, res) = check_lines(dst);
            n += ok;
            from += ok as u64;
            match res {
                Ok(()) => break,
                Err(e) => {
                    debug!(replica = i, from, error = %e, "Logger read_from: bad line, trying later replicas");
                    last_err = e;
                }
            }
        }

        if n == 0 {
            return Err(last_err);
        }
        Ok(n)
    }
}

impl Underlayer for Logger {
    fn underlayer(&self) -> &[Replica] {
        &self.files
    }

    fn underlayer_mut(&mut self) -> &mut [Replica] {
        &mut self.files
    }
}

// ============================================================================
// LogReader
// ============================================================================

/// Sequential reader over a snapshot of a [`Logger`]'s extent
///
/// Lines appended after the reader was created are not seen.
pub struct LogReader {
    // primary first, then the replicas used for repair
    files: Vec<Replica>,
    off: u64,
    end: u64,
    linemax: usize,
    buf: Vec<u8>,
    buf_off: u64,
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("off", &self.off)
            .field("end", &self.end)
            .finish()
    }
}

impl LogReader {
    /// Offset of the next line
    pub fn tell(&self) -> u64 {
        self.off
    }

    /// Next message, or `None` at the end of the log.
    ///
    /// A line that is corrupt on the primary replica is read from the later
    /// ones; `BadData` if none holds a valid copy.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        if self.off >= self.end {
            return Ok(None);
        }
        let off = self.off;
        match self.primary_line() {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                debug!(off, error = %e, "LogReader: bad line on primary, trying later replicas");
                self.repair_line(off).map(Some)
            }
        }
    }

    /// Next line decoded as JSON, or `None` at the end of the log.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let Some(msg) = self.next_line()? else {
            return Ok(None);
        };
        serde_json::from_slice(&msg)
            .map(Some)
            .map_err(|e| Error::BadData(format!("log line is not valid json: {}", e)))
    }

    /// Bounds of the buffered line at `off`, `\n` included.
    fn buffered_line(&self) -> Option<(usize, usize)> {
        let start = usize::try_from(self.off.checked_sub(self.buf_off)?).ok()?;
        let pending = self.buf.get(start..)?;
        let eol = pending.iter().position(|&c| c == b'\n')?;
        Some((start, start + eol + 1))
    }

    fn fill(&mut self) -> Result<()> {
        let Some(f) = self.files.first().and_then(Option::as_ref) else {
            return Err(Error::BadData("log reader has no primary replica".into()));
        };
        // a primary that missed the last appends still serves what it has
        let avail = f.len()?.min(self.end).saturating_sub(self.off);
        let n = avail.min(READ_CHUNK.max(self.linemax) as u64) as usize;
        let mut buf = vec![0u8; n];
        f.read_at(&mut buf, self.off)?;
        self.buf = buf;
        self.buf_off = self.off;
        Ok(())
    }

    fn primary_line(&mut self) -> Result<Vec<u8>> {
        if self.buffered_line().is_none() {
            self.fill()?;
        }
        let Some((start, end)) = self.buffered_line() else {
            let len = self.buf.len();
            if len >= self.linemax {
                return Err(Error::LineTooLong { len, max: self.linemax });
            }
            return Err(Error::BadData(format!("torn log line at offset {}", self.off)));
        };
        if end - start > self.linemax {
            return Err(Error::LineTooLong {
                len: end - start,
                max: self.linemax,
            });
        }
        let msg = check_line(&self.buf[start..end - 1])?.to_vec();
        self.off += (end - start) as u64;
        Ok(msg)
    }

    fn repair_line(&mut self, off: u64) -> Result<Vec<u8>> {
        for (i, f) in self.files.iter().enumerate().skip(1) {
            let Some(f) = f else { continue };
            match read_line_at(f.as_ref(), off, self.end, self.linemax) {
                Ok((msg, len)) => {
                    self.off = off + len as u64;
                    return Ok(msg);
                }
                Err(e) => warn!(replica = i, off, error = %e, "LogReader: repair read failed"),
            }
        }
        error!(off, "LogReader: line unrecoverable on every replica");
        Err(Error::BadData(format!("no valid copy of the log line at offset {}", off)))
    }
}

impl Iterator for LogReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
