//! Crash simulation for block logs.
//!
//! Damages log files the way an interrupted write or a bad disk would, and
//! wraps a storage backend so writes fail part way through.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blocklog_testkit::crash::{append_garbage, CrashableBackend};
//!
//! append_garbage(&log_path, &[0xFF; 9]);
//! let backend = CrashableBackend::new(InMemoryBackend::new());
//! backend.crash_after(10);
//! ```

use blocklog_storage::{StorageBackend, StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Appends `bytes` to the file at `path`, as a torn or foreign write would.
pub fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open file for appending");
    file.write_all(bytes).expect("Failed to append garbage");
    file.sync_all().expect("Failed to sync file");
}

/// Cuts the last `len` bytes off the file at `path`.
pub fn truncate_tail(path: &Path, len: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file for truncation");
    let size = file.metadata().expect("Failed to stat file").len();
    file.set_len(size.saturating_sub(len))
        .expect("Failed to truncate file");
}

/// Inverts the byte at `offset` in the file at `path`.
pub fn corrupt_byte(path: &Path, offset: u64) {
    let mut data = fs::read(path).expect("Failed to read file");
    let index = usize::try_from(offset).expect("Offset does not fit in memory");
    data[index] = !data[index];
    fs::write(path, data).expect("Failed to write file");
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once the configured number of bytes has been written, the write that
/// crosses the limit is cut short and every later write fails.
pub struct CrashableBackend<B: StorageBackend> {
    inner: B,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl<B: StorageBackend> CrashableBackend<B> {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Unwraps the inner backend, keeping whatever reached it.
    pub fn into_inner(self) -> B {
        self.inner
    }

    /// How many bytes of a `len` byte write may still go through.
    fn allowance(&self, len: usize) -> StorageResult<usize> {
        let current = self.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);
        if current >= threshold {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during write"));
        }
        Ok(len.min(threshold - current))
    }
}

impl<B: StorageBackend> StorageBackend for CrashableBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self.allowance(data.len())?;
        if allowed < data.len() {
            self.crashed.store(true, Ordering::SeqCst);
            if allowed > 0 {
                let _ = self.inner.append(&data[..allowed]);
            }
            return Err(simulated("simulated crash during partial write"));
        }
        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let allowed = self.allowance(data.len())?;
        if allowed < data.len() {
            self.crashed.store(true, Ordering::SeqCst);
            if allowed > 0 {
                let _ = self.inner.write_at(offset, &data[..allowed]);
            }
            return Err(simulated("simulated crash during partial write"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.fail_on_flush.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn punch_hole(&mut self, start: u64, end: u64) -> StorageResult<bool> {
        self.inner.punch_hole(start, end)
    }
}
