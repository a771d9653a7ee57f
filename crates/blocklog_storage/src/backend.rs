//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for the block log.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, overwriting and flushing data. The block log owns
/// all file format interpretation - backends do not understand preambles,
/// log entries or index slots.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` past the current end zero-fills the gap
/// - `flush` ensures all written data reaches the OS
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Writes `data` at `offset`, overwriting existing bytes.
    ///
    /// Writing past the current end grows the storage; any gap between the
    /// old end and `offset` reads back as zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// This removes all data after the specified offset.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Deallocates the byte range `[start, end)` without changing the size.
    ///
    /// After a successful punch the range reads back as zeros. Returns
    /// `Ok(false)` when the backend (or the filesystem under it) has no
    /// sparse-file support; the bytes are then left untouched, which is
    /// always correct because callers only punch ranges they no longer read.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is malformed or an I/O error other
    /// than "unsupported" occurs.
    fn punch_hole(&mut self, start: u64, end: u64) -> StorageResult<bool> {
        let _ = (start, end);
        Ok(false)
    }
}
