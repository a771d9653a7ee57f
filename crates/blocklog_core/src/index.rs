//! Block index files.
//!
//! An index is a flat array of little-endian `u64` file offsets, one per
//! block, starting at the log's first block number.

use crate::error::{CoreError, CoreResult};
use crate::view::{copy_range, read_u64_at};
use blocklog_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};

/// Size of one index entry.
pub const INDEX_ENTRY_SIZE: u64 = 8;

/// Read-only view of an index file.
pub struct LogIndex {
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    num_blocks: u32,
}

impl std::fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIndex")
            .field("path", &self.path)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}

impl LogIndex {
    /// Opens the index at `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the size is not a multiple of the entry size.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        Self::from_backend(path, Box::new(backend))
    }

    /// Wraps an already opened backend. `path` is only used in messages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the size is not a multiple of the entry size.
    pub fn from_backend(path: &Path, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        if size % INDEX_ENTRY_SIZE != 0 {
            return Err(CoreError::invalid_format(format!(
                "{} file is invalid, please reconstruct the index",
                path.display()
            )));
        }
        let num_blocks = u32::try_from(size / INDEX_ENTRY_SIZE).map_err(|_| {
            CoreError::invalid_format(format!("{} holds too many entries", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            backend,
            num_blocks,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_blocks == 0
    }

    /// Position of the `n`-th block (0-based).
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is out of range.
    pub fn nth_block_position(&self, n: u32) -> CoreResult<u64> {
        if n >= self.num_blocks {
            return Err(CoreError::invalid_operation(format!(
                "index entry {n} is out of range, {} has {} entries",
                self.path.display(),
                self.num_blocks
            )));
        }
        read_u64_at(&*self.backend, u64::from(n) * INDEX_ENTRY_SIZE)
    }

    /// Position of the last block.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is empty.
    pub fn back(&self) -> CoreResult<u64> {
        let last = self
            .num_blocks
            .checked_sub(1)
            .ok_or_else(|| CoreError::invalid_operation("index is empty"))?;
        self.nth_block_position(last)
    }

    /// Appends the first `nbytes` of the index to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or write fails.
    pub fn copy_to(&self, dest: &mut dyn StorageBackend, nbytes: u64) -> CoreResult<()> {
        copy_range(&*self.backend, 0, nbytes, dest)
    }
}

/// Writes index entries from the last slot backwards.
///
/// Entries are produced while walking a log from its end, so each write
/// lands one slot before the previous one. Only the slot being written can
/// ever be left half-written.
pub struct IndexWriter {
    backend: Box<dyn StorageBackend>,
    next_slot: Option<u64>,
}

impl IndexWriter {
    /// Creates (truncating) an index at `path` that will hold `blocks_expected` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path, blocks_expected: u32) -> CoreResult<Self> {
        let backend = FileBackend::create_truncated(path)?;
        Ok(Self::from_backend(Box::new(backend), blocks_expected))
    }

    /// Opens an existing index at `path`, keeping its content, so entries can
    /// be added up to `blocks_expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_existing(path: &Path, blocks_expected: u32) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Ok(Self::from_backend(Box::new(backend), blocks_expected))
    }

    /// Wraps a backend.
    #[must_use]
    pub fn from_backend(backend: Box<dyn StorageBackend>, blocks_expected: u32) -> Self {
        Self {
            backend,
            next_slot: u64::from(blocks_expected).checked_sub(1),
        }
    }

    /// Writes `pos` into the current slot and steps one slot back.
    ///
    /// # Errors
    ///
    /// Returns an error if every slot has been written or the write fails.
    pub fn write(&mut self, pos: u64) -> CoreResult<()> {
        let slot = self
            .next_slot
            .ok_or_else(|| CoreError::invalid_operation("index writer has no slots left"))?;
        self.backend.write_at(slot * INDEX_ENTRY_SIZE, &pos.to_le_bytes())?;
        self.next_slot = slot.checked_sub(1);
        Ok(())
    }

    /// Flushes the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}
