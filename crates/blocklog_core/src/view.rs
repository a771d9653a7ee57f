//! Read-only view over a single block log file.

use crate::error::{CoreError, CoreResult};
use crate::genesis::GenesisState;
use crate::index::IndexWriter;
use crate::preamble::Preamble;
use crate::record::{BlockHeader, StoredRecord};
use crate::types::{BlockId, BlockNum, ChainId};
use blocklog_storage::{FileBackend, StorageBackend};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Read buffer size for sequential entry decoding.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size for bulk copies between files.
pub(crate) const COPY_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Size of the self-position trailer of every entry.
pub(crate) const POSITION_SIZE: u64 = 8;

/// Size of the trailing block count of a pruned log.
pub(crate) const TRAILER_SIZE: u64 = 4;

struct BackendRead<'a> {
    backend: &'a dyn StorageBackend,
    pos: u64,
    end: u64,
}

impl Read for BackendRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.end.saturating_sub(self.pos)) as usize;
        if n == 0 {
            return Ok(0);
        }
        let data = self
            .backend
            .read_at(self.pos, n)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        buf[..n].copy_from_slice(&data);
        self.pos += n as u64;
        Ok(n)
    }
}

/// Buffered sequential reader over a byte range of a backend.
pub struct EntryReader<'a> {
    inner: BufReader<BackendRead<'a>>,
}

impl<'a> EntryReader<'a> {
    /// Creates a reader over `[pos, end)`.
    #[must_use]
    pub fn new(backend: &'a dyn StorageBackend, pos: u64, end: u64) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, BackendRead { backend, pos, end }),
        }
    }

    /// Offset of the next byte this reader returns.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.get_ref().pos - self.inner.buffer().len() as u64
    }

    /// Bytes left before the end of the range.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.inner.get_ref().end.saturating_sub(self.position())
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Appends `len` bytes of `src` starting at `start` to `dest`.
pub(crate) fn copy_range(
    src: &dyn StorageBackend,
    start: u64,
    len: u64,
    dest: &mut dyn StorageBackend,
) -> CoreResult<()> {
    let end = start + len.min(src.size()?.saturating_sub(start));
    let mut pos = start;
    while pos < end {
        let n = (end - pos).min(COPY_CHUNK_SIZE);
        let chunk = src.read_at(pos, n as usize)?;
        dest.append(&chunk)?;
        pos += n;
    }
    Ok(())
}

pub(crate) fn read_u64_at(backend: &dyn StorageBackend, pos: u64) -> CoreResult<u64> {
    let bytes = backend.read_at(pos, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_u32_at(backend: &dyn StorageBackend, pos: u64) -> CoreResult<u32> {
    let bytes = backend.read_at(pos, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes);
    Ok(u32::from_le_bytes(buf))
}

/// Block number of the entry at `pos`, read from the `previous` id in its header.
pub(crate) fn block_num_at(backend: &dyn StorageBackend, pos: u64) -> CoreResult<BlockNum> {
    let bytes = backend.read_at(pos + BlockHeader::PREVIOUS_OFFSET, 4)?;
    let prev = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok(prev.wrapping_add(1))
}

/// Walks the self-position trailers of a log from the end towards the front.
///
/// Each step reads the 8 bytes just before the current position, which is
/// the start offset of the entry ending there, and moves to it.
#[derive(Debug)]
pub(crate) struct ReversePositionIterator {
    first_block_pos: u64,
    end_of_block_pos: u64,
    current: u64,
}

impl ReversePositionIterator {
    pub(crate) fn new(first_block_pos: u64, end_of_block_pos: u64) -> Self {
        Self {
            first_block_pos,
            end_of_block_pos,
            current: end_of_block_pos,
        }
    }

    fn check_current(&self) -> CoreResult<()> {
        if self.current <= self.first_block_pos
            || self.current > self.end_of_block_pos
            || self.current < POSITION_SIZE
        {
            return Err(CoreError::invalid_format(format!(
                "block log file formatting is incorrect, it contains a block position value: {}, which is not in the range of ({},{})",
                self.current, self.first_block_pos, self.end_of_block_pos
            )));
        }
        Ok(())
    }

    /// Moves to the entry ending at the current position and returns its start.
    pub(crate) fn get_value_then_advance(&mut self, backend: &dyn StorageBackend) -> CoreResult<u64> {
        self.check_current()?;
        self.current = read_u64_at(backend, self.current - POSITION_SIZE)?;
        Ok(self.current)
    }

    /// Like [`Self::get_value_then_advance`], but shifts the stored position by `offset` first.
    pub(crate) fn add_value_then_advance(
        &mut self,
        backend: &mut dyn StorageBackend,
        offset: i64,
    ) -> CoreResult<u64> {
        self.check_current()?;
        let slot = self.current - POSITION_SIZE;
        let value = read_u64_at(backend, slot)?;
        let shifted = value.checked_add_signed(offset).ok_or_else(|| {
            CoreError::corruption(format!("block position {value} cannot be shifted by {offset}"))
        })?;
        backend.write_at(slot, &shifted.to_le_bytes())?;
        self.current = shifted;
        Ok(shifted)
    }

    pub(crate) fn done(&self) -> bool {
        self.current <= self.first_block_pos
    }
}

/// Rewrites every trailer after `first_block_pos` in `block_file` by `offset`,
/// emitting the new positions to `index` from the last entry backwards.
pub(crate) fn adjust_block_positions(
    index: &mut IndexWriter,
    block_file: &mut dyn StorageBackend,
    first_block_pos: u64,
    offset: i64,
) -> CoreResult<()> {
    let end = block_file.size()?;
    let mut iter = ReversePositionIterator::new(first_block_pos, end);
    while !iter.done() {
        let pos = iter.add_value_then_advance(block_file, offset)?;
        index.write(pos)?;
    }
    Ok(())
}

/// Result of a sequential validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Offset just past the last entry that validated.
    pub position: u64,
    /// Number of the last block that validated.
    pub block_num: BlockNum,
    /// Why the scan stopped early, if it did.
    pub error: Option<String>,
}

/// Read-only view of a block log file.
pub struct LogView {
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    preamble: Preamble,
    first_block_pos: u64,
    size: u64,
}

impl std::fmt::Debug for LogView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogView")
            .field("path", &self.path)
            .field("preamble", &self.preamble)
            .field("first_block_pos", &self.first_block_pos)
            .field("size", &self.size)
            .finish()
    }
}

impl LogView {
    /// Opens the log at `path` read-only and parses its preamble.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its preamble is invalid.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        Self::from_backend(path, Box::new(backend))
    }

    /// Wraps an already opened backend. `path` is only used in messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the preamble is invalid.
    pub fn from_backend(path: &Path, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let size = backend.size()?;
        let mut reader = EntryReader::new(&*backend, 0, size);
        let preamble = Preamble::read_from(&mut reader)?;
        let first_block_pos = reader.position();
        Ok(Self {
            path: path.to_path_buf(),
            backend,
            preamble,
            first_block_pos,
            size,
        })
    }

    /// Path of the viewed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed preamble.
    #[must_use]
    pub fn preamble(&self) -> &Preamble {
        &self.preamble
    }

    /// Format version without the pruned flag.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.preamble.version()
    }

    /// First block number recorded in the preamble.
    #[must_use]
    pub fn first_block_num(&self) -> BlockNum {
        self.preamble.first_block_num
    }

    /// Chain id of the log.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.preamble.chain_id()
    }

    /// Genesis state, if the preamble carries one.
    #[must_use]
    pub fn genesis_state(&self) -> Option<GenesisState> {
        self.preamble.chain_context.genesis().copied()
    }

    /// Whether the log is in pruned representation.
    #[must_use]
    pub fn is_currently_pruned(&self) -> bool {
        self.preamble.is_currently_pruned()
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset where block data begins.
    #[must_use]
    pub fn first_block_position(&self) -> u64 {
        self.first_block_pos
    }

    /// Offset where block data ends (before a pruned log's trailing count).
    #[must_use]
    pub fn end_of_block_position(&self) -> u64 {
        if self.is_currently_pruned() {
            self.size.saturating_sub(TRAILER_SIZE)
        } else {
            self.size
        }
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_of_block_position() <= self.first_block_pos
    }

    /// Start offset of the last entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is empty or the trailer cannot be read.
    pub fn last_block_position(&self) -> CoreResult<u64> {
        if self.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "{} contains no blocks",
                self.path.display()
            )));
        }
        read_u64_at(&*self.backend, self.end_of_block_position() - POSITION_SIZE)
    }

    /// Number of the last block in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is empty or unreadable.
    pub fn last_block_num(&self) -> CoreResult<BlockNum> {
        self.block_num_at(self.last_block_position()?)
    }

    /// Number of blocks between the preamble's first block and the last entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the last entry cannot be read.
    pub fn number_of_blocks(&self) -> CoreResult<u32> {
        if self.is_empty() {
            return Ok(0);
        }
        let last = self.last_block_num()?;
        if last < self.first_block_num() {
            return Err(CoreError::invalid_format(format!(
                "{} ends with block {last} which precedes its first block {}",
                self.path.display(),
                self.first_block_num()
            )));
        }
        Ok(last - self.first_block_num() + 1)
    }

    /// Block number of the entry starting at `pos`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pos` is outside the file.
    pub fn block_num_at(&self, pos: u64) -> CoreResult<BlockNum> {
        if pos > self.size {
            return Err(CoreError::invalid_operation(format!("invalid block position {pos}")));
        }
        block_num_at(&*self.backend, pos)
    }

    /// Checks the block number of the entry at `pos` without decoding it.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the entry holds a different block.
    pub fn light_validate_block_entry_at(&self, pos: u64, expected: BlockNum) -> CoreResult<()> {
        let actual = self.block_num_at(pos)?;
        if actual != expected {
            return Err(CoreError::corruption(format!(
                "at position {pos} expected to find block number {expected} but found {actual}"
            )));
        }
        Ok(())
    }

    /// Sequential reader starting at `pos`.
    #[must_use]
    pub fn reader_at(&self, pos: u64) -> EntryReader<'_> {
        EntryReader::new(&*self.backend, pos, self.end_of_block_position())
    }

    /// The underlying byte store.
    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        &*self.backend
    }

    /// Decodes the record at `pos`, checking it is block `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or a different block is found.
    pub fn read_block_at<R: StoredRecord>(&self, pos: u64, expected: BlockNum) -> CoreResult<R> {
        let record = R::decode(&mut self.reader_at(pos))?;
        if record.block_num() != expected {
            return Err(CoreError::corruption(format!(
                "wrong block was read from {}: expected {expected}, found {}",
                self.path.display(),
                record.block_num()
            )));
        }
        Ok(record)
    }

    /// Decodes the header of the record at `pos`, checking it is block `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or a different block is found.
    pub fn read_header_at<R: StoredRecord>(
        &self,
        pos: u64,
        expected: BlockNum,
    ) -> CoreResult<BlockHeader> {
        let header = R::decode_header(&mut self.reader_at(pos))?;
        if header.block_num() != expected {
            return Err(CoreError::corruption(format!(
                "wrong block header was read from {}: expected {expected}, found {}",
                self.path.display(),
                header.block_num()
            )));
        }
        Ok(header)
    }

    /// Fully decodes the entry under `reader` and checks its trailer.
    ///
    /// A block number gap or a broken link to `previous_id` is logged and
    /// tolerated; a decode failure yields `UndecodableEntry` and a trailer
    /// that does not point back at the entry yields `Corruption`.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn full_validate_block_entry<R: StoredRecord>(
        &self,
        reader: &mut EntryReader<'_>,
        previous_block_num: BlockNum,
        previous_id: &BlockId,
    ) -> CoreResult<(BlockNum, BlockId)> {
        let pos = reader.position();
        let entry = R::decode(reader).map_err(|e| CoreError::UndecodableEntry {
            position: pos,
            message: e.to_string(),
        })?;

        let id = entry.id();
        let block_num = id.block_num();

        if block_num != previous_block_num.wrapping_add(1) {
            error!(
                block_num,
                %id,
                previous_block_num,
                %previous_id,
                "block skips blocks"
            );
        }

        let header = entry.header();
        if !previous_id.is_empty() && *previous_id != header.previous {
            error!(
                block_num,
                %id,
                expected = %previous_id,
                actual = %header.previous,
                "block does not link back to previous block"
            );
        }

        let mut stored = u64::MAX;
        if reader.remaining() >= POSITION_SIZE {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            stored = u64::from_le_bytes(buf);
        }
        if stored != pos {
            return Err(CoreError::corruption(format!(
                "the block position for block {block_num} at the end of a block entry is incorrect"
            )));
        }

        Ok((block_num, id))
    }

    /// Validates entries from the first block up to `last_block_num`.
    ///
    /// Undecodable trailing bytes are copied to
    /// `<blocks_dir>/<prefix>-bad-tail-<timestamp>.log` before the scan stops.
    /// The scan never fails; the report says how far it got and why it stopped.
    pub fn full_validate_blocks<R: StoredRecord>(
        &self,
        last_block_num: BlockNum,
        blocks_dir: &Path,
        timestamp: &str,
    ) -> ValidationReport {
        let mut report = ValidationReport {
            position: self.first_block_pos,
            block_num: self.first_block_num().wrapping_sub(1),
            error: None,
        };

        if self.is_currently_pruned() {
            report.error = Some("pruned block log cannot be repaired".to_string());
            return report;
        }

        let mut reader = self.reader_at(self.first_block_pos);
        let mut block_id = BlockId::default();
        while reader.remaining() > 0 && report.block_num < last_block_num {
            match self.full_validate_block_entry::<R>(&mut reader, report.block_num, &block_id) {
                Ok((num, id)) => {
                    report.block_num = num;
                    block_id = id;
                    if num % 1000 == 0 {
                        info!(block_num = num, "verified block");
                    }
                    report.position = reader.position();
                }
                Err(e) => {
                    if let CoreError::UndecodableEntry { position, .. } = &e {
                        if let Err(tail_err) = self.write_incomplete_block_data(
                            R::KIND.prefix(),
                            blocks_dir,
                            timestamp,
                            report.block_num,
                            *position,
                        ) {
                            error!(error = %tail_err, "failed to save the bad tail of the block log");
                        }
                    }
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }
        report
    }

    fn write_incomplete_block_data(
        &self,
        prefix: &str,
        blocks_dir: &Path,
        timestamp: &str,
        block_num: BlockNum,
        pos: u64,
    ) -> CoreResult<PathBuf> {
        let tail_path = blocks_dir.join(format!("{prefix}-bad-tail-{timestamp}.log"));
        let mut tail = FileBackend::create_truncated(&tail_path)?;
        copy_range(&*self.backend, pos, self.size - pos, &mut tail)?;
        tail.flush()?;
        info!(
            block_num = block_num.wrapping_add(1),
            path = %tail_path.display(),
            "data at tail end of block log which should contain the (incomplete) serialization of the block has been written out"
        );
        Ok(tail_path)
    }

    /// Writes a fresh index for this log to `index_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailers are inconsistent or a write fails.
    pub fn construct_index(&self, index_path: &Path) -> CoreResult<()> {
        info!(path = %index_path.display(), "will write new index file");

        let num_blocks = self.number_of_blocks()?;
        info!(version = self.version(), num_blocks, "block log");

        let mut index = IndexWriter::create(index_path, num_blocks)?;
        if num_blocks == 0 {
            return index.finish();
        }
        info!(first = self.first_block_num(), last = self.last_block_num()?, "indexing block range");

        let mut iter = ReversePositionIterator::new(self.first_block_pos, self.end_of_block_position());
        let mut remaining = num_blocks;
        while !iter.done() && remaining > 0 {
            let pos = iter.get_value_then_advance(&*self.backend)?;
            index.write(pos)?;
            if remaining & 0xfffff == 0 {
                info!(blocks_left = remaining, pos, "blocks remaining to index");
            }
            remaining -= 1;
        }
        index.finish()
    }
}
