//! Single-file block log: one log file plus its index.
//!
//! The other strategies wrap this type and add their own policy around
//! appends (rotation, pruning) and reads (archives).

use crate::error::{CoreError, CoreResult};
use crate::genesis::{ChainContext, GenesisState};
use crate::index::{LogIndex, INDEX_ENTRY_SIZE};
use crate::preamble::{Preamble, MAX_SUPPORTED_VERSION, PRUNED_VERSION_FLAG};
use crate::record::{BlockHeader, StoredRecord};
use crate::types::{BlockId, BlockNum, ChainId};
use crate::view::{
    read_u32_at, read_u64_at, EntryReader, LogView, COPY_CHUNK_SIZE, POSITION_SIZE, TRAILER_SIZE,
};
use blocklog_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The most recently appended record and its id.
#[derive(Debug)]
pub(crate) struct Head<R> {
    pub(crate) record: Arc<R>,
    pub(crate) id: BlockId,
}

impl<R> Clone for Head<R> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            id: self.id,
        }
    }
}

impl<R> Head<R> {
    pub(crate) fn block_num(&self) -> BlockNum {
        self.id.block_num()
    }
}

pub(crate) struct BasicLog<R: StoredRecord> {
    dir: PathBuf,
    log_path: PathBuf,
    index_path: PathBuf,
    pub(crate) block_file: FileBackend,
    pub(crate) index_file: FileBackend,
    pub(crate) preamble: Preamble,
    data_start: u64,
    genesis_written: bool,
    pub(crate) head: Option<Head<R>>,
    initial_version: u32,
}

impl<R: StoredRecord> BasicLog<R> {
    /// Opens (creating if needed) the log and index in `dir` and reconciles them.
    ///
    /// | log \ index | exists          | empty         |
    /// |-------------|-----------------|---------------|
    /// | exists      | check last entry| rebuild index |
    /// | empty       | discard index   | nothing       |
    pub(crate) fn open(dir: &Path, initial_version: u32) -> CoreResult<Self> {
        if !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }

        let log_path = dir.join(R::KIND.log_file_name());
        let index_path = dir.join(R::KIND.index_file_name());
        let block_file = FileBackend::open(&log_path)?;
        let index_file = FileBackend::open(&index_path)?;
        let log_size = block_file.size()?;
        let index_size = index_file.size()?;
        info!(log = R::KIND.prefix(), size = log_size, "opening block log");

        let mut log = Self {
            dir: dir.to_path_buf(),
            log_path,
            index_path,
            block_file,
            index_file,
            preamble: Preamble::new(0, 0, ChainContext::ChainId(ChainId::default())),
            data_start: 0,
            genesis_written: false,
            head: None,
            initial_version,
        };

        if log_size > 0 {
            let view = LogView::open(&log.log_path)?;
            log.preamble = view.preamble().clone();
            // the genesis state is not needed past this point
            log.preamble.chain_context = ChainContext::ChainId(log.preamble.chain_id());
            log.data_start = view.first_block_position();
            log.genesis_written = true;

            let num_blocks = view.number_of_blocks()?;
            info!(num_blocks, "log has blocks");

            if index_size % INDEX_ENTRY_SIZE != 0 {
                return Err(CoreError::invalid_format(format!(
                    "{} file is invalid, please reconstruct the index",
                    log.index_path.display()
                )));
            }

            if num_blocks == 0 {
                if index_size > 0 {
                    info!("log file has no blocks while the index file is nonempty, discard the index file");
                    log.index_file.truncate(0)?;
                }
            } else if index_size == 0 {
                warn!(
                    index = %log.index_path.display(),
                    "index file is empty, reconstructing it from the log"
                );
                view.construct_index(&log.index_path)?;
                log.index_file = FileBackend::open(&log.index_path)?;
            } else {
                let index = LogIndex::open(&log.index_path)?;
                let last_block_pos = view.last_block_position()?;
                let last_index_pos = index.back()?;
                if last_block_pos != last_index_pos {
                    return Err(CoreError::corruption(format!(
                        "the last block position from {} is at {last_block_pos} which does not match the last block position {last_index_pos} from {}, please repair the log",
                        log.log_path.display(),
                        log.index_path.display()
                    )));
                }
            }

            log.head = log.read_head()?;
        } else if index_size > 0 {
            info!("log file is empty while the index file is nonempty, discard the index file");
            log.index_file.truncate(0)?;
        }

        Ok(log)
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub(crate) fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.genesis_written
    }

    pub(crate) fn version(&self) -> u32 {
        self.preamble.version()
    }

    pub(crate) fn first_block_num(&self) -> BlockNum {
        self.preamble.first_block_num
    }

    /// Brings a log left in pruned representation back to a regular one.
    pub(crate) fn convert_from_pruned(&mut self) -> CoreResult<()> {
        if !self.preamble.is_currently_pruned() {
            return Ok(());
        }
        info!(log = %self.log_path.display(), "converting pruned block log to a regular block log");
        let first = if self.head.is_some() {
            self.first_block_num_from_pruned_log()?
        } else {
            self.preamble.first_block_num
        };
        self.vacuum(first, self.preamble.first_block_num)
    }

    /// Appends one entry and its index slot, returning the entry's position.
    ///
    /// The log itself is not flushed; callers finish their own policy first.
    pub(crate) fn append_entry(
        &mut self,
        record: Arc<R>,
        id: BlockId,
        bytes: &[u8],
    ) -> CoreResult<u64> {
        if !self.genesis_written {
            return Err(CoreError::append_failed(format!(
                "cannot append to {} log until the genesis is first written",
                R::KIND.prefix()
            )));
        }

        let mut pos = self.block_file.size()?;
        if self.preamble.is_currently_pruned() {
            pos = pos.checked_sub(TRAILER_SIZE).ok_or_else(|| {
                CoreError::append_failed("pruned block log is missing its block count trailer")
            })?;
        }

        let block_num = record.block_num();
        let index_pos = self.index_file.size()?;
        let expected = block_num
            .checked_sub(self.preamble.first_block_num)
            .map(|n| u64::from(n) * INDEX_ENTRY_SIZE);
        if expected != Some(index_pos) {
            return Err(CoreError::append_failed(format!(
                "append of block {block_num} to {}'s index file occurring at wrong position: position {index_pos}, expected {}",
                R::KIND.prefix(),
                expected.map_or_else(|| "none".to_string(), |e| e.to_string())
            )));
        }

        let mut entry = Vec::with_capacity(bytes.len() + POSITION_SIZE as usize);
        entry.extend_from_slice(bytes);
        entry.extend_from_slice(&pos.to_le_bytes());
        self.block_file.write_at(pos, &entry)?;
        self.index_file.append(&pos.to_le_bytes())?;
        self.index_file.flush()?;
        self.head = Some(Head { record, id });
        Ok(pos)
    }

    /// Appends and flushes.
    pub(crate) fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        self.append_entry(record, id, bytes)?;
        self.block_file.flush()?;
        Ok(())
    }

    /// Position of `block_num`, if it lies between `working_first` and the head.
    pub(crate) fn get_block_pos(
        &self,
        block_num: BlockNum,
        working_first: BlockNum,
    ) -> CoreResult<Option<u64>> {
        match &self.head {
            Some(head) if block_num <= head.block_num() && block_num >= working_first => {
                let slot = u64::from(block_num - self.preamble.first_block_num);
                Ok(Some(read_u64_at(&self.index_file, slot * INDEX_ENTRY_SIZE)?))
            }
            _ => Ok(None),
        }
    }

    fn reader_at(&self, pos: u64) -> CoreResult<EntryReader<'_>> {
        Ok(EntryReader::new(&self.block_file, pos, self.block_file.size()?))
    }

    pub(crate) fn read_block_by_num(
        &self,
        block_num: BlockNum,
        working_first: BlockNum,
    ) -> CoreResult<Option<R>> {
        let Some(pos) = self.get_block_pos(block_num, working_first)? else {
            return Ok(None);
        };
        let record = R::decode(&mut self.reader_at(pos)?)?;
        if record.block_num() != block_num {
            return Err(CoreError::corruption(format!(
                "wrong block was read from the log: expected {block_num}, found {}",
                record.block_num()
            )));
        }
        Ok(Some(record))
    }

    pub(crate) fn read_block_header_by_num(
        &self,
        block_num: BlockNum,
        working_first: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        let Some(pos) = self.get_block_pos(block_num, working_first)? else {
            return Ok(None);
        };
        let header = R::decode_header(&mut self.reader_at(pos)?)?;
        if header.block_num() != block_num {
            return Err(CoreError::corruption(format!(
                "wrong block header was read from the log: expected {block_num}, found {}",
                header.block_num()
            )));
        }
        Ok(Some(header))
    }

    /// Position of the last entry, found through the trailer at the end of the file.
    pub(crate) fn read_head_position(&self) -> CoreResult<Option<u64>> {
        let size = self.block_file.size()?;
        if !self.genesis_written || size <= POSITION_SIZE {
            return Ok(None);
        }

        // read_head runs during open, before the strategy has settled the
        // in-memory flag, so the version word on disk decides
        let ver = read_u32_at(&self.block_file, 0)?;
        let end = if ver & PRUNED_VERSION_FLAG != 0 {
            size.saturating_sub(TRAILER_SIZE)
        } else {
            size
        };
        if end <= self.data_start || end < POSITION_SIZE {
            return Ok(None);
        }
        Ok(Some(read_u64_at(&self.block_file, end - POSITION_SIZE)?))
    }

    /// Decodes the last entry on disk.
    pub(crate) fn read_head_record(&self) -> CoreResult<Option<R>> {
        let Some(pos) = self.read_head_position()? else {
            return Ok(None);
        };
        Ok(Some(R::decode(&mut self.reader_at(pos)?)?))
    }

    fn read_head(&self) -> CoreResult<Option<Head<R>>> {
        Ok(self.read_head_record()?.map(|record| Head {
            id: record.id(),
            record: Arc::new(record),
        }))
    }

    /// Truncates both files and writes a fresh preamble.
    pub(crate) fn reset(
        &mut self,
        first_block_num: BlockNum,
        chain_context: ChainContext,
        version: u32,
    ) -> CoreResult<()> {
        let mut preamble = Preamble::new(
            version | (self.preamble.ver & PRUNED_VERSION_FLAG),
            first_block_num,
            chain_context,
        );
        preamble.validate()?;

        let mut block_file = FileBackend::create_truncated(&self.log_path)?;
        self.data_start = preamble.write_to(&mut block_file)?;
        self.block_file = block_file;

        preamble.chain_context = ChainContext::ChainId(preamble.chain_id());
        self.preamble = preamble;
        self.genesis_written = true;

        self.index_file = FileBackend::create_truncated(&self.index_path)?;
        self.index_file.flush()?;
        Ok(())
    }

    /// Resets to a genesis preamble at the configured initial version without appending.
    pub(crate) fn reset_genesis_preamble(&mut self, gs: &GenesisState) -> CoreResult<()> {
        self.reset(1, ChainContext::Genesis(*gs), self.initial_version)
    }

    pub(crate) fn reset_genesis(
        &mut self,
        gs: &GenesisState,
        first_block: Arc<R>,
        bytes: &[u8],
    ) -> CoreResult<()> {
        self.reset_genesis_preamble(gs)?;
        let id = first_block.id();
        self.append(first_block, id, bytes)
    }

    pub(crate) fn reset_chain_id(
        &mut self,
        chain_id: ChainId,
        first_block_num: BlockNum,
    ) -> CoreResult<()> {
        // a log needed for replay must be able to rebuild the chain from block 1
        if first_block_num <= 1 && R::NEEDED_FOR_REPLAY {
            return Err(CoreError::invalid_operation(format!(
                "{} log needs to be created with a genesis state if starting from block number 1",
                R::KIND.prefix()
            )));
        }
        self.reset(first_block_num, ChainContext::ChainId(chain_id), MAX_SUPPORTED_VERSION)?;
        self.head = None;
        Ok(())
    }

    /// Starts a new live file at `first_block_num` after the previous one was rotated away.
    pub(crate) fn start_new_file(&mut self, first_block_num: BlockNum) -> CoreResult<()> {
        let mut block_file = FileBackend::create_truncated(&self.log_path)?;
        let preamble = Preamble::new(
            MAX_SUPPORTED_VERSION,
            first_block_num,
            ChainContext::ChainId(self.preamble.chain_id()),
        );
        self.data_start = preamble.write_to(&mut block_file)?;
        self.block_file = block_file;
        self.index_file = FileBackend::create_truncated(&self.index_path)?;
        self.preamble = preamble;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> CoreResult<()> {
        self.block_file.flush()?;
        self.index_file.flush()?;
        Ok(())
    }

    /// First readable block of a pruned log, derived from the head and the trailing count.
    pub(crate) fn first_block_num_from_pruned_log(&self) -> CoreResult<BlockNum> {
        let head = self
            .head
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("pruned block log has no head"))?;
        let size = self.block_file.size()?;
        let trailer = size.checked_sub(TRAILER_SIZE).ok_or_else(|| {
            CoreError::corruption("pruned block log is missing its block count trailer")
        })?;
        let num_blocks = read_u32_at(&self.block_file, trailer)?;
        (head.block_num() + 1).checked_sub(num_blocks).ok_or_else(|| {
            CoreError::corruption(format!(
                "pruned block log claims {num_blocks} blocks but its head is block {}",
                head.block_num()
            ))
        })
    }

    /// Physically removes every entry before `first_block_num` from a pruned
    /// log, leaving a regular (unpruned) log and a matching index.
    ///
    /// `index_first_block_num` is the block the index currently starts at.
    pub(crate) fn vacuum(
        &mut self,
        first_block_num: BlockNum,
        index_first_block_num: BlockNum,
    ) -> CoreResult<()> {
        let offset_blocks = u64::from(
            first_block_num
                .checked_sub(index_first_block_num)
                .ok_or_else(|| CoreError::invalid_operation("vacuum before the start of the index"))?,
        );
        let copy_from = match &self.head {
            Some(_) => Some(read_u64_at(&self.index_file, offset_blocks * INDEX_ENTRY_SIZE)?),
            None => None,
        };

        // write the new header first; if the vacuum dies midway, recovery can still get through some blocks
        let copy_to =
            self.convert_existing_header_to_vacuumed(first_block_num, copy_from.unwrap_or(u64::MAX))?;

        let (Some(head), Some(mut copy_from)) = (self.head.clone(), copy_from) else {
            self.block_file.truncate(copy_to)?;
            self.index_file.truncate(0)?;
            self.preamble.first_block_num = first_block_num;
            self.data_start = copy_to;
            return Ok(());
        };

        let end = self.block_file.size()? - TRAILER_SIZE;
        let num_blocks_in_log = u64::from(head.block_num() - first_block_num + 1);
        let offset_bytes = copy_from - copy_to;

        let mut copy_to_pos = copy_to;
        if offset_bytes == 0 {
            copy_to_pos = end;
        } else {
            let mut remaining = end - copy_from;
            let mut tick = Instant::now();
            while remaining > 0 {
                let n = remaining.min(COPY_CHUNK_SIZE);
                let chunk = self.block_file.read_at(copy_from, n as usize)?;
                self.block_file.punch_hole(copy_to_pos, copy_from + n)?;
                self.block_file.write_at(copy_to_pos, &chunk)?;

                copy_from += n;
                copy_to_pos += n;
                remaining -= n;

                if tick.elapsed() >= Duration::from_secs(5) {
                    info!(bytes_remaining = remaining, "vacuuming pruned block log");
                    tick = Instant::now();
                }
            }
        }
        self.block_file.flush()?;
        self.block_file.truncate(copy_to_pos)?;

        let old = self.index_file.read_at(
            offset_blocks * INDEX_ENTRY_SIZE,
            (num_blocks_in_log * INDEX_ENTRY_SIZE) as usize,
        )?;
        let old: Vec<u64> = old
            .chunks_exact(INDEX_ENTRY_SIZE as usize)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        let shift = |pos: u64| {
            pos.checked_sub(offset_bytes).ok_or_else(|| {
                CoreError::corruption(format!("index entry {pos} precedes the vacuumed region"))
            })
        };

        let mut new_index = Vec::with_capacity(old.len() * INDEX_ENTRY_SIZE as usize);
        for (i, &old_pos) in old.iter().enumerate() {
            let new_pos = shift(old_pos)?;
            new_index.extend_from_slice(&new_pos.to_le_bytes());
            let entry_end = match old.get(i + 1) {
                Some(&next) => shift(next)?,
                None => copy_to_pos,
            };
            self.block_file
                .write_at(entry_end - POSITION_SIZE, &new_pos.to_le_bytes())?;
        }
        self.block_file.flush()?;

        self.index_file.write_at(0, &new_index)?;
        self.index_file.truncate(num_blocks_in_log * INDEX_ENTRY_SIZE)?;
        self.index_file.flush()?;

        self.preamble.first_block_num = first_block_num;
        self.data_start = copy_to;
        debug!(first_block_num, head = head.block_num(), "vacuumed block log");
        Ok(())
    }

    /// Rewrites the on-disk preamble of a pruned log as an unpruned one starting
    /// at `first_block_num` and returns its length. `limit` is the position of
    /// the first kept entry, which the new header must not overlap.
    fn convert_existing_header_to_vacuumed(
        &mut self,
        first_block_num: BlockNum,
        limit: u64,
    ) -> CoreResult<u64> {
        let size = self.block_file.size()?;
        let old = Preamble::read_from(&mut EntryReader::new(&self.block_file, 0, size))?;
        if !old.is_currently_pruned() {
            return Err(CoreError::invalid_operation(
                "trying to vacuum a non-pruned block log",
            ));
        }

        let context = if first_block_num == 1 {
            old.chain_context.clone()
        } else {
            ChainContext::ChainId(old.chain_id())
        };
        let mut header = Preamble::new(MAX_SUPPORTED_VERSION, first_block_num, context);
        if header.encoded_len() > limit {
            // an old header that was never pruned keeps its layout
            header = old;
            header.set_pruned(false);
        }
        header.validate()?;

        let bytes = header.encode();
        self.block_file.write_at(0, &bytes)?;

        self.preamble.ver = header.ver;
        self.preamble.chain_context = ChainContext::ChainId(header.chain_id());
        Ok(bytes.len() as u64)
    }
}
