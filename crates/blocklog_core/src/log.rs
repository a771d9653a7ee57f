//! The block log facade.
//!
//! [`BlockLog`] picks a storage strategy from [`Config`] once at open time and
//! serializes every operation through a single lock. Calls reach the strategy
//! through a plain `match`, with no trait objects involved.

use crate::basic::{BasicLog, Head};
use crate::config::{Config, LogMode};
use crate::empty::EmptyLog;
use crate::error::CoreResult;
use crate::genesis::GenesisState;
use crate::partitioned::PartitionedLog;
use crate::pruned::PrunedLog;
use crate::record::{BlockHeader, StoredRecord};
use crate::types::{BlockId, BlockNum, ChainId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Operations every storage strategy provides.
trait LogStrategy<R: StoredRecord>: Send {
    fn version(&self) -> u32;
    fn first_block_num(&self) -> BlockNum;
    fn head(&self) -> Option<&Head<R>>;
    fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()>;
    fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>>;
    fn read_block_by_num(&mut self, block_num: BlockNum) -> CoreResult<Option<R>>;
    fn read_block_header_by_num(&mut self, block_num: BlockNum)
        -> CoreResult<Option<BlockHeader>>;
    fn read_head(&self) -> CoreResult<Option<R>>;
    fn reset_genesis(&mut self, gs: &GenesisState, first_block: Arc<R>, bytes: &[u8])
        -> CoreResult<()>;
    fn reset_chain_id(&mut self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()>;
    fn flush(&mut self) -> CoreResult<()>;
    fn vacuum(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

impl<R: StoredRecord> LogStrategy<R> for BasicLog<R> {
    fn version(&self) -> u32 {
        BasicLog::version(self)
    }

    fn first_block_num(&self) -> BlockNum {
        BasicLog::first_block_num(self)
    }

    fn head(&self) -> Option<&Head<R>> {
        self.head.as_ref()
    }

    fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        BasicLog::append(self, record, id, bytes)
    }

    fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        BasicLog::get_block_pos(self, block_num, BasicLog::first_block_num(self))
    }

    fn read_block_by_num(&mut self, block_num: BlockNum) -> CoreResult<Option<R>> {
        let first = BasicLog::first_block_num(self);
        BasicLog::read_block_by_num(self, block_num, first)
    }

    fn read_block_header_by_num(
        &mut self,
        block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        let first = BasicLog::first_block_num(self);
        BasicLog::read_block_header_by_num(self, block_num, first)
    }

    fn read_head(&self) -> CoreResult<Option<R>> {
        self.read_head_record()
    }

    fn reset_genesis(
        &mut self,
        gs: &GenesisState,
        first_block: Arc<R>,
        bytes: &[u8],
    ) -> CoreResult<()> {
        BasicLog::reset_genesis(self, gs, first_block, bytes)
    }

    fn reset_chain_id(&mut self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()> {
        BasicLog::reset_chain_id(self, chain_id, first_block_num)
    }

    fn flush(&mut self) -> CoreResult<()> {
        BasicLog::flush(self)
    }
}

impl<R: StoredRecord> LogStrategy<R> for EmptyLog<R> {
    fn version(&self) -> u32 {
        0
    }

    fn first_block_num(&self) -> BlockNum {
        EmptyLog::first_block_num(self)
    }

    fn head(&self) -> Option<&Head<R>> {
        self.head.as_ref()
    }

    fn append(&mut self, record: Arc<R>, id: BlockId, _bytes: &[u8]) -> CoreResult<()> {
        self.head = Some(Head { record, id });
        Ok(())
    }

    fn get_block_pos(&self, _block_num: BlockNum) -> CoreResult<Option<u64>> {
        Ok(None)
    }

    fn read_block_by_num(&mut self, _block_num: BlockNum) -> CoreResult<Option<R>> {
        Ok(None)
    }

    fn read_block_header_by_num(
        &mut self,
        _block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        Ok(None)
    }

    fn read_head(&self) -> CoreResult<Option<R>> {
        Ok(None)
    }

    fn reset_genesis(
        &mut self,
        _gs: &GenesisState,
        first_block: Arc<R>,
        _bytes: &[u8],
    ) -> CoreResult<()> {
        let id = first_block.id();
        self.head = Some(Head {
            record: first_block,
            id,
        });
        Ok(())
    }

    fn reset_chain_id(&mut self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()> {
        EmptyLog::reset_chain_id(self, chain_id, first_block_num);
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

impl<R: StoredRecord> LogStrategy<R> for PartitionedLog<R> {
    fn version(&self) -> u32 {
        self.basic.version()
    }

    fn first_block_num(&self) -> BlockNum {
        PartitionedLog::first_block_num(self)
    }

    fn head(&self) -> Option<&Head<R>> {
        self.basic.head.as_ref()
    }

    fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        PartitionedLog::append(self, record, id, bytes)
    }

    fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        PartitionedLog::get_block_pos(self, block_num)
    }

    fn read_block_by_num(&mut self, block_num: BlockNum) -> CoreResult<Option<R>> {
        PartitionedLog::read_block_by_num(self, block_num)
    }

    fn read_block_header_by_num(
        &mut self,
        block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        PartitionedLog::read_block_header_by_num(self, block_num)
    }

    fn read_head(&self) -> CoreResult<Option<R>> {
        self.basic.read_head_record()
    }

    fn reset_genesis(
        &mut self,
        gs: &GenesisState,
        first_block: Arc<R>,
        bytes: &[u8],
    ) -> CoreResult<()> {
        self.basic.reset_genesis(gs, first_block, bytes)
    }

    fn reset_chain_id(&mut self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()> {
        PartitionedLog::reset_chain_id(self, chain_id, first_block_num)
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.basic.flush()
    }
}

impl<R: StoredRecord> LogStrategy<R> for PrunedLog<R> {
    fn version(&self) -> u32 {
        self.basic.version()
    }

    fn first_block_num(&self) -> BlockNum {
        PrunedLog::first_block_num(self)
    }

    fn head(&self) -> Option<&Head<R>> {
        self.basic.head.as_ref()
    }

    fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        PrunedLog::append(self, record, id, bytes)
    }

    fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        PrunedLog::get_block_pos(self, block_num)
    }

    fn read_block_by_num(&mut self, block_num: BlockNum) -> CoreResult<Option<R>> {
        let first = PrunedLog::first_block_num(self);
        self.basic.read_block_by_num(block_num, first)
    }

    fn read_block_header_by_num(
        &mut self,
        block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        let first = PrunedLog::first_block_num(self);
        self.basic.read_block_header_by_num(block_num, first)
    }

    fn read_head(&self) -> CoreResult<Option<R>> {
        self.basic.read_head_record()
    }

    fn reset_genesis(
        &mut self,
        gs: &GenesisState,
        first_block: Arc<R>,
        bytes: &[u8],
    ) -> CoreResult<()> {
        PrunedLog::reset_genesis(self, gs, first_block, bytes)
    }

    fn reset_chain_id(&mut self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()> {
        PrunedLog::reset_chain_id(self, chain_id, first_block_num)
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.basic.flush()
    }

    fn vacuum(&mut self) -> CoreResult<()> {
        PrunedLog::vacuum(self)
    }
}

enum LogImpl<R: StoredRecord> {
    Basic(BasicLog<R>),
    Empty(EmptyLog<R>),
    Partitioned(PartitionedLog<R>),
    Pruned(PrunedLog<R>),
}

/// Runs `$body` against whichever strategy `$log` holds, bound as `$strategy`.
///
/// Trait methods are called by path since the strategies have inherent
/// methods of the same names.
macro_rules! with_strategy {
    ($log:expr, $strategy:ident => $body:expr) => {
        match $log {
            LogImpl::Basic($strategy) => $body,
            LogImpl::Empty($strategy) => $body,
            LogImpl::Partitioned($strategy) => $body,
            LogImpl::Pruned($strategy) => $body,
        }
    };
}

/// Append-only store of serialized records keyed by block number.
///
/// All methods take `&self` and are serialized by an internal lock, so a
/// `BlockLog` can be shared between threads behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use blocklog_core::{BlockLog, Config, GenesisState, SignedBlock};
///
/// let log = BlockLog::<SignedBlock>::open("data/blocks", Config::default())?;
/// log.reset_genesis(&GenesisState::default(), Arc::new(first_block))?;
/// let block = log.read_block_by_num(1)?;
/// ```
pub struct BlockLog<R: StoredRecord> {
    data_dir: PathBuf,
    inner: Mutex<LogImpl<R>>,
}

impl<R: StoredRecord> std::fmt::Debug for BlockLog<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockLog")
            .field("kind", &R::KIND)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl<R: StoredRecord> BlockLog<R> {
    /// Opens the log in `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the files on disk
    /// are inconsistent.
    pub fn open(data_dir: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let initial_version = config.initial_version;
        let inner = match config.mode {
            LogMode::Basic => {
                let mut log = BasicLog::open(&data_dir, initial_version)?;
                log.convert_from_pruned()?;
                LogImpl::Basic(log)
            }
            LogMode::Empty => LogImpl::Empty(EmptyLog::open(&data_dir)?),
            LogMode::Partitioned(partitioned) => LogImpl::Partitioned(PartitionedLog::open(
                &data_dir,
                &partitioned,
                initial_version,
            )?),
            LogMode::Pruned(prune) => {
                LogImpl::Pruned(PrunedLog::open(&data_dir, prune, initial_version)?)
            }
        };
        Ok(Self {
            data_dir,
            inner: Mutex::new(inner),
        })
    }

    /// Directory holding the live log and index.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Format version of the live file, or `None` when no preamble was written yet.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        match with_strategy!(&*self.inner.lock(), log => LogStrategy::<R>::version(log)) {
            0 => None,
            v => Some(v),
        }
    }

    /// Appends `record`, serializing it first.
    ///
    /// # Errors
    ///
    /// Returns `AppendFailed` if no preamble was written yet or `record` does
    /// not directly follow the head.
    pub fn append(&self, record: Arc<R>, id: BlockId) -> CoreResult<()> {
        let bytes = record.encode();
        self.append_encoded(record, id, &bytes)
    }

    /// Appends `record` using its already serialized form.
    ///
    /// # Errors
    ///
    /// See [`Self::append`].
    pub fn append_encoded(&self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        with_strategy!(&mut *self.inner.lock(), log => {
            LogStrategy::<R>::append(log, record, id, bytes)
        })
    }

    /// Flushes the live files.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        with_strategy!(&mut *self.inner.lock(), log => LogStrategy::<R>::flush(log))
    }

    /// Discards the log and starts over from a genesis state with `first_block` as block 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be rewritten or `first_block` is not block 1.
    pub fn reset_genesis(&self, gs: &GenesisState, first_block: Arc<R>) -> CoreResult<()> {
        let bytes = first_block.encode();
        with_strategy!(&mut *self.inner.lock(), log => {
            LogStrategy::<R>::reset_genesis(log, gs, first_block, &bytes)
        })
    }

    /// Discards the log and starts over at `first_block_num` on chain `chain_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when a replayable log would start at block 1
    /// without a genesis state.
    pub fn reset_chain_id(&self, chain_id: ChainId, first_block_num: BlockNum) -> CoreResult<()> {
        with_strategy!(&mut *self.inner.lock(), log => {
            LogStrategy::<R>::reset_chain_id(log, chain_id, first_block_num)
        })
    }

    /// Reads block `block_num`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored entry is unreadable or is a different block.
    pub fn read_block_by_num(&self, block_num: BlockNum) -> CoreResult<Option<R>> {
        with_strategy!(&mut *self.inner.lock(), log => {
            LogStrategy::<R>::read_block_by_num(log, block_num)
        })
    }

    /// Reads only the header of block `block_num`.
    ///
    /// # Errors
    ///
    /// See [`Self::read_block_by_num`].
    pub fn read_block_header_by_num(&self, block_num: BlockNum) -> CoreResult<Option<BlockHeader>> {
        with_strategy!(&mut *self.inner.lock(), log => {
            LogStrategy::<R>::read_block_header_by_num(log, block_num)
        })
    }

    /// Id of block `block_num`, computed from its header.
    ///
    /// # Errors
    ///
    /// See [`Self::read_block_by_num`].
    pub fn read_block_id_by_num(&self, block_num: BlockNum) -> CoreResult<Option<BlockId>> {
        Ok(self
            .read_block_header_by_num(block_num)?
            .map(|header| header.calculate_id()))
    }

    /// File offset of block `block_num` in the live file.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        with_strategy!(&*self.inner.lock(), log => LogStrategy::<R>::get_block_pos(log, block_num))
    }

    /// Decodes the last entry from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the last entry is unreadable.
    pub fn read_head(&self) -> CoreResult<Option<R>> {
        with_strategy!(&*self.inner.lock(), log => LogStrategy::<R>::read_head(log))
    }

    /// The most recently appended record.
    #[must_use]
    pub fn head(&self) -> Option<Arc<R>> {
        with_strategy!(&*self.inner.lock(), log => {
            LogStrategy::<R>::head(log).map(|head| Arc::clone(&head.record))
        })
    }

    /// Id of the most recently appended record.
    #[must_use]
    pub fn head_id(&self) -> Option<BlockId> {
        with_strategy!(&*self.inner.lock(), log => LogStrategy::<R>::head(log).map(|head| head.id))
    }

    /// First block that can currently be read.
    #[must_use]
    pub fn first_block_num(&self) -> BlockNum {
        with_strategy!(&*self.inner.lock(), log => LogStrategy::<R>::first_block_num(log))
    }

    /// Compacts a pruned log down to its readable blocks. Other strategies ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be rewritten.
    pub fn vacuum(&self) -> CoreResult<()> {
        with_strategy!(&mut *self.inner.lock(), log => LogStrategy::<R>::vacuum(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PartitionedConfig, PruneConfig};
    use crate::record::{BlockHeaderState, SignedBlock};
    use tempfile::tempdir;

    fn block_after(previous: BlockId) -> Arc<SignedBlock> {
        Arc::new(SignedBlock {
            header: BlockHeader {
                previous,
                producer: 11,
                ..BlockHeader::default()
            },
            producer_signature: vec![1, 2, 3],
            transactions: vec![vec![4; 40]],
        })
    }

    fn grow(log: &BlockLog<SignedBlock>, up_to: BlockNum) {
        if log.head().is_none() {
            log.reset_genesis(&GenesisState::default(), block_after(BlockId::default()))
                .unwrap();
        }
        while log.head_id().unwrap().block_num() < up_to {
            let block = block_after(log.head_id().unwrap());
            let id = block.id();
            log.append(block, id).unwrap();
        }
    }

    #[test]
    fn every_mode_reads_its_head() {
        let modes = [
            LogMode::Basic,
            LogMode::Partitioned(PartitionedConfig::new(4)),
            LogMode::Pruned(PruneConfig::new(3).prune_threshold(128)),
        ];
        for mode in modes {
            let dir = tempdir().unwrap();
            let log = BlockLog::<SignedBlock>::open(dir.path(), Config::new().mode(mode)).unwrap();
            grow(&log, 10);
            assert_eq!(log.head_id().unwrap().block_num(), 10);
            let block = log.read_block_by_num(10).unwrap().unwrap();
            assert_eq!(block.id(), log.head_id().unwrap());
            assert_eq!(log.read_block_id_by_num(9).unwrap().unwrap().block_num(), 9);
        }
    }

    #[test]
    fn empty_mode_keeps_only_the_head() {
        let dir = tempdir().unwrap();
        let log = BlockLog::<SignedBlock>::open(dir.path(), Config::new().mode(LogMode::Empty))
            .unwrap();
        grow(&log, 3);
        assert_eq!(log.version(), None);
        assert_eq!(log.first_block_num(), 3);
        assert!(log.read_block_by_num(3).unwrap().is_none());
        assert!(log.get_block_pos(3).unwrap().is_none());
        assert!(!dir.path().join("blocks.log").exists());
    }

    #[test]
    fn head_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = BlockLog::<SignedBlock>::open(dir.path(), Config::default()).unwrap();
            grow(&log, 6);
        }
        let log = BlockLog::<SignedBlock>::open(dir.path(), Config::default()).unwrap();
        assert_eq!(log.version(), Some(3));
        assert_eq!(log.head_id().unwrap().block_num(), 6);
        assert_eq!(log.read_head().unwrap().unwrap().block_num(), 6);
        assert_eq!(log.first_block_num(), 1);
    }

    #[test]
    fn pruned_log_converts_back_to_basic() {
        let dir = tempdir().unwrap();
        {
            let config = Config::new().mode(LogMode::Pruned(PruneConfig::new(4).prune_threshold(64)));
            let log = BlockLog::<SignedBlock>::open(dir.path(), config).unwrap();
            grow(&log, 20);
            assert_eq!(log.first_block_num(), 17);
        }
        let log = BlockLog::<SignedBlock>::open(dir.path(), Config::default()).unwrap();
        assert_eq!(log.first_block_num(), 17);
        assert!(log.read_block_by_num(16).unwrap().is_none());
        assert_eq!(log.read_block_by_num(17).unwrap().unwrap().block_num(), 17);
        grow(&log, 21);
        assert_eq!(log.read_block_by_num(21).unwrap().unwrap().block_num(), 21);
    }

    #[test]
    fn header_state_log_starts_from_chain_id() {
        let dir = tempdir().unwrap();
        let log = BlockLog::<BlockHeaderState>::open(dir.path(), Config::default()).unwrap();
        log.reset_chain_id(ChainId::new([1; 32]), 5).unwrap();
        assert!(log.head().is_none());
        assert_eq!(log.first_block_num(), 5);

        let header = BlockHeader {
            previous: BlockId::from_digest(4, [0; 32]),
            ..BlockHeader::default()
        };
        let state = Arc::new(BlockHeaderState::from_header(header, Vec::new()));
        let id = state.id();
        log.append(state, id).unwrap();
        assert_eq!(log.read_block_by_num(5).unwrap().unwrap().block_num(), 5);
        assert!(log.read_block_by_num(4).unwrap().is_none());
    }
}
