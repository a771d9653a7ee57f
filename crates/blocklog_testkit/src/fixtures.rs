//! Test fixtures and block log helpers.
//!
//! Provides temporary log directories and a builder producing chains of
//! correctly linked blocks.

use blocklog_core::{
    BlockHeader, BlockHeaderState, BlockId, BlockLog, BlockNum, Config, CoreResult, GenesisState,
    RecordKind, SignedBlock, StoredRecord, PUBLIC_KEY_SIZE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A record type the fixtures can fabricate from a header.
pub trait TestRecord: StoredRecord {
    /// Builds a record for `header` carrying `payload`.
    fn from_header(header: BlockHeader, payload: Vec<u8>) -> Self;
}

impl TestRecord for SignedBlock {
    fn from_header(header: BlockHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            producer_signature: vec![0xA5; 8],
            transactions: vec![payload],
        }
    }
}

impl TestRecord for BlockHeaderState {
    fn from_header(header: BlockHeader, payload: Vec<u8>) -> Self {
        Self::from_header(header, payload)
    }
}

/// A temporary directory for block logs with automatic cleanup.
pub struct TempLogDir {
    dir: TempDir,
}

impl TempLogDir {
    /// Creates a new temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Path of the live log of `kind`.
    pub fn log_path(&self, kind: RecordKind) -> PathBuf {
        self.join(&kind.log_file_name())
    }

    /// Path of the live index of `kind`.
    pub fn index_path(&self, kind: RecordKind) -> PathBuf {
        self.join(&kind.index_file_name())
    }
}

impl Default for TempLogDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Genesis state used by the fixtures.
pub fn test_genesis() -> GenesisState {
    GenesisState {
        initial_timestamp: 1_000,
        initial_key: [7; PUBLIC_KEY_SIZE],
        ..GenesisState::default()
    }
}

/// Produces a chain of blocks, each linked to the id of the one before.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    previous: BlockId,
    payload_len: usize,
    genesis: GenesisState,
}

impl ChainBuilder {
    /// Starts a chain at block 1.
    pub fn new() -> Self {
        Self {
            previous: BlockId::default(),
            payload_len: 32,
            genesis: test_genesis(),
        }
    }

    /// Continues a chain after the block with id `previous`.
    pub fn following(previous: BlockId) -> Self {
        Self {
            previous,
            ..Self::new()
        }
    }

    /// Sets the payload size of each block.
    #[must_use]
    pub fn with_payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    /// Genesis state used when the chain starts at block 1.
    pub fn genesis(&self) -> &GenesisState {
        &self.genesis
    }

    /// Number of the next block to be built.
    pub fn next_block_num(&self) -> BlockNum {
        self.previous.block_num().wrapping_add(1)
    }

    fn next_header(&self) -> BlockHeader {
        let n = self.next_block_num();
        BlockHeader {
            timestamp: n,
            producer: u64::from(n % 21),
            previous: self.previous,
            ..BlockHeader::default()
        }
    }

    /// Builds the next record and advances the chain.
    pub fn next<R: TestRecord>(&mut self) -> Arc<R> {
        let n = self.next_block_num();
        let payload = vec![(n % 251) as u8; self.payload_len];
        let record = Arc::new(R::from_header(self.next_header(), payload));
        self.previous = record.id();
        record
    }

    /// Appends `count` blocks to `log`, starting the log first if it has no head.
    ///
    /// A chain starting at block 1 resets the log from the genesis state;
    /// one starting later resets it to the genesis chain id.
    pub fn extend<R: TestRecord>(&mut self, log: &BlockLog<R>, count: u32) -> CoreResult<Vec<BlockId>> {
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let record = self.next::<R>();
            let id = record.id();
            if log.head().is_some() {
                log.append(record, id)?;
            } else if record.block_num() == 1 {
                log.reset_genesis(&self.genesis, record)?;
            } else {
                log.reset_chain_id(self.genesis.compute_chain_id(), record.block_num())?;
                log.append(record, id)?;
            }
            ids.push(id);
        }
        Ok(ids)
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a basic log in `dir`.
pub fn open_basic<R: StoredRecord>(dir: &Path) -> BlockLog<R> {
    BlockLog::open(dir, Config::default()).expect("Failed to open block log")
}

/// Writes blocks 1 to `count` into a log opened with `config`, then closes it.
pub fn write_chain<R: TestRecord>(dir: &Path, config: Config, count: u32) -> Vec<BlockId> {
    let log = BlockLog::<R>::open(dir, config).expect("Failed to open block log");
    let ids = ChainBuilder::new()
        .extend(&log, count)
        .expect("Failed to append blocks");
    log.flush().expect("Failed to flush block log");
    ids
}
