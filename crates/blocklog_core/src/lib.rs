//! # Blocklog Core
//!
//! Append-only storage engine for blockchain blocks.
//!
//! This crate provides:
//! - The on-disk log format: preamble, entries with self-position trailers, index files
//! - Storage strategies: basic, empty, partitioned (rotating) and pruned (hole-punching)
//! - The [`BlockLog`] facade serializing all access behind one lock
//! - Offline tooling: repair, index construction, trim, extract, split and merge

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod basic;
mod catalog;
mod codec;
mod config;
mod empty;
mod error;
mod genesis;
mod index;
mod log;
mod maintenance;
mod partitioned;
mod preamble;
mod pruned;
mod record;
mod repair;
mod types;
mod view;

pub use catalog::{CatalogEntry, LogCatalog};
pub use config::{Config, LogMode, PartitionedConfig, PruneConfig};
pub use error::{CoreError, CoreResult};
pub use genesis::{ChainConfig, ChainContext, GenesisState, PUBLIC_KEY_SIZE};
pub use index::{IndexWriter, LogIndex, INDEX_ENTRY_SIZE};
pub use log::BlockLog;
pub use maintenance::{
    construct_index, extract_block_range, extract_chain_context, extract_chain_id,
    extract_genesis_state, is_pruned_log, merge_blocklogs, smoke_test, split_blocklog,
    trim_blocklog_end, trim_blocklog_front, LogBundle, SmokeTestReport, TrimEndOutcome,
};
pub use preamble::{
    Preamble, GENESIS_STATE_OR_CHAIN_ID_VERSION, INITIAL_VERSION, MAX_HEADER_SIZE,
    MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION, NBYTES_WITH_CHAIN_ID, PRUNED_VERSION_FLAG,
    TOTEM,
};
pub use record::{BlockHeader, BlockHeaderState, RecordKind, SignedBlock, StoredRecord};
pub use repair::{repair_log, RepairOutcome, RepairReport};
pub use types::{BlockId, BlockNum, ChainId, ID_SIZE};
pub use view::{EntryReader, LogView, ValidationReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
