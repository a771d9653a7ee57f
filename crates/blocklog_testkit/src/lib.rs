//! # Blocklog Testkit
//!
//! Test utilities for the block log.
//!
//! This crate provides:
//! - Fixtures that build chains of linked blocks and write them to logs
//! - Helpers that damage log files the way a crash or bad disk would
//! - Property-based test generators using proptest
//! - Fuzz harnesses for the preamble and entry decoders
//! - Preamble format vectors for other implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blocklog_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_log() {
//!     let dir = TempLogDir::new();
//!     let log = open_basic::<SignedBlock>(dir.path());
//!     let ids = ChainBuilder::new().extend(&log, 10).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use blocklog_core::{
        BlockHeader, BlockHeaderState, BlockId, BlockLog, BlockNum, Config, GenesisState, LogMode,
        PartitionedConfig, PruneConfig, RecordKind, SignedBlock, StoredRecord,
    };
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use vectors::*;
