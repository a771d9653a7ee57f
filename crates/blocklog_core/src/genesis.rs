//! Genesis state and the chain context stored in a log preamble.

use crate::codec::{read_array, read_u16, read_u32, read_u64};
use crate::error::CoreResult;
use crate::types::{sha256, ChainId};
use std::io::Read;

/// Length of a compressed public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Chain-wide limits fixed at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Maximum net usage of a block in bytes.
    pub max_block_net_usage: u64,
    /// Maximum CPU usage of a block in microseconds.
    pub max_block_cpu_usage: u32,
    /// Maximum lifetime of a transaction in seconds.
    pub max_transaction_lifetime: u32,
    /// Maximum depth of an authority check.
    pub max_authority_depth: u16,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_block_net_usage: 1024 * 1024,
            max_block_cpu_usage: 200_000,
            max_transaction_lifetime: 60 * 60,
            max_authority_depth: 6,
        }
    }
}

/// The genesis descriptor a chain starts from.
///
/// Encoded with a fixed size so preamble sizes are predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenesisState {
    /// Block timestamp slot of the genesis block.
    pub initial_timestamp: u32,
    /// Key of the initial producer.
    pub initial_key: [u8; PUBLIC_KEY_SIZE],
    /// Initial chain limits.
    pub initial_configuration: ChainConfig,
}

impl Default for GenesisState {
    fn default() -> Self {
        Self {
            initial_timestamp: 0,
            initial_key: [0u8; PUBLIC_KEY_SIZE],
            initial_configuration: ChainConfig::default(),
        }
    }
}

impl GenesisState {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 4 + PUBLIC_KEY_SIZE + 8 + 4 + 4 + 2;

    /// Appends the encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let cfg = &self.initial_configuration;
        buf.extend_from_slice(&self.initial_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.initial_key);
        buf.extend_from_slice(&cfg.max_block_net_usage.to_le_bytes());
        buf.extend_from_slice(&cfg.max_block_cpu_usage.to_le_bytes());
        buf.extend_from_slice(&cfg.max_transaction_lifetime.to_le_bytes());
        buf.extend_from_slice(&cfg.max_authority_depth.to_le_bytes());
    }

    /// Encodes the genesis state to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a genesis state.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends early.
    pub fn decode<R: Read>(r: &mut R) -> CoreResult<Self> {
        Ok(Self {
            initial_timestamp: read_u32(r)?,
            initial_key: read_array(r)?,
            initial_configuration: ChainConfig {
                max_block_net_usage: read_u64(r)?,
                max_block_cpu_usage: read_u32(r)?,
                max_transaction_lifetime: read_u32(r)?,
                max_authority_depth: read_u16(r)?,
            },
        })
    }

    /// Computes the chain id this genesis state defines.
    #[must_use]
    pub fn compute_chain_id(&self) -> ChainId {
        ChainId::new(sha256(&self.encode()))
    }
}

/// What a preamble records about the chain: the full genesis state or just its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainContext {
    /// Full genesis descriptor.
    Genesis(GenesisState),
    /// Bare chain identifier.
    ChainId(ChainId),
}

impl ChainContext {
    /// Returns the chain id, hashing the genesis state if needed.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Genesis(gs) => gs.compute_chain_id(),
            Self::ChainId(id) => *id,
        }
    }

    /// Returns the genesis state if this context carries one.
    #[must_use]
    pub fn genesis(&self) -> Option<&GenesisState> {
        match self {
            Self::Genesis(gs) => Some(gs),
            Self::ChainId(_) => None,
        }
    }
}

impl From<GenesisState> for ChainContext {
    fn from(gs: GenesisState) -> Self {
        Self::Genesis(gs)
    }
}

impl From<ChainId> for ChainContext {
    fn from(id: ChainId) -> Self {
        Self::ChainId(id)
    }
}
