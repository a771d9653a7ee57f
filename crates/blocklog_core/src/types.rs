//! Core type definitions for the block log.

use sha2::{Digest, Sha256};
use std::fmt;

/// Block height. Block 1 is the first block after genesis.
pub type BlockNum = u32;

/// Size in bytes of a SHA-256 based identifier.
pub const ID_SIZE: usize = 32;

/// Identity of a block.
///
/// The first four bytes hold the block number in big-endian order so the
/// number can be recovered from the id (and from a header's `previous` field)
/// without deserializing the block. The rest is the tail of a SHA-256 digest
/// of the block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(pub [u8; ID_SIZE]);

impl BlockId {
    /// Creates a block ID from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds an id from a header digest, stamping `block_num` over the first four bytes.
    #[must_use]
    pub fn from_digest(block_num: BlockNum, mut digest: [u8; ID_SIZE]) -> Self {
        digest[..4].copy_from_slice(&block_num.to_be_bytes());
        Self(digest)
    }

    /// Returns the block number encoded in the id.
    #[must_use]
    pub fn block_num(&self) -> BlockNum {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Returns `true` for the all-zero id used as "no previous block".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identity of a chain: the SHA-256 digest of its genesis state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChainId(pub [u8; ID_SIZE]);

impl ChainId {
    /// Creates a chain ID from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// Parses a chain id from its hex rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not 64 hex characters.
    pub fn from_hex(s: &str) -> crate::CoreResult<Self> {
        let mut bytes = [0u8; ID_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| crate::CoreError::decode(format!("invalid chain id '{s}': {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub(crate) fn sha256(data: &[u8]) -> [u8; ID_SIZE] {
    Sha256::digest(data).into()
}
