//! Block log preamble codec.
//!
//! ```text
//! version: u32                       (top bit = currently pruned)
//! [first_block_num: u32]             absent in version 1
//! genesis_state | chain_id           genesis when version < 3 or first_block_num == 1
//! [totem: u64 = u64::MAX]            absent in version 1
//! ```

use crate::codec::{read_array, read_u32, read_u64};
use crate::error::{CoreError, CoreResult};
use crate::genesis::{ChainContext, GenesisState};
use crate::types::{BlockNum, ChainId, ID_SIZE};
use blocklog_storage::StorageBackend;
use std::io::Read;

/// Format with a genesis state and no first block number or totem.
pub const INITIAL_VERSION: u32 = 1;

/// First format that may carry a bare chain id.
pub const GENESIS_STATE_OR_CHAIN_ID_VERSION: u32 = 3;

/// Oldest readable format.
pub const MIN_SUPPORTED_VERSION: u32 = INITIAL_VERSION;

/// Newest format; always used when the log writes a preamble on its own.
pub const MAX_SUPPORTED_VERSION: u32 = GENESIS_STATE_OR_CHAIN_ID_VERSION;

/// Version bit marking a log whose old entries are punched out.
pub const PRUNED_VERSION_FLAG: u32 = 1 << 31;

/// Separator between the preamble and the first entry.
pub const TOTEM: u64 = u64::MAX;

/// Size of a version 2+ preamble carrying a chain id.
pub const NBYTES_WITH_CHAIN_ID: u64 = 4 + 4 + ID_SIZE as u64 + 8;

/// Size of the largest preamble the current formats can produce.
pub const MAX_HEADER_SIZE: u64 = 4 + 4 + GenesisState::ENCODED_SIZE as u64 + 8;

/// Fixed-layout header at the start of every block log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    /// Raw version word, including the pruned flag.
    pub ver: u32,
    /// Number of the first block the log was started at.
    pub first_block_num: BlockNum,
    /// Genesis state or chain id.
    pub chain_context: ChainContext,
}

impl Preamble {
    /// Creates a preamble.
    #[must_use]
    pub fn new(ver: u32, first_block_num: BlockNum, chain_context: ChainContext) -> Self {
        Self {
            ver,
            first_block_num,
            chain_context,
        }
    }

    /// Format version with the pruned flag masked off.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.ver & !PRUNED_VERSION_FLAG
    }

    /// Whether the pruned flag is set.
    #[must_use]
    pub const fn is_currently_pruned(&self) -> bool {
        self.ver & PRUNED_VERSION_FLAG != 0
    }

    /// Sets or clears the pruned flag.
    pub fn set_pruned(&mut self, pruned: bool) {
        if pruned {
            self.ver |= PRUNED_VERSION_FLAG;
        } else {
            self.ver &= !PRUNED_VERSION_FLAG;
        }
    }

    /// Chain id of the log.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.chain_context.chain_id()
    }

    /// Whether a preamble of `version` starting at `first_block_num` stores a genesis state.
    #[must_use]
    pub const fn contains_genesis_state(version: u32, first_block_num: BlockNum) -> bool {
        version < GENESIS_STATE_OR_CHAIN_ID_VERSION || first_block_num == 1
    }

    /// Whether a preamble of `version` starting at `first_block_num` stores a chain id.
    #[must_use]
    pub const fn contains_chain_id(version: u32, first_block_num: BlockNum) -> bool {
        version >= GENESIS_STATE_OR_CHAIN_ID_VERSION && first_block_num > 1
    }

    /// Whether `version` (without the pruned flag) can be read.
    #[must_use]
    pub const fn is_supported_version(version: u32) -> bool {
        version >= MIN_SUPPORTED_VERSION && version <= MAX_SUPPORTED_VERSION
    }

    /// Checks that the chain context matches what the version and first block require.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the combination cannot be encoded.
    pub fn validate(&self) -> CoreResult<()> {
        let version = self.version();
        if !Self::is_supported_version(version) {
            return Err(unsupported(version));
        }
        if version == INITIAL_VERSION && self.first_block_num != 1 {
            return Err(CoreError::invalid_operation(
                "a version 1 block log must start at block 1",
            ));
        }
        let genesis = matches!(self.chain_context, ChainContext::Genesis(_));
        if genesis != Self::contains_genesis_state(version, self.first_block_num) {
            return Err(CoreError::invalid_operation(format!(
                "version {version} starting at block {} cannot store {}",
                self.first_block_num,
                if genesis { "a genesis state" } else { "a chain id" }
            )));
        }
        Ok(())
    }

    /// Reads a preamble, verifying version and totem.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a zero version, a missing totem or a
    /// context that matches neither layout, and `UnsupportedVersion` for an
    /// unknown version.
    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self> {
        let ver = read_u32(r)?;
        let version = ver & !PRUNED_VERSION_FLAG;
        if version == 0 {
            return Err(CoreError::invalid_format("block log was not setup properly"));
        }
        if !Self::is_supported_version(version) {
            return Err(unsupported(version));
        }

        let first_block_num = if version == INITIAL_VERSION {
            1
        } else {
            read_u32(r)?
        };

        let chain_context = if Self::contains_genesis_state(version, first_block_num) {
            ChainContext::Genesis(GenesisState::decode(r)?)
        } else if Self::contains_chain_id(version, first_block_num) {
            ChainContext::ChainId(ChainId::new(read_array(r)?))
        } else {
            return Err(CoreError::invalid_format(format!(
                "block log version {version} with first block {first_block_num} contains neither a genesis state nor a chain id"
            )));
        };

        if version != INITIAL_VERSION {
            let totem = read_u64(r)?;
            if totem != TOTEM {
                return Err(CoreError::invalid_format(format!(
                    "expected separator between log header and block storage was not found (expected: {}, actual: {})",
                    hex::encode(TOTEM.to_le_bytes()),
                    hex::encode(totem.to_le_bytes())
                )));
            }
        }

        Ok(Self {
            ver,
            first_block_num,
            chain_context,
        })
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        let context = match self.chain_context {
            ChainContext::Genesis(_) => GenesisState::ENCODED_SIZE,
            ChainContext::ChainId(_) => ID_SIZE,
        } as u64;
        if self.version() == INITIAL_VERSION {
            4 + context
        } else {
            4 + 4 + context + 8
        }
    }

    fn encode_without_version(&self, buf: &mut Vec<u8>) {
        if self.version() != INITIAL_VERSION {
            buf.extend_from_slice(&self.first_block_num.to_le_bytes());
        }
        match &self.chain_context {
            ChainContext::Genesis(gs) => gs.encode_into(buf),
            ChainContext::ChainId(id) => buf.extend_from_slice(id.as_bytes()),
        }
        if self.version() != INITIAL_VERSION {
            buf.extend_from_slice(&TOTEM.to_le_bytes());
        }
    }

    /// Encodes the preamble to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&self.ver.to_le_bytes());
        self.encode_without_version(&mut buf);
        buf
    }

    /// Writes the preamble at offset 0 of `backend` and returns its length.
    ///
    /// A zero version is written first and replaced only after the rest of
    /// the header has been flushed, so a crash in between leaves a log that
    /// reads as "not setup properly" instead of a plausible but wrong header.
    ///
    /// # Errors
    ///
    /// Returns an error if the preamble is inconsistent or the write fails.
    pub fn write_to(&self, backend: &mut dyn StorageBackend) -> CoreResult<u64> {
        self.validate()?;

        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&0u32.to_le_bytes());
        self.encode_without_version(&mut buf);

        backend.write_at(0, &buf)?;
        backend.flush()?;
        backend.write_at(0, &self.ver.to_le_bytes())?;
        backend.flush()?;
        Ok(buf.len() as u64)
    }
}

fn unsupported(version: u32) -> CoreError {
    CoreError::UnsupportedVersion {
        version,
        min: MIN_SUPPORTED_VERSION,
        max: MAX_SUPPORTED_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_storage::InMemoryBackend;

    fn genesis() -> GenesisState {
        GenesisState {
            initial_timestamp: 7,
            ..GenesisState::default()
        }
    }

    #[test]
    fn version_layout_rules() {
        assert!(Preamble::contains_genesis_state(1, 1));
        assert!(Preamble::contains_genesis_state(2, 10));
        assert!(Preamble::contains_genesis_state(3, 1));
        assert!(!Preamble::contains_genesis_state(3, 2));
        assert!(Preamble::contains_chain_id(3, 2));
        assert!(!Preamble::contains_chain_id(2, 2));
        assert!(!Preamble::is_supported_version(0));
        assert!(!Preamble::is_supported_version(4));
    }

    #[test]
    fn v1_has_no_first_block_or_totem() {
        let p = Preamble::new(1, 1, genesis().into());
        let bytes = p.encode();
        assert_eq!(bytes.len() as u64, 4 + GenesisState::ENCODED_SIZE as u64);
        assert_eq!(Preamble::read_from(&mut bytes.as_slice()).unwrap(), p);
    }

    #[test]
    fn v3_chain_id_layout() {
        let id = genesis().compute_chain_id();
        let p = Preamble::new(3, 100, id.into());
        let bytes = p.encode();
        assert_eq!(bytes.len() as u64, NBYTES_WITH_CHAIN_ID);
        assert_eq!(p.encoded_len(), NBYTES_WITH_CHAIN_ID);
        assert_eq!(&bytes[40..48], &TOTEM.to_le_bytes());
        assert_eq!(Preamble::read_from(&mut bytes.as_slice()).unwrap(), p);
    }

    #[test]
    fn v3_genesis_is_the_largest_header() {
        let p = Preamble::new(3, 1, genesis().into());
        assert_eq!(p.encoded_len(), MAX_HEADER_SIZE);
        assert_eq!(p.encode().len() as u64, MAX_HEADER_SIZE);
    }

    #[test]
    fn pruned_flag_is_masked() {
        let mut p = Preamble::new(3, 5, genesis().compute_chain_id().into());
        p.set_pruned(true);
        assert_eq!(p.version(), 3);
        assert!(p.is_currently_pruned());

        let read = Preamble::read_from(&mut p.encode().as_slice()).unwrap();
        assert!(read.is_currently_pruned());
        assert_eq!(read.version(), 3);
    }

    #[test]
    fn bad_totem_is_rejected() {
        let mut bytes = Preamble::new(2, 1, genesis().into()).encode();
        let last = bytes.len() - 1;
        bytes[last] = 0;
        assert!(matches!(
            Preamble::read_from(&mut bytes.as_slice()),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn zero_and_unknown_versions_are_rejected() {
        let mut bytes = Preamble::new(3, 1, genesis().into()).encode();
        bytes[..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Preamble::read_from(&mut bytes.as_slice()),
            Err(CoreError::InvalidFormat { .. })
        ));

        bytes[..4].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            Preamble::read_from(&mut bytes.as_slice()),
            Err(CoreError::UnsupportedVersion { version: 4, .. })
        ));
    }

    #[test]
    fn write_to_leaves_real_version_last() {
        let p = Preamble::new(3, 1, genesis().into());
        let mut backend = InMemoryBackend::new();
        let len = p.write_to(&mut backend).unwrap();
        assert_eq!(len, p.encoded_len());
        assert_eq!(backend.data(), p.encode());
    }

    #[test]
    fn inconsistent_preamble_cannot_be_written() {
        let p = Preamble::new(3, 1, genesis().compute_chain_id().into());
        let mut backend = InMemoryBackend::new();
        assert!(p.write_to(&mut backend).is_err());
        assert_eq!(backend.size().unwrap(), 0);
    }
}
