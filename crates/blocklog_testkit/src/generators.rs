//! Property-based test generators using proptest.
//!
//! Provides strategies for generating block log inputs that respect the
//! format's invariants.

use blocklog_core::{
    BlockHeader, BlockId, BlockNum, ChainConfig, ChainContext, ChainId, GenesisState, Preamble,
    GENESIS_STATE_OR_CHAIN_ID_VERSION, INITIAL_VERSION, PUBLIC_KEY_SIZE,
};
use proptest::prelude::*;

/// Strategy for chain ids.
pub fn chain_id_strategy() -> impl Strategy<Value = ChainId> {
    prop::array::uniform32(any::<u8>()).prop_map(ChainId::new)
}

/// Strategy for block ids.
pub fn block_id_strategy() -> impl Strategy<Value = BlockId> {
    prop::array::uniform32(any::<u8>()).prop_map(BlockId::new)
}

/// Strategy for genesis states.
pub fn genesis_state_strategy() -> impl Strategy<Value = GenesisState> {
    (
        any::<u32>(),
        prop::collection::vec(any::<u8>(), PUBLIC_KEY_SIZE),
        any::<u64>(),
        any::<u32>(),
        any::<u32>(),
        any::<u16>(),
    )
        .prop_map(|(timestamp, key, net, cpu, lifetime, depth)| {
            let mut initial_key = [0u8; PUBLIC_KEY_SIZE];
            initial_key.copy_from_slice(&key);
            GenesisState {
                initial_timestamp: timestamp,
                initial_key,
                initial_configuration: ChainConfig {
                    max_block_net_usage: net,
                    max_block_cpu_usage: cpu,
                    max_transaction_lifetime: lifetime,
                    max_authority_depth: depth,
                },
            }
        })
}

/// Strategy for block headers.
pub fn header_strategy() -> impl Strategy<Value = BlockHeader> {
    (
        any::<u32>(),
        any::<u64>(),
        any::<u16>(),
        block_id_strategy(),
        any::<u32>(),
    )
        .prop_map(
            |(timestamp, producer, confirmed, previous, schedule_version)| BlockHeader {
                timestamp,
                producer,
                confirmed,
                previous,
                schedule_version,
                ..BlockHeader::default()
            },
        )
}

/// Strategy for block payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for first block numbers of a log that does not start at genesis.
pub fn later_first_block_strategy() -> impl Strategy<Value = BlockNum> {
    2..BlockNum::MAX / 2
}

/// Strategy for preambles the writer accepts.
///
/// Covers version 1, version 2 and 3 logs starting at genesis, and version 3
/// logs starting later with a bare chain id.
pub fn preamble_strategy() -> impl Strategy<Value = Preamble> {
    prop_oneof![
        genesis_state_strategy()
            .prop_map(|gs| Preamble::new(INITIAL_VERSION, 1, ChainContext::Genesis(gs))),
        (2..=GENESIS_STATE_OR_CHAIN_ID_VERSION, genesis_state_strategy())
            .prop_map(|(ver, gs)| Preamble::new(ver, 1, ChainContext::Genesis(gs))),
        (later_first_block_strategy(), chain_id_strategy()).prop_map(|(first, id)| {
            Preamble::new(GENESIS_STATE_OR_CHAIN_ID_VERSION, first, ChainContext::ChainId(id))
        }),
    ]
}

/// Strategy for a chain length and a prune window inside it.
pub fn prune_window_strategy() -> impl Strategy<Value = (u32, u32)> {
    (2u32..60).prop_flat_map(|len| (Just(len), 1..len))
}
