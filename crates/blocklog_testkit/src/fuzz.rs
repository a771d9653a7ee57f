//! Fuzz testing harnesses for the block log decoders.
//!
//! These targets can be driven by cargo-fuzz or by proptest. Each one must
//! return normally for any input; decode failures are errors, never panics.

use blocklog_core::{
    BlockHeaderState, BlockId, EntryReader, LogView, Preamble, SignedBlock, StoredRecord,
};
use blocklog_storage::InMemoryBackend;
use std::path::Path;

/// Upper bound on entries walked by [`fuzz_log_view`].
const MAX_FUZZ_ENTRIES: usize = 1024;

/// Fuzz target for preamble decoding.
///
/// A preamble that decodes must encode back to the bytes it was read from.
pub fn fuzz_preamble(data: &[u8]) {
    let mut reader = data;
    if let Ok(preamble) = Preamble::read_from(&mut reader) {
        let consumed = data.len() - reader.len();
        assert_eq!(
            preamble.encode(),
            &data[..consumed],
            "Preamble re-encoding mismatch"
        );
    }
}

/// Fuzz target for record decoding.
pub fn fuzz_records(data: &[u8]) {
    let _ = SignedBlock::decode(&mut &data[..]);
    let _ = SignedBlock::decode_header(&mut &data[..]);
    let _ = BlockHeaderState::decode(&mut &data[..]);
}

/// Fuzz target for whole log files.
///
/// Opens `data` as a block log and validates entries from the front until
/// one fails, the way recovery walks a damaged log.
pub fn fuzz_log_view(data: &[u8]) {
    let backend = InMemoryBackend::with_data(data.to_vec());
    let Ok(view) = LogView::from_backend(Path::new("fuzz.log"), Box::new(backend)) else {
        return;
    };

    let _ = view.last_block_num();
    let _ = view.number_of_blocks();

    let end = view.end_of_block_position();
    let mut reader = EntryReader::new(view.backend(), view.first_block_position(), end);
    let mut previous_num = view.first_block_num().wrapping_sub(1);
    let mut previous_id = BlockId::default();
    for _ in 0..MAX_FUZZ_ENTRIES {
        if reader.position() >= end {
            break;
        }
        match view.full_validate_block_entry::<SignedBlock>(&mut reader, previous_num, &previous_id) {
            Ok((num, id)) => {
                previous_num = num;
                previous_id = id;
            }
            Err(_) => break,
        }
    }
}
