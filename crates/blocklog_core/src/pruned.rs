//! Log strategy that keeps only the most recent blocks.
//!
//! Old entries are released by punching holes in the log file; the file keeps
//! its logical size and the index keeps its slots. A 4-byte count of readable
//! blocks trails the last entry so the first readable block can be found
//! again after a restart.

use crate::basic::BasicLog;
use crate::config::PruneConfig;
use crate::error::{CoreError, CoreResult};
use crate::genesis::GenesisState;
use crate::preamble::{MAX_HEADER_SIZE, PRUNED_VERSION_FLAG};
use crate::record::StoredRecord;
use crate::types::{BlockId, BlockNum, ChainId};
use blocklog_storage::StorageBackend;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

pub(crate) struct PrunedLog<R: StoredRecord> {
    pub(crate) basic: BasicLog<R>,
    first_block_number: BlockNum,
    prune_blocks: u32,
    prune_threshold_mask: u64,
    vacuum_on_close: u64,
}

impl<R: StoredRecord> PrunedLog<R> {
    pub(crate) fn open(dir: &Path, config: PruneConfig, initial_version: u32) -> CoreResult<Self> {
        if !config.prune_threshold.is_power_of_two() {
            return Err(CoreError::invalid_operation(format!(
                "block log prune threshold must be a power of 2, got {}",
                config.prune_threshold
            )));
        }
        if config.prune_blocks == 0 {
            return Err(CoreError::invalid_operation(
                "pruned block log must keep at least one block",
            ));
        }

        let basic = BasicLog::open(dir, initial_version)?;
        let mut log = Self {
            basic,
            first_block_number: 1,
            prune_blocks: config.prune_blocks,
            prune_threshold_mask: !(u64::from(config.prune_threshold) - 1),
            vacuum_on_close: config.vacuum_on_close,
        };

        if log.basic.is_initialized() {
            if log.basic.preamble.is_currently_pruned() {
                log.first_block_number = match log.basic.head {
                    Some(_) => log.basic.first_block_num_from_pruned_log()?,
                    None => log.basic.first_block_num(),
                };
            } else {
                log.transform_to_pruned()?;
            }
        }
        log.basic.preamble.set_pruned(true);

        info!(
            first_block_num = log.first_block_number,
            prune_blocks = log.prune_blocks,
            "opened pruned block log"
        );
        Ok(log)
    }

    pub(crate) fn first_block_num(&self) -> BlockNum {
        self.first_block_number
    }

    fn transform_to_pruned(&mut self) -> CoreResult<()> {
        info!(log = %self.basic.log_path().display(), "converting block log to pruned representation");
        self.first_block_number = self.basic.first_block_num();
        let num_blocks = self.prune(true)?;

        let ver = self.basic.preamble.version() | PRUNED_VERSION_FLAG;
        self.basic.block_file.write_at(0, &ver.to_le_bytes())?;
        self.basic.block_file.append(&num_blocks.to_le_bytes())?;
        self.basic.block_file.flush()?;
        Ok(())
    }

    fn num_blocks_in_log(&self) -> u32 {
        self.basic.head.as_ref().map_or(0, |head| {
            head.block_num()
                .saturating_sub(self.first_block_number)
                .saturating_add(1)
        })
    }

    /// Releases every entry older than the last `prune_blocks` and returns the
    /// number of blocks that stay readable.
    fn prune(&mut self, verbose: bool) -> CoreResult<u32> {
        let Some(head_num) = self.basic.head.as_ref().map(|h| h.block_num()) else {
            return Ok(0);
        };
        if head_num.saturating_sub(self.first_block_number) < self.prune_blocks {
            return Ok(self.num_blocks_in_log());
        }

        let prune_to = head_num - self.prune_blocks + 1;
        let pos = self
            .basic
            .get_block_pos(prune_to, self.first_block_number)?
            .ok_or_else(|| {
                CoreError::corruption(format!("no index entry for block {prune_to} while pruning"))
            })?;
        if pos > MAX_HEADER_SIZE && !self.basic.block_file.punch_hole(MAX_HEADER_SIZE, pos)? {
            debug!("hole punching unsupported; pruned blocks keep their space until vacuumed");
        }
        self.first_block_number = prune_to;
        self.basic.block_file.flush()?;

        if verbose {
            info!(first_block_num = prune_to, "pruned block log");
        } else {
            debug!(first_block_num = prune_to, "pruned block log");
        }
        Ok(self.prune_blocks)
    }

    /// Prunes when the entry at `pos` made the log end cross a threshold
    /// boundary, then writes the trailing block count.
    fn post_append(&mut self, pos: u64) -> CoreResult<()> {
        let end = self.basic.block_file.size()?;
        let num_blocks = if (pos & self.prune_threshold_mask) != (end & self.prune_threshold_mask) {
            self.prune(false)?
        } else {
            self.num_blocks_in_log()
        };
        self.basic.block_file.append(&num_blocks.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        let pos = self.basic.append_entry(record, id, bytes)?;
        self.post_append(pos)?;
        self.basic.block_file.flush()?;
        Ok(())
    }

    pub(crate) fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        self.basic.get_block_pos(block_num, self.first_block_number)
    }

    pub(crate) fn reset_genesis(
        &mut self,
        gs: &GenesisState,
        first_block: Arc<R>,
        bytes: &[u8],
    ) -> CoreResult<()> {
        self.basic.reset_genesis_preamble(gs)?;
        self.basic.block_file.append(&0u32.to_le_bytes())?;
        self.first_block_number = 1;
        let id = first_block.id();
        self.append(first_block, id, bytes)
    }

    pub(crate) fn reset_chain_id(
        &mut self,
        chain_id: ChainId,
        first_block_num: BlockNum,
    ) -> CoreResult<()> {
        self.basic.reset_chain_id(chain_id, first_block_num)?;
        self.basic.block_file.append(&0u32.to_le_bytes())?;
        self.basic.block_file.flush()?;
        self.first_block_number = first_block_num;
        Ok(())
    }

    /// Compacts the log down to its readable blocks and returns it to the
    /// pruned representation.
    pub(crate) fn vacuum(&mut self) -> CoreResult<()> {
        if !self.basic.is_initialized() {
            return Ok(());
        }
        let index_first = self.basic.first_block_num();
        self.basic.vacuum(self.first_block_number, index_first)?;
        self.first_block_number = self.basic.first_block_num();

        let ver = self.basic.preamble.version() | PRUNED_VERSION_FLAG;
        self.basic.block_file.write_at(0, &ver.to_le_bytes())?;
        self.basic
            .block_file
            .append(&self.num_blocks_in_log().to_le_bytes())?;
        self.basic.block_file.flush()?;
        self.basic.preamble.set_pruned(true);
        Ok(())
    }

    /// Leaves the pruned representation on close when the live data is small enough.
    fn try_exit_vacuum(&mut self) -> CoreResult<()> {
        if self.vacuum_on_close == 0 || !self.basic.is_initialized() {
            return Ok(());
        }

        let index_first = self.basic.first_block_num();
        if self.basic.head.is_some() {
            let first_data_pos = self
                .get_block_pos(self.first_block_number)?
                .ok_or_else(|| CoreError::corruption("first readable block has no index entry"))?;
            let last_data_pos = self.basic.block_file.size()?.saturating_sub(4);
            if last_data_pos.saturating_sub(first_data_pos) >= self.vacuum_on_close {
                return Ok(());
            }
        }

        info!(log = %self.basic.log_path().display(), "vacuuming pruned block log on close");
        self.basic.vacuum(self.first_block_number, index_first)?;
        self.first_block_number = self.basic.first_block_num();
        Ok(())
    }
}

impl<R: StoredRecord> Drop for PrunedLog<R> {
    fn drop(&mut self) {
        if let Err(e) = self.basic.flush() {
            error!(error = %e, "failed to flush pruned block log");
        }
        if let Err(e) = self.try_exit_vacuum() {
            error!(error = %e, "failed to vacuum pruned block log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BlockHeader, SignedBlock};
    use crate::view::LogView;
    use tempfile::tempdir;

    fn next_block(previous: BlockId) -> Arc<SignedBlock> {
        Arc::new(SignedBlock {
            header: BlockHeader {
                previous,
                ..BlockHeader::default()
            },
            producer_signature: vec![7; 16],
            transactions: vec![vec![0x5A; 200]],
        })
    }

    fn pruned_log(dir: &Path, config: PruneConfig, blocks: u32) -> PrunedLog<SignedBlock> {
        let mut log = PrunedLog::open(dir, config, 3).unwrap();
        let first = next_block(BlockId::default());
        let bytes = first.encode();
        log.reset_genesis(&GenesisState::default(), first, &bytes).unwrap();
        for _ in 1..blocks {
            let block = next_block(log.basic.head.as_ref().unwrap().id);
            let id = block.id();
            let bytes = block.encode();
            log.append(block, id, &bytes).unwrap();
        }
        log
    }

    #[test]
    fn rejects_bad_threshold() {
        let dir = tempdir().unwrap();
        let result = PrunedLog::<SignedBlock>::open(dir.path(), PruneConfig::new(5).prune_threshold(1000), 3);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn keeps_the_last_blocks_readable() {
        let dir = tempdir().unwrap();
        let log = pruned_log(dir.path(), PruneConfig::new(10).prune_threshold(64), 50);
        assert_eq!(log.first_block_num(), 41);
        assert!(log.get_block_pos(40).unwrap().is_none());
        for n in 41..=50 {
            let block = log.basic.read_block_by_num(n, log.first_block_num()).unwrap().unwrap();
            assert_eq!(block.block_num(), n);
        }
    }

    #[test]
    fn trailer_counts_readable_blocks() {
        let dir = tempdir().unwrap();
        drop(pruned_log(dir.path(), PruneConfig::new(10).prune_threshold(64), 25));

        let view = LogView::open(&dir.path().join("blocks.log")).unwrap();
        assert!(view.is_currently_pruned());
        let reopened = PrunedLog::<SignedBlock>::open(dir.path(), PruneConfig::new(10).prune_threshold(64), 3).unwrap();
        assert_eq!(reopened.first_block_num(), 16);
        assert_eq!(reopened.basic.head.as_ref().unwrap().block_num(), 25);
    }

    #[test]
    fn vacuum_on_close_leaves_a_plain_log() {
        let dir = tempdir().unwrap();
        let config = PruneConfig::new(5).prune_threshold(64).vacuum_on_close(1 << 20);
        drop(pruned_log(dir.path(), config, 20));

        let view = LogView::open(&dir.path().join("blocks.log")).unwrap();
        assert!(!view.is_currently_pruned());
        assert_eq!(view.first_block_num(), 16);
        assert_eq!(view.number_of_blocks().unwrap(), 5);
        view.construct_index(&dir.path().join("check.index")).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("check.index")).unwrap(),
            std::fs::read(dir.path().join("blocks.index")).unwrap()
        );
    }

    #[test]
    fn vacuum_keeps_reads_working() {
        let dir = tempdir().unwrap();
        let mut log = pruned_log(dir.path(), PruneConfig::new(4).prune_threshold(64), 12);
        let before = log.basic.block_file.size().unwrap();
        log.vacuum().unwrap();
        assert!(log.basic.block_file.size().unwrap() < before);
        assert_eq!(log.first_block_num(), 9);
        for n in 9..=12 {
            assert_eq!(
                log.basic.read_block_by_num(n, 9).unwrap().unwrap().block_num(),
                n
            );
        }

        let block = next_block(log.basic.head.as_ref().unwrap().id);
        let id = block.id();
        let bytes = block.encode();
        log.append(block, id, &bytes).unwrap();
        assert_eq!(log.basic.read_block_by_num(13, 9).unwrap().unwrap().block_num(), 13);
    }
}
