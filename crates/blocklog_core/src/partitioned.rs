//! Log strategy that rotates the live file every `stride` blocks.

use crate::basic::{BasicLog, Head};
use crate::catalog::LogCatalog;
use crate::config::PartitionedConfig;
use crate::error::{CoreError, CoreResult};
use crate::genesis::ChainContext;
use crate::preamble::MAX_SUPPORTED_VERSION;
use crate::record::{BlockHeader, StoredRecord};
use crate::types::{BlockId, BlockNum, ChainId};
use blocklog_storage::FileBackend;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct PartitionedLog<R: StoredRecord> {
    pub(crate) basic: BasicLog<R>,
    catalog: LogCatalog,
    stride: u32,
}

impl<R: StoredRecord> PartitionedLog<R> {
    pub(crate) fn open(
        dir: &Path,
        config: &PartitionedConfig,
        initial_version: u32,
    ) -> CoreResult<Self> {
        if config.stride == 0 {
            return Err(CoreError::invalid_operation("block log stride must be at least 1"));
        }

        let mut catalog = LogCatalog::open(
            dir,
            &config.retained_dir,
            &config.archive_dir,
            R::KIND,
            config.max_retained_files,
        )?;
        let mut basic = BasicLog::open(dir, initial_version)?;
        basic.convert_from_pruned()?;

        if basic.head.is_none() && !catalog.is_empty() {
            if let (Some(last), Some(chain_id)) = (catalog.last_block_num(), catalog.chain_id()) {
                // the live file was lost or never started after the last rotation
                basic.reset(last + 1, ChainContext::ChainId(chain_id), MAX_SUPPORTED_VERSION)?;
                let record: Option<R> = catalog.read_block(last)?;
                basic.head = record.map(|record| Head {
                    id: record.id(),
                    record: Arc::new(record),
                });
                info!(first_block_num = last + 1, "started live block log after the rotated files");
                return Ok(Self {
                    basic,
                    catalog,
                    stride: config.stride,
                });
            }
        }

        if basic.is_initialized() {
            if let Some(chain_id) = catalog.chain_id() {
                if chain_id != basic.preamble.chain_id() {
                    return Err(CoreError::invalid_format(format!(
                        "the chain id of {} does not match the rotated log files in {}",
                        basic.log_path().display(),
                        catalog.retained_dir().display()
                    )));
                }
            }
        }

        Ok(Self {
            basic,
            catalog,
            stride: config.stride,
        })
    }

    pub(crate) fn first_block_num(&self) -> BlockNum {
        self.catalog
            .first_block_num()
            .unwrap_or_else(|| self.basic.first_block_num())
    }

    pub(crate) fn append(&mut self, record: Arc<R>, id: BlockId, bytes: &[u8]) -> CoreResult<()> {
        self.basic.append(record, id, bytes)?;
        if id.block_num() % self.stride == 0 {
            self.split_log()?;
        }
        Ok(())
    }

    /// Moves the live files into the catalog and starts a new live file after the head.
    fn split_log(&mut self) -> CoreResult<()> {
        let Some(head_num) = self.basic.head.as_ref().map(Head::block_num) else {
            return Ok(());
        };
        let dir = self.basic.dir().to_path_buf();
        let tmp_log = dir.join(format!("{}.log.tmp", R::KIND.prefix()));
        let tmp_index = dir.join(format!("{}.index.tmp", R::KIND.prefix()));

        // make sure the new live files can be created before moving the old ones away
        if let Err(e) = FileBackend::create_truncated(&tmp_log)
            .and_then(|_| FileBackend::create_truncated(&tmp_index))
        {
            warn!(error = %e, "unable to create new block log files, skipping rotation");
            return Ok(());
        }

        self.basic.flush()?;
        self.catalog
            .add(self.basic.first_block_num(), head_num, &dir)?;
        fs::rename(&tmp_log, self.basic.log_path())?;
        fs::rename(&tmp_index, self.basic.index_path())?;
        self.basic.start_new_file(head_num + 1)
    }

    pub(crate) fn get_block_pos(&self, block_num: BlockNum) -> CoreResult<Option<u64>> {
        self.basic.get_block_pos(block_num, self.basic.first_block_num())
    }

    pub(crate) fn read_block_by_num(&mut self, block_num: BlockNum) -> CoreResult<Option<R>> {
        match self
            .basic
            .read_block_by_num(block_num, self.basic.first_block_num())?
        {
            Some(record) => Ok(Some(record)),
            None => self.catalog.read_block(block_num),
        }
    }

    pub(crate) fn read_block_header_by_num(
        &mut self,
        block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        match self
            .basic
            .read_block_header_by_num(block_num, self.basic.first_block_num())?
        {
            Some(header) => Ok(Some(header)),
            None => self.catalog.read_block_header::<R>(block_num),
        }
    }

    pub(crate) fn reset_chain_id(
        &mut self,
        chain_id: ChainId,
        first_block_num: BlockNum,
    ) -> CoreResult<()> {
        if let Some(existing) = self.catalog.chain_id() {
            if existing != chain_id {
                return Err(CoreError::invalid_operation(format!(
                    "chain id {chain_id} does not match the rotated log files ({existing})"
                )));
            }
        }
        self.basic.reset_chain_id(chain_id, first_block_num)
    }
}
