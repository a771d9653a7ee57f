//! Log strategy that keeps nothing on disk.

use crate::basic::Head;
use crate::error::CoreResult;
use crate::record::StoredRecord;
use crate::types::{BlockNum, ChainId};
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Tracks only the head in memory. Existing log and index files are removed on open.
pub(crate) struct EmptyLog<R> {
    pub(crate) head: Option<Head<R>>,
    first_block_number: BlockNum,
}

impl<R: StoredRecord> EmptyLog<R> {
    pub(crate) fn open(dir: &Path) -> CoreResult<Self> {
        for name in [R::KIND.log_file_name(), R::KIND.index_file_name()] {
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed block log file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self {
            head: None,
            first_block_number: BlockNum::MAX,
        })
    }

    pub(crate) fn first_block_num(&self) -> BlockNum {
        self.head
            .as_ref()
            .map_or(self.first_block_number, Head::block_num)
    }

    pub(crate) fn reset_chain_id(&mut self, _chain_id: ChainId, first_block_num: BlockNum) {
        self.head = None;
        self.first_block_number = first_block_num;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SignedBlock;
    use tempfile::tempdir;

    #[test]
    fn removes_existing_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blocks.log"), b"x").unwrap();
        fs::write(dir.path().join("blocks.index"), b"y").unwrap();

        let log = EmptyLog::<SignedBlock>::open(dir.path()).unwrap();
        assert!(!dir.path().join("blocks.log").exists());
        assert!(!dir.path().join("blocks.index").exists());
        assert_eq!(log.first_block_num(), BlockNum::MAX);
    }

    #[test]
    fn chain_id_reset_moves_first_block() {
        let dir = tempdir().unwrap();
        let mut log = EmptyLog::<SignedBlock>::open(dir.path()).unwrap();
        log.reset_chain_id(ChainId::default(), 42);
        assert_eq!(log.first_block_num(), 42);
    }
}
