//! Catalog of rotated block log files.
//!
//! Rotated files are named `<prefix>-<first>-<last>.log` with a matching
//! `.index`, and live in a single retained directory. When more files than
//! allowed are retained, the oldest are moved to an archive directory or
//! deleted.

use crate::error::{CoreError, CoreResult};
use crate::index::LogIndex;
use crate::record::{BlockHeader, RecordKind, StoredRecord};
use crate::types::{BlockNum, ChainId};
use crate::view::LogView;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One rotated log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Last block stored in the file.
    pub last_block_num: BlockNum,
    /// Path of the file without its `.log` / `.index` extension.
    pub filename_base: PathBuf,
}

impl CatalogEntry {
    /// Path of the log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        with_suffix(&self.filename_base, "log")
    }

    /// Path of the index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        with_suffix(&self.filename_base, "index")
    }
}

fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

struct OpenArchive {
    first_block_num: BlockNum,
    view: LogView,
    index: LogIndex,
}

/// Ordered set of rotated log files, keyed by first block number.
pub struct LogCatalog {
    kind: RecordKind,
    retained_dir: PathBuf,
    archive_dir: Option<PathBuf>,
    max_retained_files: usize,
    collection: BTreeMap<BlockNum, CatalogEntry>,
    chain_id: Option<ChainId>,
    active: Option<OpenArchive>,
}

impl std::fmt::Debug for LogCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCatalog")
            .field("retained_dir", &self.retained_dir)
            .field("archive_dir", &self.archive_dir)
            .field("files", &self.collection.len())
            .finish()
    }
}

/// Resolves a configured directory: empty means `log_dir`, relative paths hang off `log_dir`.
pub(crate) fn resolve_dir(log_dir: &Path, dir: &Path) -> PathBuf {
    if dir.as_os_str().is_empty() {
        log_dir.to_path_buf()
    } else if dir.is_relative() {
        log_dir.join(dir)
    } else {
        dir.to_path_buf()
    }
}

impl LogCatalog {
    /// Opens the catalog for a log living in `log_dir`.
    ///
    /// An empty `archive_dir` means evicted files are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a retained file is unreadable or belongs to another chain.
    pub fn open(
        log_dir: &Path,
        retained_dir: &Path,
        archive_dir: &Path,
        kind: RecordKind,
        max_retained_files: u32,
    ) -> CoreResult<Self> {
        let retained_dir = resolve_dir(log_dir, retained_dir);
        let archive_dir =
            (!archive_dir.as_os_str().is_empty()).then(|| resolve_dir(log_dir, archive_dir));
        fs::create_dir_all(&retained_dir)?;

        let mut catalog = Self {
            kind,
            retained_dir,
            archive_dir,
            max_retained_files: max_retained_files as usize,
            collection: BTreeMap::new(),
            chain_id: None,
            active: None,
        };
        catalog.load()?;
        Ok(catalog)
    }

    /// Catalogs the rotated files already present in `dir`, without any retention policy.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is unreadable or belongs to another chain.
    pub fn scan(dir: &Path, kind: RecordKind) -> CoreResult<Self> {
        let mut catalog = Self {
            kind,
            retained_dir: dir.to_path_buf(),
            archive_dir: None,
            max_retained_files: usize::MAX,
            collection: BTreeMap::new(),
            chain_id: None,
            active: None,
        };
        catalog.load()?;
        Ok(catalog)
    }

    fn load(&mut self) -> CoreResult<()> {
        for entry in fs::read_dir(&self.retained_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((first, last)) = self.kind.parse_range_file_name(name) else {
                continue;
            };

            let log_path = entry.path();
            let base = log_path.with_extension("");
            let view = LogView::open(&log_path)?;
            if view.first_block_num() != first || view.last_block_num()? != last {
                warn!(
                    path = %log_path.display(),
                    "block range of the log file does not match its name, skipping"
                );
                continue;
            }
            self.verify_chain_id(&view)?;

            let entry = CatalogEntry {
                last_block_num: last,
                filename_base: base,
            };
            let index_path = entry.index_path();
            if !index_path.exists() {
                info!(path = %index_path.display(), "index missing for rotated log, reconstructing");
                view.construct_index(&index_path)?;
            }
            self.collection.insert(first, entry);
        }
        if !self.collection.is_empty() {
            info!(
                dir = %self.retained_dir.display(),
                files = self.collection.len(),
                "loaded rotated block log files"
            );
        }
        Ok(())
    }

    fn verify_chain_id(&mut self, view: &LogView) -> CoreResult<()> {
        match self.chain_id {
            Some(id) if id != view.chain_id() => Err(CoreError::invalid_format(format!(
                "block log file {} has a different chain id",
                view.path().display()
            ))),
            Some(_) => Ok(()),
            None => {
                self.chain_id = Some(view.chain_id());
                Ok(())
            }
        }
    }

    /// Directory the catalog keeps its files in.
    #[must_use]
    pub fn retained_dir(&self) -> &Path {
        &self.retained_dir
    }

    /// Whether no rotated file is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// Number of retained files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collection.len()
    }

    /// Chain id shared by every retained file.
    #[must_use]
    pub fn chain_id(&self) -> Option<ChainId> {
        self.chain_id
    }

    /// First block of the oldest retained file.
    #[must_use]
    pub fn first_block_num(&self) -> Option<BlockNum> {
        self.collection.keys().next().copied()
    }

    /// Last block of the newest retained file.
    #[must_use]
    pub fn last_block_num(&self) -> Option<BlockNum> {
        self.collection.values().next_back().map(|e| e.last_block_num)
    }

    /// Retained files in block order as `(first_block_num, entry)`.
    pub fn entries(&self) -> impl Iterator<Item = (BlockNum, &CatalogEntry)> {
        self.collection.iter().map(|(first, entry)| (*first, entry))
    }

    /// Moves the live log and index in `src_dir` into the catalog as the
    /// file holding `[first, last]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be moved or belongs to another chain.
    pub fn add(&mut self, first: BlockNum, last: BlockNum, src_dir: &Path) -> CoreResult<()> {
        let entry = CatalogEntry {
            last_block_num: last,
            filename_base: self.retained_dir.join(self.kind.range_file_stem(first, last)),
        };
        fs::rename(src_dir.join(self.kind.log_file_name()), entry.log_path())?;
        fs::rename(src_dir.join(self.kind.index_file_name()), entry.index_path())?;

        let view = LogView::open(&entry.log_path())?;
        self.verify_chain_id(&view)?;
        info!(first, last, path = %entry.log_path().display(), "rotated block log file");
        self.collection.insert(first, entry);
        self.enforce_retention()
    }

    fn enforce_retention(&mut self) -> CoreResult<()> {
        while self.collection.len() > self.max_retained_files {
            let Some((first, entry)) = self.collection.pop_first() else {
                break;
            };
            if self.active.as_ref().is_some_and(|a| a.first_block_num == first) {
                self.active = None;
            }

            match &self.archive_dir {
                Some(dir) => {
                    fs::create_dir_all(dir)?;
                    for path in [entry.log_path(), entry.index_path()] {
                        if let Some(name) = path.file_name() {
                            fs::rename(&path, dir.join(name))?;
                        }
                    }
                    info!(first, archive = %dir.display(), "moved block log file to the archive");
                }
                None => {
                    fs::remove_file(entry.log_path())?;
                    fs::remove_file(entry.index_path())?;
                    info!(first, "deleted block log file past retention");
                }
            }
        }
        Ok(())
    }

    fn archive_for(&mut self, block_num: BlockNum) -> CoreResult<Option<&OpenArchive>> {
        let Some((&first, entry)) = self.collection.range(..=block_num).next_back() else {
            return Ok(None);
        };
        if block_num > entry.last_block_num {
            return Ok(None);
        }

        if self.active.as_ref().map(|a| a.first_block_num) != Some(first) {
            let view = LogView::open(&entry.log_path())?;
            let index = LogIndex::open(&entry.index_path())?;
            self.active = Some(OpenArchive {
                first_block_num: first,
                view,
                index,
            });
        }
        Ok(self.active.as_ref())
    }

    /// Reads block `block_num` from the retained files.
    ///
    /// # Errors
    ///
    /// Returns an error if the containing file is unreadable.
    pub fn read_block<R: StoredRecord>(&mut self, block_num: BlockNum) -> CoreResult<Option<R>> {
        let Some(archive) = self.archive_for(block_num)? else {
            return Ok(None);
        };
        let pos = archive
            .index
            .nth_block_position(block_num - archive.first_block_num)?;
        archive.view.read_block_at(pos, block_num).map(Some)
    }

    /// Reads the header of block `block_num` from the retained files.
    ///
    /// # Errors
    ///
    /// Returns an error if the containing file is unreadable.
    pub fn read_block_header<R: StoredRecord>(
        &mut self,
        block_num: BlockNum,
    ) -> CoreResult<Option<BlockHeader>> {
        let Some(archive) = self.archive_for(block_num)? else {
            return Ok(None);
        };
        let pos = archive
            .index
            .nth_block_position(block_num - archive.first_block_num)?;
        archive.view.read_header_at::<R>(pos, block_num).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{ChainContext, GenesisState};
    use crate::preamble::Preamble;
    use crate::record::SignedBlock;
    use crate::types::BlockId;
    use blocklog_storage::{FileBackend, StorageBackend};
    use tempfile::tempdir;

    /// Writes `blocks.log`/`blocks.index` holding `[first, last]` into `dir`.
    fn write_live_log(dir: &Path, first: BlockNum, last: BlockNum) {
        let context = if first == 1 {
            ChainContext::Genesis(GenesisState::default())
        } else {
            ChainContext::ChainId(GenesisState::default().compute_chain_id())
        };
        let mut log = FileBackend::create_truncated(&dir.join("blocks.log")).unwrap();
        let mut index = FileBackend::create_truncated(&dir.join("blocks.index")).unwrap();
        Preamble::new(3, first, context).write_to(&mut log).unwrap();
        for num in first..=last {
            let block = SignedBlock {
                header: BlockHeader {
                    previous: BlockId::from_digest(num - 1, [0; 32]),
                    ..BlockHeader::default()
                },
                ..SignedBlock::default()
            };
            let pos = log.size().unwrap();
            let mut entry = block.encode();
            entry.extend_from_slice(&pos.to_le_bytes());
            log.append(&entry).unwrap();
            index.append(&pos.to_le_bytes()).unwrap();
        }
        log.flush().unwrap();
        index.flush().unwrap();
    }

    #[test]
    fn add_and_read_back() {
        let dir = tempdir().unwrap();
        let mut catalog =
            LogCatalog::open(dir.path(), Path::new(""), Path::new("archive"), RecordKind::Blocks, 10)
                .unwrap();
        assert!(catalog.is_empty());

        write_live_log(dir.path(), 1, 10);
        catalog.add(1, 10, dir.path()).unwrap();
        write_live_log(dir.path(), 11, 20);
        catalog.add(11, 20, dir.path()).unwrap();

        assert_eq!(catalog.first_block_num(), Some(1));
        assert_eq!(catalog.last_block_num(), Some(20));
        assert!(dir.path().join("blocks-11-20.log").exists());
        let block: SignedBlock = catalog.read_block(15).unwrap().unwrap();
        assert_eq!(block.block_num(), 15);
        let header = catalog.read_block_header::<SignedBlock>(3).unwrap().unwrap();
        assert_eq!(header.block_num(), 3);
        assert!(catalog.read_block::<SignedBlock>(21).unwrap().is_none());
    }

    #[test]
    fn reopen_finds_rotated_files() {
        let dir = tempdir().unwrap();
        {
            let mut catalog =
                LogCatalog::open(dir.path(), Path::new("retained"), Path::new(""), RecordKind::Blocks, 10)
                    .unwrap();
            write_live_log(dir.path(), 1, 5);
            catalog.add(1, 5, dir.path()).unwrap();
        }
        fs::remove_file(dir.path().join("retained/blocks-1-5.index")).unwrap();

        let mut catalog =
            LogCatalog::open(dir.path(), Path::new("retained"), Path::new(""), RecordKind::Blocks, 10)
                .unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(dir.path().join("retained/blocks-1-5.index").exists());
        assert!(catalog.read_block::<SignedBlock>(4).unwrap().is_some());
    }

    #[test]
    fn oldest_file_moves_to_archive() {
        let dir = tempdir().unwrap();
        let mut catalog =
            LogCatalog::open(dir.path(), Path::new(""), Path::new("archive"), RecordKind::Blocks, 1)
                .unwrap();
        write_live_log(dir.path(), 1, 5);
        catalog.add(1, 5, dir.path()).unwrap();
        write_live_log(dir.path(), 6, 10);
        catalog.add(6, 10, dir.path()).unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.first_block_num(), Some(6));
        assert!(dir.path().join("archive/blocks-1-5.log").exists());
        assert!(dir.path().join("archive/blocks-1-5.index").exists());
        assert!(catalog.read_block::<SignedBlock>(3).unwrap().is_none());
    }

    #[test]
    fn evicted_files_are_deleted_without_archive() {
        let dir = tempdir().unwrap();
        let mut catalog =
            LogCatalog::open(dir.path(), Path::new(""), Path::new(""), RecordKind::Blocks, 1).unwrap();
        write_live_log(dir.path(), 1, 5);
        catalog.add(1, 5, dir.path()).unwrap();
        write_live_log(dir.path(), 6, 10);
        catalog.add(6, 10, dir.path()).unwrap();

        assert!(!dir.path().join("blocks-1-5.log").exists());
        assert!(!dir.path().join("archive").exists());
    }
}
