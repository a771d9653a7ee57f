//! Offline tools over closed log files: index construction, trimming,
//! extraction, split and merge.
//!
//! These run with exclusive access to the files and must not be pointed at a
//! log that a [`crate::BlockLog`] currently has open.

use crate::catalog::{resolve_dir, LogCatalog};
use crate::error::{CoreError, CoreResult};
use crate::genesis::{ChainContext, GenesisState};
use crate::index::{IndexWriter, LogIndex, INDEX_ENTRY_SIZE};
use crate::preamble::{Preamble, MAX_SUPPORTED_VERSION, PRUNED_VERSION_FLAG};
use crate::record::RecordKind;
use crate::types::{BlockNum, ChainId};
use crate::view::{adjust_block_positions, copy_range, LogView};
use blocklog_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes a fresh index for the log at `log_path`.
///
/// # Errors
///
/// Returns an error if the log is unreadable or its trailers are inconsistent.
pub fn construct_index(log_path: &Path, index_path: &Path) -> CoreResult<()> {
    LogView::open(log_path)?.construct_index(index_path)
}

/// A closed log and its index, checked to agree with each other.
#[derive(Debug)]
pub struct LogBundle {
    /// The log.
    pub view: LogView,
    /// The index.
    pub index: LogIndex,
    log_path: PathBuf,
    index_path: PathBuf,
}

impl LogBundle {
    /// Opens `<dir>/<prefix>.log` and its index.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(dir: &Path, kind: RecordKind) -> CoreResult<Self> {
        let log_path = dir.join(kind.log_file_name());
        if !log_path.is_file() {
            return Err(CoreError::not_found(log_path));
        }
        Self::open(&log_path, &dir.join(kind.index_file_name()))
    }

    /// Opens a log and its index, rebuilding a missing index first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a pruned log, and `InvalidFormat` or
    /// `Corruption` when the log and index disagree.
    pub fn open(log_path: &Path, index_path: &Path) -> CoreResult<Self> {
        let view = LogView::open(log_path)?;
        if view.is_currently_pruned() {
            return Err(CoreError::invalid_operation(format!(
                "{} is a pruned block log, which offline tools do not support; vacuum it first",
                log_path.display()
            )));
        }
        if !index_path.exists() {
            info!(path = %index_path.display(), "index file missing, reconstructing it");
            view.construct_index(index_path)?;
        }
        let index = LogIndex::open(index_path)?;
        let bundle = Self {
            view,
            index,
            log_path: log_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
        };
        bundle.validate_index()?;
        Ok(bundle)
    }

    fn validate_index(&self) -> CoreResult<()> {
        let log_blocks = self.view.number_of_blocks()?;
        let index_blocks = self.index.num_blocks();
        if log_blocks != index_blocks {
            return Err(CoreError::invalid_format(format!(
                "{} says it has {log_blocks} blocks which disagrees with {index_blocks} indicated by {}",
                self.log_path.display(),
                self.index_path.display()
            )));
        }
        if log_blocks > 0 {
            let log_pos = self.view.last_block_position()?;
            let index_pos = self.index.back()?;
            if log_pos != index_pos {
                return Err(CoreError::corruption(format!(
                    "the last block position from {} is at {log_pos} which does not match the last block position {index_pos} from {}",
                    self.log_path.display(),
                    self.index_path.display()
                )));
            }
        }
        Ok(())
    }

    /// Path of the log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// First block in the log.
    #[must_use]
    pub fn first_block_num(&self) -> BlockNum {
        self.view.first_block_num()
    }

    /// Last block in the log; `first_block_num() - 1` when the log is empty.
    #[must_use]
    pub fn last_block_num(&self) -> BlockNum {
        (self.first_block_num() + self.num_blocks()).wrapping_sub(1)
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_blocks(&self) -> u32 {
        self.index.num_blocks()
    }

    fn position_of(&self, block_num: BlockNum) -> CoreResult<u64> {
        self.index
            .nth_block_position(block_num - self.first_block_num())
    }
}

/// Copies `num_blocks` blocks starting at `first_block_num` from `bundle` into
/// a new log/index pair.
///
/// A copy that starts at the bundle's first block is a plain byte copy. Any
/// other copy gets a version 3 chain-id preamble and every trailer and index
/// entry is shifted by the distance the data moved.
fn extract_blocklog_i(
    bundle: &LogBundle,
    new_log_path: &Path,
    new_index_path: &Path,
    first_block_num: BlockNum,
    num_blocks: u32,
) -> CoreResult<()> {
    let last_block_num = first_block_num + num_blocks - 1;
    let first_kept_pos = bundle.position_of(first_block_num)?;
    let last_pos = if last_block_num == bundle.last_block_num() {
        bundle.view.end_of_block_position()
    } else {
        bundle.position_of(last_block_num + 1)?
    };

    let mut new_log = FileBackend::create_truncated(new_log_path)?;

    if first_block_num == bundle.first_block_num() {
        copy_range(bundle.view.backend(), 0, last_pos, &mut new_log)?;
        new_log.flush()?;
        let mut new_index = FileBackend::create_truncated(new_index_path)?;
        bundle
            .index
            .copy_to(&mut new_index, u64::from(num_blocks) * INDEX_ENTRY_SIZE)?;
        new_index.flush()?;
        return Ok(());
    }

    let preamble = Preamble::new(
        MAX_SUPPORTED_VERSION,
        first_block_num,
        ChainContext::ChainId(bundle.view.chain_id()),
    );
    let header_len = preamble.write_to(&mut new_log)?;
    copy_range(
        bundle.view.backend(),
        first_kept_pos,
        last_pos - first_kept_pos,
        &mut new_log,
    )?;

    let mut index = IndexWriter::create(new_index_path, num_blocks)?;
    let offset = header_len as i64 - first_kept_pos as i64;
    adjust_block_positions(&mut index, &mut new_log, header_len, offset)?;
    index.finish()?;
    new_log.flush()?;
    Ok(())
}

/// Removes every block before `truncate_at_block` from the log in `block_dir`.
///
/// The new files are built in `temp_dir`; the old ones are left there as
/// `<prefix>_old.log` / `<prefix>_old.index`. Returns `false` when there was
/// nothing to trim.
///
/// # Errors
///
/// Returns an error if both directories are the same or a file operation fails.
pub fn trim_blocklog_front(
    block_dir: &Path,
    temp_dir: &Path,
    kind: RecordKind,
    truncate_at_block: BlockNum,
) -> CoreResult<bool> {
    fs::create_dir_all(temp_dir)?;
    if fs::canonicalize(block_dir)? == fs::canonicalize(temp_dir)? {
        return Err(CoreError::invalid_operation(
            "block_dir and temp_dir need to be different directories",
        ));
    }

    info!(dir = %block_dir.display(), truncate_at_block, "trimming all blocks before block");
    let bundle = LogBundle::open_in(block_dir, kind)?;

    if truncate_at_block <= bundle.first_block_num() {
        info!(first = bundle.first_block_num(), "there are no blocks before the requested block, nothing to do");
        return Ok(false);
    }
    if truncate_at_block > bundle.last_block_num() {
        info!(last = bundle.last_block_num(), "all blocks are before the requested block, nothing to do");
        return Ok(false);
    }

    let new_log = temp_dir.join(kind.log_file_name());
    let new_index = temp_dir.join(kind.index_file_name());
    let num_blocks = bundle.last_block_num() - truncate_at_block + 1;
    extract_blocklog_i(&bundle, &new_log, &new_index, truncate_at_block, num_blocks)?;
    drop(bundle);

    let old_log = temp_dir.join(format!("{}_old.log", kind.prefix()));
    let old_index = temp_dir.join(format!("{}_old.index", kind.prefix()));
    fs::rename(block_dir.join(kind.log_file_name()), &old_log)?;
    fs::rename(block_dir.join(kind.index_file_name()), &old_index)?;
    fs::rename(&new_log, block_dir.join(kind.log_file_name()))?;
    fs::rename(&new_index, block_dir.join(kind.index_file_name()))?;

    info!(old = %old_log.display(), "log trimmed, the original files were kept");
    Ok(true)
}

/// Result of [`trim_blocklog_end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimEndOutcome {
    /// Blocks after the requested block were removed.
    Trimmed,
    /// The requested block already is the last one.
    AlreadyAtEnd,
    /// The requested block precedes the first block; trimming would empty the log.
    WouldEmptyLog,
    /// The requested block is past the last one.
    BeyondHead,
}

/// Removes every block after `n` from the log in `block_dir`.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or truncated.
pub fn trim_blocklog_end(
    block_dir: &Path,
    kind: RecordKind,
    n: BlockNum,
) -> CoreResult<TrimEndOutcome> {
    let bundle = LogBundle::open_in(block_dir, kind)?;
    let first = bundle.first_block_num();
    let last = bundle.last_block_num();

    if bundle.num_blocks() == 0 || n < first {
        warn!(n, first, "cannot trim a log to before its first block");
        return Ok(TrimEndOutcome::WouldEmptyLog);
    }
    if n > last {
        warn!(n, last, "requested block is past the end of the log");
        return Ok(TrimEndOutcome::BeyondHead);
    }
    if n == last {
        info!(n, "log already ends at the requested block");
        return Ok(TrimEndOutcome::AlreadyAtEnd);
    }

    let kept = n - first + 1;
    let log_end = bundle.index.nth_block_position(kept)?;
    drop(bundle);

    let mut log = FileBackend::open(&block_dir.join(kind.log_file_name()))?;
    log.truncate(log_end)?;
    log.sync()?;
    let mut index = FileBackend::open(&block_dir.join(kind.index_file_name()))?;
    index.truncate(u64::from(kept) * INDEX_ENTRY_SIZE)?;
    index.sync()?;

    info!(first, last = n, "log trimmed");
    Ok(TrimEndOutcome::Trimmed)
}

/// Summary of a [`smoke_test`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokeTestReport {
    /// First block in the log.
    pub first_block_num: BlockNum,
    /// Last block in the log.
    pub last_block_num: BlockNum,
    /// Number of blocks in the log and index.
    pub num_blocks: u32,
    /// Number of entries whose block number was checked.
    pub entries_checked: u32,
}

/// Checks that the log and index agree and spot-checks every `interval`-th
/// entry. An `interval` of 0 picks one giving about eight samples.
///
/// # Errors
///
/// Returns an error at the first inconsistency found.
pub fn smoke_test(block_dir: &Path, kind: RecordKind, interval: u32) -> CoreResult<SmokeTestReport> {
    let bundle = LogBundle::open_in(block_dir, kind)?;
    let num_blocks = bundle.num_blocks();
    let interval = if interval == 0 {
        u32::try_from((u64::from(num_blocks) + 7) >> 3)
            .unwrap_or(u32::MAX)
            .max(1)
    } else {
        interval
    };
    info!(num_blocks, interval, "smoke testing block log");

    let mut entries_checked = 0;
    for i in (0..num_blocks).step_by(interval as usize) {
        let pos = bundle.index.nth_block_position(i)?;
        bundle
            .view
            .light_validate_block_entry_at(pos, bundle.first_block_num() + i)?;
        entries_checked += 1;
    }

    Ok(SmokeTestReport {
        first_block_num: bundle.first_block_num(),
        last_block_num: bundle.last_block_num(),
        num_blocks,
        entries_checked,
    })
}

/// Copies blocks `[start, end]` into `<output_dir>/<prefix>-<start>-<end>.log`
/// (and `.index`), returning the path of the new log.
///
/// # Errors
///
/// Returns `InvalidOperation` if the range is not inside the log.
pub fn extract_block_range(
    block_dir: &Path,
    output_dir: &Path,
    kind: RecordKind,
    start: BlockNum,
    end: BlockNum,
) -> CoreResult<PathBuf> {
    let bundle = LogBundle::open_in(block_dir, kind)?;
    if start > end || start < bundle.first_block_num() || end > bundle.last_block_num() {
        return Err(CoreError::invalid_operation(format!(
            "block range [{start}, {end}] is not inside the log's range [{}, {}]",
            bundle.first_block_num(),
            bundle.last_block_num()
        )));
    }
    fs::create_dir_all(output_dir)?;
    let (log_path, index_path) = range_paths(output_dir, kind, start, end);
    extract_blocklog_i(&bundle, &log_path, &index_path, start, end - start + 1)?;
    info!(start, end, path = %log_path.display(), "extracted block range");
    Ok(log_path)
}

fn range_paths(dir: &Path, kind: RecordKind, first: BlockNum, last: BlockNum) -> (PathBuf, PathBuf) {
    let stem = kind.range_file_stem(first, last);
    (
        dir.join(format!("{stem}.log")),
        dir.join(format!("{stem}.index")),
    )
}

/// Splits the log in `block_dir` into files of `stride` blocks each, aligned
/// so that every file ends at a multiple of `stride`. Returns the ranges written.
///
/// # Errors
///
/// Returns an error if `stride` is 0 or a file cannot be written.
pub fn split_blocklog(
    block_dir: &Path,
    output_dir: &Path,
    kind: RecordKind,
    stride: u32,
) -> CoreResult<Vec<(BlockNum, BlockNum)>> {
    if stride == 0 {
        return Err(CoreError::invalid_operation("split stride must be at least 1"));
    }
    let bundle = LogBundle::open_in(block_dir, kind)?;
    if bundle.num_blocks() == 0 {
        return Ok(Vec::new());
    }
    fs::create_dir_all(output_dir)?;

    let first = u64::from(bundle.first_block_num());
    let last = u64::from(bundle.last_block_num());
    let stride = u64::from(stride);

    let mut ranges = Vec::new();
    for i in (first - 1) / stride..=(last - 1) / stride {
        let start = (i * stride + 1).max(first);
        let end = ((i + 1) * stride).min(last);
        // both bounds lie within [first, last], which are u32 values
        let (start, end) = (start as BlockNum, end as BlockNum);
        let (log_path, index_path) = range_paths(output_dir, kind, start, end);
        extract_blocklog_i(&bundle, &log_path, &index_path, start, end - start + 1)?;
        info!(start, end, "wrote split block log");
        ranges.push((start, end));
    }
    Ok(ranges)
}

/// Merges the contiguous `<prefix>-<first>-<last>.log` files in `blocks_dir`
/// into as few files as possible in `output_dir`. A gap between two files
/// starts a new output file. Returns the ranges written.
///
/// # Errors
///
/// Returns an error if a file is unreadable or cannot be written.
pub fn merge_blocklogs(
    blocks_dir: &Path,
    output_dir: &Path,
    kind: RecordKind,
) -> CoreResult<Vec<(BlockNum, BlockNum)>> {
    let catalog = LogCatalog::scan(blocks_dir, kind)?;
    if catalog.len() <= 1 {
        warn!(dir = %blocks_dir.display(), "found fewer than two block log files, nothing to merge");
        return Ok(Vec::new());
    }

    fs::create_dir_all(output_dir)?;
    let temp = tempfile::Builder::new()
        .prefix(".merge")
        .tempdir_in(output_dir)?;
    let temp_log = temp.path().join(kind.log_file_name());
    let temp_index = temp.path().join(kind.index_file_name());

    let mut produced = Vec::new();
    let mut current: Option<(BlockNum, BlockNum)> = None;
    for (first, entry) in catalog.entries() {
        match current {
            Some((start, end)) if end.checked_add(1) == Some(first) => {
                let bundle = LogBundle::open(&entry.log_path(), &entry.index_path())?;
                let mut log = FileBackend::open(&temp_log)?;
                let orig_size = log.size()?;
                let first_pos = bundle.view.first_block_position();
                copy_range(
                    bundle.view.backend(),
                    first_pos,
                    bundle.view.end_of_block_position() - first_pos,
                    &mut log,
                )?;

                let total = end - start + 1 + bundle.num_blocks();
                let mut index = IndexWriter::open_existing(&temp_index, total)?;
                let offset = orig_size as i64 - first_pos as i64;
                adjust_block_positions(&mut index, &mut log, orig_size, offset)?;
                index.finish()?;
                log.flush()?;
                current = Some((start, entry.last_block_num));
            }
            _ => {
                if let Some((start, end)) = current.take() {
                    warn!(
                        end,
                        next = first,
                        "found a discontinuity between block log files, starting a new merged file"
                    );
                    produced.push(move_merged(&temp_log, &temp_index, output_dir, kind, start, end)?);
                }
                fs::copy(entry.log_path(), &temp_log)?;
                fs::copy(entry.index_path(), &temp_index)?;
                current = Some((first, entry.last_block_num));
            }
        }
    }
    if let Some((start, end)) = current {
        produced.push(move_merged(&temp_log, &temp_index, output_dir, kind, start, end)?);
    }
    Ok(produced)
}

fn move_merged(
    temp_log: &Path,
    temp_index: &Path,
    output_dir: &Path,
    kind: RecordKind,
    start: BlockNum,
    end: BlockNum,
) -> CoreResult<(BlockNum, BlockNum)> {
    let (log_path, index_path) = range_paths(output_dir, kind, start, end);
    fs::rename(temp_log, &log_path)?;
    fs::rename(temp_index, &index_path)?;
    info!(start, end, path = %log_path.display(), "wrote merged block log");
    Ok((start, end))
}

/// Whether the log in `dir` is currently in pruned representation. Any read
/// failure counts as not pruned.
#[must_use]
pub fn is_pruned_log(dir: &Path, kind: RecordKind) -> bool {
    let read_version = || -> CoreResult<u32> {
        let backend = FileBackend::open_read_only(&dir.join(kind.log_file_name()))?;
        let bytes = backend.read_at(0, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };
    read_version().is_ok_and(|ver| ver & PRUNED_VERSION_FLAG != 0)
}

/// Rotated files of `kind` in `dir`, ordered by first block. A missing
/// directory has none.
fn rotated_files(dir: &Path, kind: RecordKind) -> CoreResult<Vec<(BlockNum, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        if let Some((first, _)) = file_name.to_str().and_then(|n| kind.parse_range_file_name(n)) {
            files.push((first, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Chain context of the logs in `dir`, whose rotated files live in
/// `retained_dir`.
///
/// `retained_dir` resolves like [`crate::PartitionedConfig::retained_dir`]:
/// empty means `dir`, relative paths hang off `dir`. A retained file starting
/// at block 1 is preferred since it carries the genesis state; then the live
/// log; then any retained file.
///
/// # Errors
///
/// Returns an error if a log exists but cannot be read.
pub fn extract_chain_context(
    dir: &Path,
    retained_dir: &Path,
    kind: RecordKind,
) -> CoreResult<Option<ChainContext>> {
    let retained = rotated_files(&resolve_dir(dir, retained_dir), kind)?;

    if let Some((_, path)) = retained.iter().find(|(first, _)| *first == 1) {
        return Ok(Some(LogView::open(path)?.preamble().chain_context.clone()));
    }

    let live = dir.join(kind.log_file_name());
    if live.is_file() && fs::metadata(&live)?.len() > 0 {
        return Ok(Some(LogView::open(&live)?.preamble().chain_context.clone()));
    }

    match retained.first() {
        Some((_, path)) => Ok(Some(LogView::open(path)?.preamble().chain_context.clone())),
        None => Ok(None),
    }
}

/// Genesis state of the logs in `dir`, if one is stored.
///
/// # Errors
///
/// See [`extract_chain_context`].
pub fn extract_genesis_state(
    dir: &Path,
    retained_dir: &Path,
    kind: RecordKind,
) -> CoreResult<Option<GenesisState>> {
    Ok(extract_chain_context(dir, retained_dir, kind)?.and_then(|ctx| ctx.genesis().copied()))
}

/// Chain id of the logs in `dir`.
///
/// # Errors
///
/// See [`extract_chain_context`].
pub fn extract_chain_id(
    dir: &Path,
    retained_dir: &Path,
    kind: RecordKind,
) -> CoreResult<Option<ChainId>> {
    Ok(extract_chain_context(dir, retained_dir, kind)?.map(|ctx| ctx.chain_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LogMode, PartitionedConfig, PruneConfig};
    use crate::log::BlockLog;
    use crate::record::{BlockHeader, SignedBlock, StoredRecord};
    use crate::types::BlockId;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_chain(dir: &Path, config: Config, blocks: BlockNum) -> Vec<SignedBlock> {
        let log = BlockLog::<SignedBlock>::open(dir, config).unwrap();
        let mut written = Vec::new();
        let mut previous = BlockId::default();
        for n in 1..=blocks {
            let block = SignedBlock {
                header: BlockHeader {
                    previous,
                    timestamp: n,
                    ..BlockHeader::default()
                },
                producer_signature: vec![n as u8; 8],
                transactions: vec![vec![0x11; (n as usize * 13) % 97]],
            };
            previous = block.id();
            if n == 1 {
                log.reset_genesis(&GenesisState::default(), Arc::new(block.clone()))
                    .unwrap();
            } else {
                log.append(Arc::new(block.clone()), block.id()).unwrap();
            }
            written.push(block);
        }
        written
    }

    fn read_all(dir: &Path) -> Vec<SignedBlock> {
        let bundle = LogBundle::open_in(dir, RecordKind::Blocks).unwrap();
        (bundle.first_block_num()..=bundle.last_block_num())
            .map(|n| {
                let pos = bundle.position_of(n).unwrap();
                bundle.view.read_block_at(pos, n).unwrap()
            })
            .collect()
    }

    #[test]
    fn trim_front_keeps_the_tail() {
        let dir = tempdir().unwrap();
        let blocks = dir.path().join("blocks");
        let written = write_chain(&blocks, Config::default(), 5);

        let trimmed =
            trim_blocklog_front(&blocks, &dir.path().join("tmp"), RecordKind::Blocks, 3).unwrap();
        assert!(trimmed);

        let bundle = LogBundle::open_in(&blocks, RecordKind::Blocks).unwrap();
        assert_eq!(bundle.first_block_num(), 3);
        assert_eq!(bundle.last_block_num(), 5);
        assert_eq!(bundle.index.num_blocks(), 3);
        assert_eq!(bundle.view.version(), 3);
        assert_eq!(bundle.view.chain_id(), GenesisState::default().compute_chain_id());
        drop(bundle);
        assert_eq!(read_all(&blocks), written[2..].to_vec());
        assert!(dir.path().join("tmp/blocks_old.log").exists());
    }

    #[test]
    fn trim_front_outside_the_range_does_nothing() {
        let dir = tempdir().unwrap();
        let blocks = dir.path().join("blocks");
        write_chain(&blocks, Config::default(), 4);
        let tmp = dir.path().join("tmp");
        assert!(!trim_blocklog_front(&blocks, &tmp, RecordKind::Blocks, 1).unwrap());
        assert!(!trim_blocklog_front(&blocks, &tmp, RecordKind::Blocks, 9).unwrap());
        assert!(trim_blocklog_front(&blocks, &blocks, RecordKind::Blocks, 2).is_err());
    }

    #[test]
    fn trim_end_outcomes() {
        let dir = tempdir().unwrap();
        let written = write_chain(dir.path(), Config::default(), 6);
        let kind = RecordKind::Blocks;

        assert_eq!(trim_blocklog_end(dir.path(), kind, 0).unwrap(), TrimEndOutcome::WouldEmptyLog);
        assert_eq!(trim_blocklog_end(dir.path(), kind, 7).unwrap(), TrimEndOutcome::BeyondHead);
        assert_eq!(trim_blocklog_end(dir.path(), kind, 6).unwrap(), TrimEndOutcome::AlreadyAtEnd);
        assert_eq!(trim_blocklog_end(dir.path(), kind, 4).unwrap(), TrimEndOutcome::Trimmed);

        assert_eq!(read_all(dir.path()), written[..4].to_vec());
        let log = BlockLog::<SignedBlock>::open(dir.path(), Config::default()).unwrap();
        assert_eq!(log.head_id().unwrap(), written[3].id());
    }

    #[test]
    fn smoke_test_samples_entries() {
        let dir = tempdir().unwrap();
        write_chain(dir.path(), Config::default(), 20);
        let report = smoke_test(dir.path(), RecordKind::Blocks, 0).unwrap();
        assert_eq!(report.num_blocks, 20);
        assert_eq!(report.last_block_num, 20);
        // interval (20 + 7) / 8 = 3 -> entries 0, 3, ..., 18
        assert_eq!(report.entries_checked, 7);

        let report = smoke_test(dir.path(), RecordKind::Blocks, 1).unwrap();
        assert_eq!(report.entries_checked, 20);
    }

    #[test]
    fn smoke_test_detects_a_short_index() {
        let dir = tempdir().unwrap();
        write_chain(dir.path(), Config::default(), 5);
        let mut index = FileBackend::open(&dir.path().join("blocks.index")).unwrap();
        index.truncate(32).unwrap();
        drop(index);
        assert!(matches!(
            smoke_test(dir.path(), RecordKind::Blocks, 0),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn split_then_merge_restores_the_chain() {
        let dir = tempdir().unwrap();
        let blocks = dir.path().join("blocks");
        let written = write_chain(&blocks, Config::default(), 23);

        let parts = dir.path().join("parts");
        let ranges = split_blocklog(&blocks, &parts, RecordKind::Blocks, 10).unwrap();
        assert_eq!(ranges, vec![(1, 10), (11, 20), (21, 23)]);

        let merged = dir.path().join("merged");
        let produced = merge_blocklogs(&parts, &merged, RecordKind::Blocks).unwrap();
        assert_eq!(produced, vec![(1, 23)]);

        let out = dir.path().join("check");
        fs::create_dir_all(&out).unwrap();
        fs::copy(merged.join("blocks-1-23.log"), out.join("blocks.log")).unwrap();
        fs::copy(merged.join("blocks-1-23.index"), out.join("blocks.index")).unwrap();
        assert_eq!(read_all(&out), written);
        assert_eq!(
            fs::read(out.join("blocks.log")).unwrap(),
            fs::read(blocks.join("blocks.log")).unwrap()
        );
    }

    #[test]
    fn merge_stops_at_gaps() {
        let dir = tempdir().unwrap();
        let blocks = dir.path().join("blocks");
        write_chain(&blocks, Config::default(), 30);
        let parts = dir.path().join("parts");
        split_blocklog(&blocks, &parts, RecordKind::Blocks, 10).unwrap();
        fs::remove_file(parts.join("blocks-11-20.log")).unwrap();
        fs::remove_file(parts.join("blocks-11-20.index")).unwrap();

        let produced = merge_blocklogs(&parts, &dir.path().join("merged"), RecordKind::Blocks).unwrap();
        assert_eq!(produced, vec![(1, 10), (21, 30)]);
    }

    #[test]
    fn extract_range_is_readable() {
        let dir = tempdir().unwrap();
        let blocks = dir.path().join("blocks");
        let written = write_chain(&blocks, Config::default(), 12);
        let out = dir.path().join("out");

        let path = extract_block_range(&blocks, &out, RecordKind::Blocks, 4, 9).unwrap();
        assert_eq!(path, out.join("blocks-4-9.log"));
        let bundle = LogBundle::open(&path, &out.join("blocks-4-9.index")).unwrap();
        assert_eq!(bundle.first_block_num(), 4);
        assert_eq!(bundle.last_block_num(), 9);
        for n in 4..=9 {
            let pos = bundle.position_of(n).unwrap();
            let block: SignedBlock = bundle.view.read_block_at(pos, n).unwrap();
            assert_eq!(block, written[n as usize - 1]);
        }
        assert!(extract_block_range(&blocks, &out, RecordKind::Blocks, 0, 3).is_err());
    }

    #[test]
    fn pruned_logs_are_detected_and_refused() {
        let dir = tempdir().unwrap();
        {
            let config = Config::new().mode(LogMode::Pruned(PruneConfig::new(3).prune_threshold(64)));
            write_chain(dir.path(), config, 8);
        }
        assert!(is_pruned_log(dir.path(), RecordKind::Blocks));
        assert!(!is_pruned_log(&dir.path().join("missing"), RecordKind::Blocks));
        assert!(matches!(
            LogBundle::open_in(dir.path(), RecordKind::Blocks),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn chain_context_prefers_the_first_retained_file() {
        let dir = tempdir().unwrap();
        let config = Config::new().mode(LogMode::Partitioned(PartitionedConfig::new(5)));
        write_chain(dir.path(), config, 12);

        let genesis = extract_genesis_state(dir.path(), Path::new(""), RecordKind::Blocks).unwrap();
        assert_eq!(genesis, Some(GenesisState::default()));
        let chain_id = extract_chain_id(dir.path(), Path::new(""), RecordKind::Blocks).unwrap();
        assert_eq!(chain_id, Some(GenesisState::default().compute_chain_id()));

        let empty = tempdir().unwrap();
        assert_eq!(
            extract_chain_id(empty.path(), Path::new("retained"), RecordKind::Blocks).unwrap(),
            None
        );
    }

    #[test]
    fn chain_context_looks_in_the_retained_dir() {
        let dir = tempdir().unwrap();
        let partitioned = PartitionedConfig::new(2).retained_dir("retained");
        write_chain(dir.path(), Config::new().mode(LogMode::Partitioned(partitioned)), 5);
        assert!(dir.path().join("retained").join("blocks-1-2.log").exists());

        let genesis =
            extract_genesis_state(dir.path(), Path::new("retained"), RecordKind::Blocks).unwrap();
        assert_eq!(genesis, Some(GenesisState::default()));

        let absolute = dir.path().join("retained");
        let chain_id = extract_chain_id(dir.path(), &absolute, RecordKind::Blocks).unwrap();
        assert_eq!(chain_id, Some(GenesisState::default().compute_chain_id()));
    }
}
