//! Recovery of a damaged block log.

use crate::error::{CoreError, CoreResult};
use crate::maintenance::{construct_index, is_pruned_log};
use crate::record::StoredRecord;
use crate::types::BlockNum;
use crate::view::{copy_range, LogView};
use blocklog_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How far [`repair_log`] got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Every entry validated.
    Undamaged {
        /// Last block in the repaired log.
        last_block_num: BlockNum,
    },
    /// Validation stopped at the requested block; later entries were dropped.
    StoppedAt {
        /// Last block in the repaired log.
        block_num: BlockNum,
    },
    /// An entry failed to validate; the log was cut before it.
    RecoveredUntilError {
        /// Last block in the repaired log.
        last_block_num: BlockNum,
        /// Why validation stopped.
        error: String,
    },
}

/// Result of [`repair_log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Where the original files were moved.
    pub backup_dir: PathBuf,
    /// How far validation got.
    pub outcome: RepairOutcome,
}

/// Timestamp used to name backup directories and quarantine files.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Rebuilds the log in `data_dir` from its longest valid prefix.
///
/// The existing log, index and (if named and present) the reversible block
/// directory are moved to `<data_dir>-<timestamp>` next to `data_dir`. The
/// backup is validated entry by entry up to `truncate_at_block` (or to the
/// end), the validated prefix is copied back into `data_dir` and a new index
/// is built for it. Undecodable trailing bytes are saved to
/// `<data_dir>/<prefix>-bad-tail-<timestamp>.log`.
///
/// # Errors
///
/// Returns `NotFound` if there is no log, `BackupDirExists` if the backup
/// directory is taken, and `InvalidOperation` for a pruned log.
pub fn repair_log<R: StoredRecord>(
    data_dir: &Path,
    truncate_at_block: Option<BlockNum>,
    reversible_dir_name: Option<&str>,
) -> CoreResult<RepairReport> {
    info!(dir = %data_dir.display(), "recovering block log");
    let truncate_at = truncate_at_block.unwrap_or(BlockNum::MAX);

    if !data_dir.is_dir() {
        return Err(CoreError::not_found(data_dir));
    }
    let blocks_dir = fs::canonicalize(data_dir)?;
    let log_path = blocks_dir.join(R::KIND.log_file_name());
    let index_path = blocks_dir.join(R::KIND.index_file_name());
    if !log_path.is_file() {
        return Err(CoreError::not_found(log_path));
    }
    if is_pruned_log(&blocks_dir, R::KIND) {
        return Err(CoreError::invalid_operation(
            "pruned block log cannot be repaired, vacuum it first",
        ));
    }
    // fail before moving anything if the header is unreadable
    drop(LogView::open(&log_path)?);

    let dir_name = blocks_dir
        .file_name()
        .ok_or_else(|| CoreError::invalid_operation("cannot repair a log at the filesystem root"))?
        .to_string_lossy()
        .into_owned();
    let stamp = timestamp();
    let backup_dir = blocks_dir.with_file_name(format!("{dir_name}-{stamp}"));
    if backup_dir.exists() {
        return Err(CoreError::BackupDirExists { path: backup_dir });
    }
    fs::create_dir_all(&backup_dir)?;

    let backup_log = backup_dir.join(R::KIND.log_file_name());
    fs::rename(&log_path, &backup_log)?;
    if index_path.exists() {
        fs::rename(&index_path, backup_dir.join(R::KIND.index_file_name()))?;
    }
    if let Some(name) = reversible_dir_name {
        let reversible = blocks_dir.join(name);
        if reversible.is_dir() {
            fs::rename(&reversible, backup_dir.join(name))?;
        }
    }
    info!(backup = %backup_dir.display(), "moved existing block log to backup location");

    let view = LogView::open(&backup_log)?;
    let report = view.full_validate_blocks::<R>(truncate_at, &blocks_dir, &stamp);

    let mut new_log = FileBackend::create_truncated(&log_path)?;
    copy_range(view.backend(), 0, report.position, &mut new_log)?;
    new_log.flush()?;
    drop(new_log);
    construct_index(&log_path, &index_path)?;

    let outcome = match report.error {
        Some(error) => {
            warn!(
                last_block_num = report.block_num,
                error = %error,
                "recovered only up to the last valid block"
            );
            RepairOutcome::RecoveredUntilError {
                last_block_num: report.block_num,
                error,
            }
        }
        None if report.block_num == truncate_at && report.position < view.size() => {
            info!(block_num = report.block_num, "stopped recovery at the requested block");
            RepairOutcome::StoppedAt {
                block_num: report.block_num,
            }
        }
        None => {
            info!(last_block_num = report.block_num, "existing block log was undamaged");
            RepairOutcome::Undamaged {
                last_block_num: report.block_num,
            }
        }
    };

    Ok(RepairReport { backup_dir, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::genesis::GenesisState;
    use crate::log::BlockLog;
    use crate::record::{BlockHeader, SignedBlock};
    use crate::types::BlockId;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_chain(dir: &Path, blocks: BlockNum) {
        let log = BlockLog::<SignedBlock>::open(dir, Config::default()).unwrap();
        let mut previous = BlockId::default();
        for n in 1..=blocks {
            let block = Arc::new(SignedBlock {
                header: BlockHeader {
                    previous,
                    timestamp: n,
                    ..BlockHeader::default()
                },
                producer_signature: vec![2; 8],
                transactions: vec![vec![3; 21]],
            });
            previous = block.id();
            if n == 1 {
                log.reset_genesis(&GenesisState::default(), block).unwrap();
            } else {
                log.append(block, previous).unwrap();
            }
        }
    }

    #[test]
    fn undamaged_log_is_left_intact() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain(&dir, 6);
        let before = fs::read(dir.join("blocks.log")).unwrap();

        let report = repair_log::<SignedBlock>(&dir, None, None).unwrap();
        assert_eq!(report.outcome, RepairOutcome::Undamaged { last_block_num: 6 });
        assert!(report.backup_dir.join("blocks.log").exists());
        assert_eq!(fs::read(dir.join("blocks.log")).unwrap(), before);
    }

    #[test]
    fn truncation_point_is_honoured() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain(&dir, 6);

        let report = repair_log::<SignedBlock>(&dir, Some(4), Some("reversible")).unwrap();
        assert_eq!(report.outcome, RepairOutcome::StoppedAt { block_num: 4 });
        let log = BlockLog::<SignedBlock>::open(&dir, Config::default()).unwrap();
        assert_eq!(log.head_id().unwrap().block_num(), 4);
    }

    #[test]
    fn reversible_dir_moves_with_the_backup() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain(&dir, 2);
        fs::create_dir_all(dir.join("reversible")).unwrap();

        let report = repair_log::<SignedBlock>(&dir, None, Some("reversible")).unwrap();
        assert!(report.backup_dir.join("reversible").is_dir());
        assert!(!dir.join("reversible").exists());
    }

    #[test]
    fn missing_log_is_not_found() {
        let root = tempdir().unwrap();
        assert!(matches!(
            repair_log::<SignedBlock>(root.path(), None, None),
            Err(CoreError::NotFound { .. })
        ));
    }
}
