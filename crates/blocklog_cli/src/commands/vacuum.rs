//! Vacuum command implementation.

use blocklog_core::{is_pruned_log, BlockLog, Config, StoredRecord};
use std::path::Path;

/// Runs the vacuum command.
///
/// Opening a pruned log in basic mode compacts it into a regular log.
pub fn run<R: StoredRecord>(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !is_pruned_log(path, R::KIND) {
        println!("{} log at {} is not pruned, nothing to do", R::KIND.prefix(), path.display());
        return Ok(());
    }

    let log = BlockLog::<R>::open(path, Config::default())?;
    log.flush()?;
    println!(
        "✓ Vacuumed, log now starts at block {}",
        log.first_block_num()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_core::{LogMode, LogView, PruneConfig, RecordKind, SignedBlock};
    use blocklog_testkit::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn vacuum_converts_a_pruned_log() {
        let dir = tempdir().unwrap();
        let config = Config::new().mode(LogMode::Pruned(PruneConfig::new(5).prune_threshold(64)));
        write_chain::<SignedBlock>(dir.path(), config, 20);
        assert!(is_pruned_log(dir.path(), RecordKind::Blocks));

        run::<SignedBlock>(dir.path()).unwrap();

        assert!(!is_pruned_log(dir.path(), RecordKind::Blocks));
        let view = LogView::open(&dir.path().join("blocks.log")).unwrap();
        assert_eq!(view.first_block_num(), 16);
        assert_eq!(view.number_of_blocks().unwrap(), 5);
    }

    #[test]
    fn vacuum_leaves_a_regular_log_alone() {
        let dir = tempdir().unwrap();
        write_chain::<SignedBlock>(dir.path(), Config::default(), 4);
        let before = std::fs::read(dir.path().join("blocks.log")).unwrap();

        run::<SignedBlock>(dir.path()).unwrap();
        assert_eq!(std::fs::read(dir.path().join("blocks.log")).unwrap(), before);
    }
}
