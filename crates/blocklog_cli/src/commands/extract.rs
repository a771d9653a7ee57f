//! Extract, split and merge command implementations.

use blocklog_core::{extract_block_range, merge_blocklogs, split_blocklog, RecordKind};
use std::path::Path;

/// Runs the extract command.
pub fn range(
    path: &Path,
    dest: &Path,
    kind: RecordKind,
    first: u32,
    last: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = extract_block_range(path, dest, kind, first, last)?;
    println!("✓ Blocks {first}-{last} written to {}", log_path.display());
    Ok(())
}

/// Runs the split command.
pub fn split(
    path: &Path,
    dest: &Path,
    kind: RecordKind,
    stride: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let ranges = split_blocklog(path, dest, kind, stride)?;
    print_ranges("Wrote", &ranges);
    Ok(())
}

/// Runs the merge command.
pub fn merge(path: &Path, dest: &Path, kind: RecordKind) -> Result<(), Box<dyn std::error::Error>> {
    let ranges = merge_blocklogs(path, dest, kind)?;
    if ranges.is_empty() {
        println!("Nothing to merge");
    } else {
        print_ranges("Merged into", &ranges);
    }
    Ok(())
}

fn print_ranges(label: &str, ranges: &[(u32, u32)]) {
    println!("{label} {} file(s):", ranges.len());
    for (first, last) in ranges {
        println!("  {first}-{last}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_core::LogView;
    use blocklog_testkit::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn split_then_merge() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain::<SignedBlock>(&dir, Config::default(), 5);

        let parts = root.path().join("parts");
        split(&dir, &parts, RecordKind::Blocks, 2).unwrap();
        for name in ["blocks-1-2.log", "blocks-3-4.log", "blocks-5-5.log"] {
            assert!(parts.join(name).exists(), "{name}");
        }

        let merged = root.path().join("merged");
        merge(&parts, &merged, RecordKind::Blocks).unwrap();
        let view = LogView::open(&merged.join("blocks-1-5.log")).unwrap();
        assert_eq!(view.number_of_blocks().unwrap(), 5);
    }

    #[test]
    fn extract_writes_the_requested_range() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain::<BlockHeaderState>(&dir, Config::default(), 6);

        let dest = root.path().join("out");
        range(&dir, &dest, RecordKind::BlockState, 2, 4).unwrap();
        let view = LogView::open(&dest.join("block_state-2-4.log")).unwrap();
        assert_eq!(view.first_block_num(), 2);
        assert_eq!(view.last_block_num().unwrap(), 4);
    }

    #[test]
    fn merge_of_a_single_file_writes_nothing() {
        let root = tempdir().unwrap();
        let dir = root.path().join("blocks");
        write_chain::<SignedBlock>(&dir, Config::default(), 3);
        let parts = root.path().join("parts");
        split(&dir, &parts, RecordKind::Blocks, 10).unwrap();

        let merged = root.path().join("merged");
        merge(&parts, &merged, RecordKind::Blocks).unwrap();
        assert!(!merged.join("blocks-1-3.log").exists());
    }
}
