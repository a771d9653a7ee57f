//! Smoke-test and make-index command implementations.

use blocklog_core::{construct_index, smoke_test as run_smoke_test, RecordKind};
use std::path::Path;

/// Runs the smoke-test command.
pub fn smoke_test(
    path: &Path,
    kind: RecordKind,
    interval: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Smoke testing {} log at {}", kind.prefix(), path.display());
    println!();

    match run_smoke_test(path, kind, interval) {
        Ok(report) => {
            println!("  First block:     {}", report.first_block_num);
            println!("  Last block:      {}", report.last_block_num);
            println!("  Blocks:          {}", report.num_blocks);
            println!("  Entries checked: {}", report.entries_checked);
            println!();
            println!("✓ Smoke test passed");
            Ok(())
        }
        Err(e) => {
            println!("  Error: {e}");
            println!();
            println!("✗ Smoke test failed");
            Err("Smoke test failed".into())
        }
    }
}

/// Runs the make-index command.
pub fn make_index(path: &Path, kind: RecordKind) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = path.join(kind.log_file_name());
    let index_path = path.join(kind.index_file_name());

    if !log_path.exists() {
        return Err(format!("No block log found at {}", log_path.display()).into());
    }

    println!("Building {}", index_path.display());
    construct_index(&log_path, &index_path)?;
    println!("✓ Index written");
    Ok(())
}
