//! Repair command implementation.

use blocklog_core::{repair_log, RepairOutcome, StoredRecord};
use std::path::Path;

/// Runs the repair command.
pub fn run<R: StoredRecord>(
    path: &Path,
    truncate_at: Option<u32>,
    reversible_dir: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Repairing {} log at {}", R::KIND.prefix(), path.display());

    let report = repair_log::<R>(path, truncate_at, reversible_dir)?;

    println!("Original files moved to {}", report.backup_dir.display());
    match report.outcome {
        RepairOutcome::Undamaged { last_block_num } => {
            println!("✓ Log was undamaged, last block {last_block_num}");
        }
        RepairOutcome::StoppedAt { block_num } => {
            println!("✓ Stopped at requested block {block_num}");
        }
        RepairOutcome::RecoveredUntilError {
            last_block_num,
            error,
        } => {
            println!("! Recovered up to block {last_block_num}");
            println!("  Reason: {error}");
        }
    }

    Ok(())
}
