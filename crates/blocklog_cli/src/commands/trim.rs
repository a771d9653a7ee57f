//! Trim-front and trim-end command implementations.

use blocklog_core::{trim_blocklog_end, trim_blocklog_front, RecordKind, TrimEndOutcome};
use std::path::Path;

/// Runs the trim-front command.
pub fn front(
    path: &Path,
    temp_dir: &Path,
    kind: RecordKind,
    block: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if trim_blocklog_front(path, temp_dir, kind, block)? {
        println!("✓ Blocks before {block} removed");
    } else {
        println!("Nothing to trim, log already starts at or after block {block}");
    }
    Ok(())
}

/// Runs the trim-end command.
pub fn end(path: &Path, kind: RecordKind, block: u32) -> Result<(), Box<dyn std::error::Error>> {
    match trim_blocklog_end(path, kind, block)? {
        TrimEndOutcome::Trimmed => {
            println!("✓ Blocks after {block} removed");
            Ok(())
        }
        TrimEndOutcome::AlreadyAtEnd => {
            println!("Nothing to trim, block {block} is already the last block");
            Ok(())
        }
        TrimEndOutcome::WouldEmptyLog => {
            Err(format!("Block {block} precedes the first block, trimming would empty the log").into())
        }
        TrimEndOutcome::BeyondHead => {
            Err(format!("Block {block} is past the last block in the log").into())
        }
    }
}
