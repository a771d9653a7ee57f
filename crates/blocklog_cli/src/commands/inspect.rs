//! Inspect, chain-id and genesis-state command implementations.

use blocklog_core::{extract_chain_id, extract_genesis_state, GenesisState, LogView, RecordKind};
use serde::Serialize;
use std::path::Path;

/// Block log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Format version.
    pub version: u32,
    /// Whether the log is in pruned representation.
    pub pruned: bool,
    /// Chain id in hex.
    pub chain_id: String,
    /// Whether the preamble carries a genesis state.
    pub has_genesis_state: bool,
    /// First block recorded in the preamble.
    pub first_block_num: u32,
    /// Last block in the log, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_num: Option<u32>,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Index file size in bytes.
    pub index_size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, kind: RecordKind, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, kind)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path, kind: RecordKind) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let log_path = path.join(kind.log_file_name());
    let index_path = path.join(kind.index_file_name());

    if !log_path.exists() {
        return Err(format!("No block log found at {}", log_path.display()).into());
    }

    let view = LogView::open(&log_path)?;
    let last_block_num = if view.is_empty() {
        None
    } else {
        Some(view.last_block_num()?)
    };
    let index_size = if index_path.exists() {
        std::fs::metadata(&index_path)?.len()
    } else {
        0
    };

    Ok(InspectResult {
        path: log_path.display().to_string(),
        version: view.version(),
        pruned: view.is_currently_pruned(),
        chain_id: view.chain_id().to_string(),
        has_genesis_state: view.genesis_state().is_some(),
        first_block_num: view.first_block_num(),
        last_block_num,
        log_size: view.size(),
        index_size,
    })
}

/// Runs the chain-id command.
pub fn chain_id(
    path: &Path,
    retained_dir: &Path,
    kind: RecordKind,
) -> Result<(), Box<dyn std::error::Error>> {
    match extract_chain_id(path, retained_dir, kind)? {
        Some(id) => {
            println!("{id}");
            Ok(())
        }
        None => Err(format!("No chain id found in {}", path.display()).into()),
    }
}

/// Runs the genesis-state command.
pub fn genesis_state(
    path: &Path,
    retained_dir: &Path,
    kind: RecordKind,
) -> Result<(), Box<dyn std::error::Error>> {
    match extract_genesis_state(path, retained_dir, kind)? {
        Some(gs) => {
            print!("{}", format_genesis(&gs));
            Ok(())
        }
        None => Err(format!("No genesis state found in {}", path.display()).into()),
    }
}

fn format_genesis(gs: &GenesisState) -> String {
    let cfg = &gs.initial_configuration;
    format!(
        "Chain id:                 {}\n\
         Initial timestamp:        {}\n\
         Initial key:              {}\n\
         Max block net usage:      {}\n\
         Max block cpu usage:      {}\n\
         Max transaction lifetime: {}\n\
         Max authority depth:      {}\n",
        gs.compute_chain_id(),
        gs.initial_timestamp,
        hex::encode(gs.initial_key),
        cfg.max_block_net_usage,
        cfg.max_block_cpu_usage,
        cfg.max_transaction_lifetime,
        cfg.max_authority_depth,
    )
}

fn print_text_output(result: &InspectResult) {
    println!("Block Log Inspection");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Format:");
    println!("  Version:       {}", result.version);
    println!("  Pruned:        {}", result.pruned);
    println!("  Chain id:      {}", result.chain_id);
    println!("  Genesis state: {}", result.has_genesis_state);
    println!();
    println!("Blocks:");
    println!("  First block:   {}", result.first_block_num);
    match result.last_block_num {
        Some(last) => println!("  Last block:    {last}"),
        None => println!("  Last block:    (empty)"),
    }
    println!();
    println!("Storage:");
    println!("  Log size:      {}", format_size(result.log_size));
    println!("  Index size:    {}", format_size(result.index_size));
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_core::{BlockHeader, BlockLog, Config, GenesisState, SignedBlock, StoredRecord};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_block_range() {
        let dir = tempdir().unwrap();
        {
            let log = BlockLog::<SignedBlock>::open(dir.path(), Config::default()).unwrap();
            let first = Arc::new(SignedBlock {
                header: BlockHeader::default(),
                producer_signature: Vec::new(),
                transactions: Vec::new(),
            });
            let previous = first.id();
            log.reset_genesis(&GenesisState::default(), first).unwrap();
            let second = Arc::new(SignedBlock {
                header: BlockHeader {
                    previous,
                    ..BlockHeader::default()
                },
                producer_signature: Vec::new(),
                transactions: Vec::new(),
            });
            let id = second.id();
            log.append(second, id).unwrap();
        }

        let result = inspect(dir.path(), RecordKind::Blocks).unwrap();
        assert_eq!(result.first_block_num, 1);
        assert_eq!(result.last_block_num, Some(2));
        assert!(result.has_genesis_state);
        assert!(!result.pruned);
        assert_eq!(result.index_size, 16);
    }

    #[test]
    fn inspect_missing_log_fails() {
        let dir = tempdir().unwrap();
        assert!(inspect(dir.path(), RecordKind::Blocks).is_err());
    }

    #[test]
    fn genesis_text_lists_the_chain_id_and_key() {
        let gs = GenesisState::default();
        let text = format_genesis(&gs);
        assert!(text.contains(&gs.compute_chain_id().to_string()));
        assert!(text.contains(&"00".repeat(33)));
        assert_eq!(text.lines().count(), 7);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(100), "100 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
