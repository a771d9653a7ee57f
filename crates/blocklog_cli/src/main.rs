//! Blocklog CLI
//!
//! Offline maintenance tools for block logs.
//!
//! # Commands
//!
//! - `inspect` - Display log metadata and block range
//! - `smoke-test` - Check that the log and index agree
//! - `make-index` - Rebuild the index from the log
//! - `repair` - Recover the longest valid prefix of a damaged log
//! - `trim-front` / `trim-end` - Drop blocks before or after a block
//! - `extract` / `split` / `merge` - Copy block ranges between files
//! - `vacuum` - Convert a pruned log back to a regular one
//! - `chain-id` / `genesis-state` - Print the chain context of the logs

mod commands;

use blocklog_core::{BlockHeaderState, RecordKind, SignedBlock};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Block log command-line tools.
#[derive(Parser)]
#[command(name = "blocklog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the blocks directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Operate on block state logs instead of block logs
    #[arg(global = true, long)]
    state: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log metadata and block range
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that the log and index agree and spot-check entries
    SmokeTest {
        /// Check every N-th entry (0 picks about eight samples)
        #[arg(short, long, default_value = "0")]
        interval: u32,
    },

    /// Rebuild the index from the log
    MakeIndex,

    /// Recover the longest valid prefix of a damaged log
    Repair {
        /// Stop after this block
        #[arg(short, long)]
        truncate_at: Option<u32>,

        /// Name of a reversible block directory to move into the backup
        #[arg(long)]
        reversible_dir: Option<String>,
    },

    /// Remove every block before a block
    TrimFront {
        /// First block to keep
        #[arg(short, long)]
        block: u32,

        /// Scratch directory, must differ from the blocks directory
        #[arg(short, long)]
        temp_dir: PathBuf,
    },

    /// Remove every block after a block
    TrimEnd {
        /// Last block to keep
        #[arg(short, long)]
        block: u32,
    },

    /// Copy a block range into a new log
    Extract {
        /// First block to copy
        #[arg(long)]
        first: u32,

        /// Last block to copy
        #[arg(long)]
        last: u32,

        /// Output directory
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Split the log into files of a fixed number of blocks
    Split {
        /// Blocks per file
        #[arg(short, long)]
        stride: u32,

        /// Output directory
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Merge contiguous block range files
    Merge {
        /// Output directory
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Convert a pruned log back to a regular one
    Vacuum,

    /// Print the chain id of the logs
    #[command(alias = "extract-chain-id")]
    ChainId {
        /// Directory of rotated log files, relative to the blocks directory
        #[arg(short, long)]
        retained_dir: Option<PathBuf>,
    },

    /// Print the genesis state of the logs
    #[command(alias = "extract-genesis-state")]
    GenesisState {
        /// Directory of rotated log files, relative to the blocks directory
        #[arg(short, long)]
        retained_dir: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let kind = if cli.state {
        RecordKind::BlockState
    } else {
        RecordKind::Blocks
    };
    let path = || cli.path.clone().ok_or("Blocks directory required (--path)");
    // no retained dir means the rotated files sit beside the live log
    let retained = |dir: &Option<PathBuf>| dir.clone().unwrap_or_default();

    match &cli.command {
        Commands::Inspect { format } => {
            commands::inspect::run(&path()?, kind, format)?;
        }
        Commands::SmokeTest { interval } => {
            commands::verify::smoke_test(&path()?, kind, *interval)?;
        }
        Commands::MakeIndex => {
            commands::verify::make_index(&path()?, kind)?;
        }
        Commands::Repair {
            truncate_at,
            reversible_dir,
        } => {
            let path = path()?;
            let reversible = reversible_dir.as_deref();
            if cli.state {
                commands::repair::run::<BlockHeaderState>(&path, *truncate_at, reversible)?;
            } else {
                commands::repair::run::<SignedBlock>(&path, *truncate_at, reversible)?;
            }
        }
        Commands::TrimFront { block, temp_dir } => {
            commands::trim::front(&path()?, temp_dir, kind, *block)?;
        }
        Commands::TrimEnd { block } => {
            commands::trim::end(&path()?, kind, *block)?;
        }
        Commands::Extract { first, last, dest } => {
            commands::extract::range(&path()?, dest, kind, *first, *last)?;
        }
        Commands::Split { stride, dest } => {
            commands::extract::split(&path()?, dest, kind, *stride)?;
        }
        Commands::Merge { dest } => {
            commands::extract::merge(&path()?, dest, kind)?;
        }
        Commands::Vacuum => {
            let path = path()?;
            if cli.state {
                commands::vacuum::run::<BlockHeaderState>(&path)?;
            } else {
                commands::vacuum::run::<SignedBlock>(&path)?;
            }
        }
        Commands::ChainId { retained_dir } => {
            commands::inspect::chain_id(&path()?, &retained(retained_dir), kind)?;
        }
        Commands::GenesisState { retained_dir } => {
            commands::inspect::genesis_state(&path()?, &retained(retained_dir), kind)?;
        }
        Commands::Version => {
            println!("Blocklog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Blocklog Core v{}", blocklog_core::VERSION);
        }
    }

    Ok(())
}
