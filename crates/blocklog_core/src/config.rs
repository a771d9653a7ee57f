//! Block log configuration.

use crate::preamble::MAX_SUPPORTED_VERSION;
use std::path::PathBuf;

/// Storage strategy of a block log, fixed when the log is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogMode {
    /// A single log and index pair that grows forever.
    #[default]
    Basic,
    /// Nothing is written to disk; only the head is tracked in memory.
    Empty,
    /// The live log is rotated into archive files every `stride` blocks.
    Partitioned(PartitionedConfig),
    /// Only the most recent blocks are kept; older ones are punched out.
    Pruned(PruneConfig),
}

/// Rotation settings for [`LogMode::Partitioned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedConfig {
    /// Directory holding rotated files. Empty means the log directory;
    /// relative paths resolve against the log directory.
    pub retained_dir: PathBuf,
    /// Directory evicted files move to. Empty means evicted files are deleted.
    pub archive_dir: PathBuf,
    /// Number of blocks per rotated file.
    pub stride: u32,
    /// How many rotated files stay in `retained_dir`.
    pub max_retained_files: u32,
}

impl Default for PartitionedConfig {
    fn default() -> Self {
        Self {
            retained_dir: PathBuf::new(),
            archive_dir: PathBuf::from("archive"),
            stride: u32::MAX,
            max_retained_files: u32::MAX,
        }
    }
}

impl PartitionedConfig {
    /// Creates a configuration rotating every `stride` blocks.
    #[must_use]
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            ..Self::default()
        }
    }

    /// Sets the retained directory.
    #[must_use]
    pub fn retained_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.retained_dir = dir.into();
        self
    }

    /// Sets the archive directory.
    #[must_use]
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    /// Sets the number of retained files.
    #[must_use]
    pub const fn max_retained_files(mut self, count: u32) -> Self {
        self.max_retained_files = count;
        self
    }
}

/// Retention settings for [`LogMode::Pruned`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneConfig {
    /// Number of most recent blocks to keep readable.
    pub prune_blocks: u32,
    /// Pruning runs each time the log end crosses a multiple of this many
    /// bytes. Must be a power of two.
    pub prune_threshold: u32,
    /// When non-zero, the log is vacuumed on close if it holds fewer than
    /// this many bytes of block data.
    pub vacuum_on_close: u64,
}

impl PruneConfig {
    /// Default pruning threshold.
    pub const DEFAULT_PRUNE_THRESHOLD: u32 = 4 * 1024 * 1024;

    /// Creates a configuration keeping the last `prune_blocks` blocks.
    #[must_use]
    pub const fn new(prune_blocks: u32) -> Self {
        Self {
            prune_blocks,
            prune_threshold: Self::DEFAULT_PRUNE_THRESHOLD,
            vacuum_on_close: 0,
        }
    }

    /// Sets the pruning threshold.
    #[must_use]
    pub const fn prune_threshold(mut self, bytes: u32) -> Self {
        self.prune_threshold = bytes;
        self
    }

    /// Sets the vacuum-on-close size limit.
    #[must_use]
    pub const fn vacuum_on_close(mut self, bytes: u64) -> Self {
        self.vacuum_on_close = bytes;
        self
    }
}

/// Configuration for opening a block log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Storage strategy.
    pub mode: LogMode,
    /// Format version written when the log is reset from a genesis state.
    pub initial_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: LogMode::Basic,
            initial_version: MAX_SUPPORTED_VERSION,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage strategy.
    #[must_use]
    pub fn mode(mut self, mode: LogMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the version used for genesis resets.
    #[must_use]
    pub const fn initial_version(mut self, version: u32) -> Self {
        self.initial_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.mode, LogMode::Basic);
        assert_eq!(config.initial_version, 3);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .initial_version(2)
            .mode(LogMode::Pruned(PruneConfig::new(10).prune_threshold(64)));

        assert_eq!(config.initial_version, 2);
        match config.mode {
            LogMode::Pruned(prune) => {
                assert_eq!(prune.prune_blocks, 10);
                assert_eq!(prune.prune_threshold, 64);
                assert_eq!(prune.vacuum_on_close, 0);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn partitioned_defaults() {
        let cfg = PartitionedConfig::new(1000).max_retained_files(2);
        assert_eq!(cfg.stride, 1000);
        assert_eq!(cfg.max_retained_files, 2);
        assert!(cfg.retained_dir.as_os_str().is_empty());
        assert_eq!(cfg.archive_dir, PathBuf::from("archive"));
    }
}
