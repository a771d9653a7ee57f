//! Error types for the block log engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in block log operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] blocklog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log or index file does not have the expected structure.
    #[error("invalid block log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The preamble declares a format version this build cannot read.
    #[error("unsupported block log version {version}, supported versions are [{min}, {max}]")]
    UnsupportedVersion {
        /// Version found in the file (pruned flag masked off).
        version: u32,
        /// Lowest supported version.
        min: u32,
        /// Highest supported version.
        max: u32,
    },

    /// An append was refused because log and index disagree.
    #[error("append failed: {message}")]
    AppendFailed {
        /// Description of the failure.
        message: String,
    },

    /// Data read back from the log contradicts what the index or the entry itself promises.
    #[error("block log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// A log entry could not be deserialized.
    #[error("undecodable entry at position {position}: {message}")]
    UndecodableEntry {
        /// File offset of the entry.
        position: u64,
        /// Underlying decode failure.
        message: String,
    },

    /// A standalone value could not be deserialized.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// A required log directory or file is missing.
    #[error("block log not found in '{}'", path.display())]
    NotFound {
        /// The path that was searched.
        path: PathBuf,
    },

    /// The repair backup directory already exists.
    #[error("cannot move existing blocks directory to already existing directory '{}'", path.display())]
    BackupDirExists {
        /// The backup directory.
        path: PathBuf,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an append failure error.
    pub fn append_failed(message: impl Into<String>) -> Self {
        Self::AppendFailed {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a not found error for `path`.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }
}
