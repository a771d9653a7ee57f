//! # Block Log Storage
//!
//! Storage backend trait and implementations for the block log.
//!
//! This crate provides the lowest-level storage abstraction used by the
//! block log engine. Storage backends are **opaque byte stores** - they do
//! not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, positioned write, flush)
//! - No knowledge of preambles, log entries or index files
//! - Must be `Send + Sync` for concurrent access
//! - Sparse-file hole punching is an optional capability; backends that
//!   cannot deallocate report it and keep the bytes intact
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use blocklog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
