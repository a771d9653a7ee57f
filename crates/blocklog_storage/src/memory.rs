//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests of the codecs and log views
/// - Scratch buffers that never need to reach disk
///
/// Hole punching is emulated by zero-filling the range, so code paths that
/// depend on sparse files behave the same as on a supporting filesystem.
///
/// # Example
///
/// ```rust
/// use blocklog_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for decoding hand-built log images.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn punch_hole(&mut self, start: u64, end: u64) -> StorageResult<bool> {
        if start > end {
            return Err(StorageError::InvalidRange { start, end });
        }
        let mut data = self.data.write();
        let len = data.len() as u64;
        let (start, end) = (start.min(len) as usize, end.min(len) as usize);
        data[start..end].fill(0);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let mut backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn memory_read_at_extending_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_empty_read() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn memory_write_at_grows_with_zeros() {
        let mut backend = InMemoryBackend::with_data(b"ab".to_vec());
        backend.write_at(4, b"cd").unwrap();
        assert_eq!(backend.data(), b"ab\0\0cd");
    }

    #[test]
    fn memory_write_at_overwrites() {
        let mut backend = InMemoryBackend::with_data(b"hello".to_vec());
        backend.write_at(1, b"EL").unwrap();
        assert_eq!(backend.data(), b"hELlo");
    }

    #[test]
    fn memory_truncate_partial() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.read_at(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn memory_truncate_to_larger_size_fails() {
        let mut backend = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn memory_punch_hole_zero_fills() {
        let mut backend = InMemoryBackend::with_data(vec![7u8; 10]);
        assert!(backend.punch_hole(2, 6).unwrap());
        assert_eq!(backend.data(), vec![7, 7, 0, 0, 0, 0, 7, 7, 7, 7]);
        assert_eq!(backend.size().unwrap(), 10);
    }

    #[test]
    fn memory_punch_hole_rejects_reversed_range() {
        let mut backend = InMemoryBackend::with_data(vec![1u8; 4]);
        assert!(backend.punch_hole(3, 1).is_err());
    }

    proptest! {
        #[test]
        fn memory_write_at_reads_back(
            initial in prop::collection::vec(any::<u8>(), 0..64),
            offset in 0u64..96,
            data in prop::collection::vec(any::<u8>(), 1..64),
        ) {
            let mut backend = InMemoryBackend::with_data(initial.clone());
            backend.write_at(offset, &data).unwrap();

            let end = offset + data.len() as u64;
            prop_assert_eq!(backend.size().unwrap(), end.max(initial.len() as u64));
            prop_assert_eq!(backend.read_at(offset, data.len()).unwrap(), data);
            let keep = (offset as usize).min(initial.len());
            prop_assert_eq!(backend.read_at(0, keep).unwrap(), initial[..keep].to_vec());
        }
    }
}
