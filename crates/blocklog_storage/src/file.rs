//! File-based storage backend for block log and index files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log or index file on disk.
///
/// The logical size is cached so appends and bounds checks never stat the
/// file. `flush()` hands buffered bytes to the OS; `sync()` waits for them to
/// reach the disk.
///
/// # Sparse Files
///
/// On Linux, `punch_hole()` deallocates ranges with
/// `fallocate(FALLOC_FL_PUNCH_HOLE | FALLOC_FL_KEEP_SIZE)`. Filesystems
/// without hole support, and every other platform, report the capability
/// as missing and leave the bytes in place.
///
/// # Example
///
/// ```no_run
/// use blocklog_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("blocks.log")).unwrap();
/// let pos = log.append(b"entry").unwrap();
/// log.append(&pos.to_le_bytes()).unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    read_only: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and writing.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(path, file, false)
    }

    /// Opens an existing file for reading only.
    ///
    /// Every mutating operation on the returned backend fails with
    /// [`StorageError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, true)
    }

    /// Creates the file, discarding any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create_truncated(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::from_file(path, file, false)
    }

    fn from_file(path: &Path, file: File, read_only: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            read_only,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_writable()?;
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn punch_hole(&mut self, start: u64, end: u64) -> StorageResult<bool> {
        self.ensure_writable()?;
        if start > end {
            return Err(StorageError::InvalidRange { start, end });
        }
        if start == end {
            return Ok(true);
        }

        let file = self.file.write();
        punch_hole_in(&file, start, end - start)
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn punch_hole_in(file: &File, offset: u64, len: u64) -> StorageResult<bool> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let mode = libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE;
    // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of the call.
    let res = unsafe { libc::fallocate(fd, mode, offset as libc::off_t, len as libc::off_t) };
    if res == 0 {
        return Ok(true);
    }
    unpunched(std::io::Error::last_os_error(), offset, len)
}

/// Maps a failed `fallocate` to "no hole support" or a real error.
#[cfg(target_os = "linux")]
fn unpunched(err: std::io::Error, offset: u64, len: u64) -> StorageResult<bool> {
    match err.raw_os_error() {
        Some(code) if code == libc::EOPNOTSUPP || code == libc::ENOSYS => {
            tracing::debug!(offset, len, "filesystem does not support hole punching");
            Ok(false)
        }
        _ => Err(err.into()),
    }
}

#[cfg(not(target_os = "linux"))]
fn punch_hole_in(_file: &File, offset: u64, len: u64) -> StorageResult<bool> {
    tracing::debug!(offset, len, "hole punching is not available on this platform");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: u64 = 4096;

    /// Appends `entry` followed by its position, the way log entries are framed.
    fn append_entry(log: &mut FileBackend, entry: &[u8]) -> u64 {
        let pos = log.append(entry).unwrap();
        log.append(&pos.to_le_bytes()).unwrap();
        pos
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");

        let positions: Vec<u64> = {
            let mut log = FileBackend::open(&path).unwrap();
            let entries: [&[u8]; 3] = [b"first", b"second", b"third"];
            let positions: Vec<u64> = entries
                .iter()
                .map(|entry| append_entry(&mut log, entry))
                .collect();
            log.sync().unwrap();
            positions
        };
        assert_eq!(positions, vec![0, 13, 27]);

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 40);
        assert_eq!(log.read_at(32, 8).unwrap(), 27u64.to_le_bytes());
        assert_eq!(log.read_at(27, 5).unwrap(), b"third");
    }

    #[test]
    fn reading_a_torn_trailer_fails() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("blocks.log")).unwrap();
        log.append(b"entry").unwrap();
        log.append(&[0, 0, 0]).unwrap();

        assert!(matches!(
            log.read_at(4, 8),
            Err(StorageError::ReadPastEnd { offset: 4, len: 8, size: 8 })
        ));
    }

    #[test]
    fn version_word_is_rewritten_in_place() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("blocks.log")).unwrap();
        log.append(&0u32.to_le_bytes()).unwrap();
        log.append(&[0xFF; 8]).unwrap();

        log.write_at(0, &(3u32 | 1 << 31).to_le_bytes()).unwrap();
        assert_eq!(log.size().unwrap(), 12);
        assert_eq!(log.read_at(0, 4).unwrap(), (3u32 | 1 << 31).to_le_bytes());

        // appends still land after the last byte
        assert_eq!(log.append(b"x").unwrap(), 12);
    }

    #[test]
    fn index_slots_written_backward_extend_the_file() {
        let dir = tempdir().unwrap();
        let mut index = FileBackend::create_truncated(&dir.path().join("blocks.index")).unwrap();

        for (slot, pos) in [(2u64, 300u64), (1, 200), (0, 100)] {
            index.write_at(slot * 8, &pos.to_le_bytes()).unwrap();
            assert_eq!(index.size().unwrap(), 24);
        }
        assert_eq!(index.read_at(8, 8).unwrap(), 200u64.to_le_bytes());
    }

    #[test]
    fn trailer_is_dropped_by_truncate() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("blocks.log")).unwrap();
        append_entry(&mut log, b"entry");
        log.append(&1u32.to_le_bytes()).unwrap();

        log.truncate(13).unwrap();
        assert_eq!(log.size().unwrap(), 13);
        assert!(matches!(
            log.truncate(14),
            Err(StorageError::TruncateBeyondEnd { requested: 14, size: 13 })
        ));
    }

    #[test]
    fn create_truncated_then_copy_chunks() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("blocks.log");
        let dest_path = dir.path().join("blocks-3-5.log");

        let mut src = FileBackend::open(&src_path).unwrap();
        let body: Vec<u8> = (0..3 * PAGE).map(|i| (i % 251) as u8).collect();
        src.append(&body).unwrap();
        std::fs::write(&dest_path, b"stale content").unwrap();

        let mut dest = FileBackend::create_truncated(&dest_path).unwrap();
        assert_eq!(dest.size().unwrap(), 0);
        let (start, end) = (100, 2 * PAGE + 17);
        let mut pos = start;
        while pos < end {
            let n = (end - pos).min(PAGE);
            dest.append(&src.read_at(pos, n as usize).unwrap()).unwrap();
            pos += n;
        }
        dest.flush().unwrap();

        assert_eq!(
            std::fs::read(&dest_path).unwrap(),
            &body[start as usize..end as usize]
        );
    }

    #[test]
    fn read_only_log_rejects_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");
        append_entry(&mut FileBackend::open(&path).unwrap(), b"entry");

        let mut log = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(log.read_at(0, 5).unwrap(), b"entry");
        assert!(matches!(log.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(log.write_at(0, b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(log.punch_hole(0, 4), Err(StorageError::ReadOnly)));
        assert!(matches!(log.truncate(0), Err(StorageError::ReadOnly)));
    }

    #[test]
    fn punched_range_reads_as_zeros_and_keeps_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");
        let mut log = FileBackend::open(&path).unwrap();
        log.append(&vec![0xAB; (16 * PAGE) as usize]).unwrap();
        log.sync().unwrap();

        let punched = log.punch_hole(PAGE, 12 * PAGE).unwrap();
        assert_eq!(log.size().unwrap(), 16 * PAGE);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16 * PAGE);

        let data = log.read_at(0, (16 * PAGE) as usize).unwrap();
        assert!(data[..PAGE as usize].iter().all(|&b| b == 0xAB));
        assert!(data[(12 * PAGE) as usize..].iter().all(|&b| b == 0xAB));
        if punched {
            assert!(data[PAGE as usize..(12 * PAGE) as usize].iter().all(|&b| b == 0));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn punched_file_becomes_sparse() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");
        let mut log = FileBackend::open(&path).unwrap();
        log.append(&vec![0x5A; (64 * PAGE) as usize]).unwrap();
        log.sync().unwrap();
        let allocated = std::fs::metadata(&path).unwrap().blocks();

        if log.punch_hole(PAGE, 60 * PAGE).unwrap() {
            log.sync().unwrap();
            assert!(std::fs::metadata(&path).unwrap().blocks() < allocated);
        }
    }

    #[test]
    fn empty_and_reversed_ranges() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("blocks.log")).unwrap();
        log.append(b"entry").unwrap();

        assert!(log.punch_hole(3, 3).unwrap());
        assert!(matches!(
            log.punch_hole(4, 2),
            Err(StorageError::InvalidRange { start: 4, end: 2 })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unsupported_hole_punching_is_not_an_error() {
        for code in [libc::EOPNOTSUPP, libc::ENOSYS] {
            let err = std::io::Error::from_raw_os_error(code);
            assert!(!unpunched(err, 0, PAGE).unwrap());
        }
        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert!(matches!(unpunched(err, 0, PAGE), Err(StorageError::Io(_))));
    }
}
