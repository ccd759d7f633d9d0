//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-backed append-only log.
///
/// The file is locked exclusively for the lifetime of the backend so two
/// processes can never replay and append to the same node's log.
///
/// # Example
///
/// ```no_run
/// use tidesync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("node.log")).unwrap();
/// backend.append(b"commit").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBackend {
    /// Opens or creates the log file and takes an exclusive lock on it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Opens the log, creating parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.lock();
        let size = file.metadata()?.len();
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&*self.file.lock());
    }
}
