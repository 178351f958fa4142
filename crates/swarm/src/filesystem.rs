//! The injected disk I/O capability. Deliberately synchronous (positioned
//! reads/writes, no async file handles) so pieces can be read/written
//! straight from a peer's socket buffer via `spawn_blocking`, without an
//! extra copy through an async runtime's internal buffers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("I/O error on file id {file_id}: {source}")]
    Io {
        file_id: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown file id {0}")]
    UnknownFileId(usize),
    #[error("chunk spans outside the torrent's total length")]
    OutOfBounds,
    #[error("file path '{0}' escapes the download root")]
    UnsafePath(String),
}

/// Positioned read/write against a set of files, addressed by an opaque
/// `file_id` the caller assigns (the disk manager maps piece-space offsets
/// to `(file_id, offset)` pairs before calling through here).
pub trait Filesystem: Send + Sync {
    fn ensure_file_length(&self, file_id: usize, path: &Path, length: u64) -> Result<(), DiskError>;
    fn read_exact(&self, file_id: usize, offset: u64, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write_all(&self, file_id: usize, offset: u64, buf: &[u8]) -> Result<(), DiskError>;
}

/// Real filesystem backend: one `std::fs::File` per `file_id`, each behind
/// its own mutex so concurrent writes to different files never block each
/// other.
#[derive(Default)]
pub struct RealFilesystem {
    files: Mutex<HashMap<usize, Mutex<File>>>,
}

impl RealFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_file<T>(&self, file_id: usize, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T, DiskError> {
        let files = self.files.lock();
        let file_mutex = files.get(&file_id).ok_or(DiskError::UnknownFileId(file_id))?;
        let mut file = file_mutex.lock();
        f(&mut file).map_err(|source| DiskError::Io { file_id, source })
    }
}

impl Filesystem for RealFilesystem {
    fn ensure_file_length(&self, file_id: usize, path: &Path, length: u64) -> Result<(), DiskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DiskError::Io { file_id, source })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| DiskError::Io { file_id, source })?;
        file.set_len(length).map_err(|source| DiskError::Io { file_id, source })?;
        self.files.lock().insert(file_id, Mutex::new(file));
        Ok(())
    }

    fn read_exact(&self, file_id: usize, offset: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        self.with_file(file_id, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        })
    }

    fn write_all(&self, file_id: usize, offset: u64, buf: &[u8]) -> Result<(), DiskError> {
        self.with_file(file_id, |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        })
    }
}

/// In-memory backend for tests: each file is a growable `Vec<u8>`.
#[derive(Default)]
pub struct InMemoryFilesystem {
    files: Mutex<HashMap<usize, Vec<u8>>>,
}

impl InMemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_contents(&self, file_id: usize) -> Option<Vec<u8>> {
        self.files.lock().get(&file_id).cloned()
    }
}

impl Filesystem for InMemoryFilesystem {
    fn ensure_file_length(&self, file_id: usize, _path: &Path, length: u64) -> Result<(), DiskError> {
        self.files
            .lock()
            .entry(file_id)
            .or_default()
            .resize(length as usize, 0);
        Ok(())
    }

    fn read_exact(&self, file_id: usize, offset: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        let files = self.files.lock();
        let data = files.get(&file_id).ok_or(DiskError::UnknownFileId(file_id))?;
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(DiskError::OutOfBounds)?;
        let slice = data.get(start..end).ok_or(DiskError::OutOfBounds)?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    fn write_all(&self, file_id: usize, offset: u64, buf: &[u8]) -> Result<(), DiskError> {
        let mut files = self.files.lock();
        let data = files.get_mut(&file_id).ok_or(DiskError::UnknownFileId(file_id))?;
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(DiskError::OutOfBounds)?;
        if end > data.len() {
            return Err(DiskError::OutOfBounds);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// Helper used by the disk manager to turn an `info.files` entry into a
/// concrete on-disk path under a download directory. Rejects any relative
/// path with a `..`, absolute, or prefix component — `metainfo::parse`
/// already screens these out, but a scoped-root write path shouldn't rely
/// on a single check upstream.
pub fn resolve_path(download_dir: &Path, relative: &Path) -> Result<PathBuf, DiskError> {
    use std::path::Component;

    for component in relative.components() {
        if matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_)) {
            return Err(DiskError::UnsafePath(relative.display().to_string()));
        }
    }
    Ok(download_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_write_then_read() {
        let fs = InMemoryFilesystem::new();
        fs.ensure_file_length(0, Path::new("a"), 10).unwrap();
        fs.write_all(0, 2, b"hello").unwrap();
        let mut buf = [0u8; 5];
        fs.read_exact(0, 2, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn out_of_bounds_read_is_an_error() {
        let fs = InMemoryFilesystem::new();
        fs.ensure_file_length(0, Path::new("a"), 4).unwrap();
        let mut buf = [0u8; 5];
        assert!(matches!(fs.read_exact(0, 0, &mut buf), Err(DiskError::OutOfBounds)));
    }

    #[test]
    fn unknown_file_id_is_an_error() {
        let fs = InMemoryFilesystem::new();
        let mut buf = [0u8; 1];
        assert!(matches!(fs.read_exact(5, 0, &mut buf), Err(DiskError::UnknownFileId(5))));
    }
}
