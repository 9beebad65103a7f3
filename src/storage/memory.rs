//! In-memory backend
//!
//! Files live in a shared map, so every clone of a `MemoryStorage` sees the
//! same contents. Directories are implicit: a directory exists while at least
//! one file lives below it.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use super::{AppendHandle, ReadHandle, ShuffleStorage};

type FileMap = Arc<RwLock<BTreeMap<PathBuf, Vec<u8>>>>;

/// Storage held entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Copy of a file's contents
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Overwrite a file's contents, e.g. to simulate corruption
    pub fn put(&self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        self.files.write().insert(path.into(), contents);
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl ShuffleStorage for MemoryStorage {
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>> {
        let position = {
            let mut files = self.files.write();
            files.entry(path.to_path_buf()).or_default().len() as u64
        };

        Ok(Box::new(MemoryAppendHandle {
            files: Arc::clone(&self.files),
            path: path.to_path_buf(),
            position,
        }))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>> {
        if !self.files.read().contains_key(path) {
            return Err(not_found(path));
        }
        Ok(Box::new(MemoryReadHandle {
            files: Arc::clone(&self.files),
            path: path.to_path_buf(),
        }))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read();
        if !files.keys().any(|p| p.starts_with(dir)) {
            return Err(not_found(dir));
        }
        Ok(files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.read().keys().any(|p| p.starts_with(path)))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|p, _| !p.starts_with(path));
        if files.len() == before {
            return Err(not_found(path));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.write();
        let contents = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }
}

struct MemoryAppendHandle {
    files: FileMap,
    path: PathBuf,
    position: u64,
}

impl AppendHandle for MemoryAppendHandle {
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut files = self.files.write();
        let file = files.get_mut(&self.path).ok_or_else(|| not_found(&self.path))?;
        file.extend_from_slice(buf);
        self.position = file.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

struct MemoryReadHandle {
    files: FileMap,
    path: PathBuf,
}

impl ReadHandle for MemoryReadHandle {
    fn size(&self) -> io::Result<u64> {
        self.files
            .read()
            .get(&self.path)
            .map(|f| f.len() as u64)
            .ok_or_else(|| not_found(&self.path))
    }

    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Bytes> {
        let files = self.files.read();
        let file = files.get(&self.path).ok_or_else(|| not_found(&self.path))?;

        let start = offset as usize;
        let end = start.checked_add(length).filter(|&end| end <= file.len());
        match end {
            Some(end) => Ok(Bytes::copy_from_slice(&file[start..end])),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} past end of {} ({} bytes)",
                    length,
                    offset,
                    self.path.display(),
                    file.len()
                ),
            )),
        }
    }
}
