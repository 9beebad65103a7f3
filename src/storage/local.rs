//! Local filesystem backend

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{AppendHandle, ReadHandle, ShuffleStorage};

/// Storage backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

impl ShuffleStorage for LocalStorage {
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let position = file.metadata()?.len();

        Ok(Box::new(LocalAppendHandle {
            writer: BufWriter::new(file),
            position,
        }))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>> {
        let file = File::open(path)?;
        Ok(Box::new(LocalReadHandle { file }))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        if fs::metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)
    }
}

struct LocalAppendHandle {
    writer: BufWriter<File>,
    position: u64,
}

impl AppendHandle for LocalAppendHandle {
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    fn position(&self) -> u64 {
        self.position
    }
}

struct LocalReadHandle {
    file: File,
}

impl ReadHandle for LocalReadHandle {
    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Bytes> {
        let size = self.file.metadata()?.len();
        let fits = offset
            .checked_add(length as u64)
            .is_some_and(|end| end <= size);
        if !fits {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end of file ({} bytes)", length, offset, size),
            ));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        self.file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}
