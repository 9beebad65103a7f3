//! Storage Module
//!
//! The capability set the shuffle engine needs from a storage tier.
//!
//! ## Responsibilities
//! - Append-only writes to data and index files
//! - Ranged reads of immutable, already-written files
//! - Listing, existence checks, deletion and renames
//!
//! The engine is generic over [`ShuffleStorage`] and never special-cases a
//! backend. Two backends ship with the crate:
//! - [`LocalStorage`]: plain files through `std::fs`
//! - [`MemoryStorage`]: in-process map, for embedding and tests
//!
//! ## Layout
//! ```text
//! {base_path}/
//!   └── {app_id}/
//!       └── {shuffle_id}/
//!           └── {start}-{end}/          (one partition range)
//!               ├── {shard}_{n}.data    (concatenated block payloads)
//!               └── {shard}_{n}.index   (one fixed-size entry per block)
//! ```

mod layout;
mod local;
mod memory;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

pub use layout::{PartitionRange, ShardFiles, ShuffleLayout, DATA_FILE_EXTENSION, INDEX_FILE_EXTENSION};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Storage capability interface consumed by writers and readers
pub trait ShuffleStorage: Send + Sync + fmt::Debug {
    /// Open a file for appending, creating it (and parent directories) if needed
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>>;

    /// Open an existing file for ranged reads
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>>;

    /// List the files directly inside `dir`, sorted by path.
    /// A missing directory is `NotFound`.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Delete a file, or a directory and everything below it
    fn delete(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Append-only handle to one file
pub trait AppendHandle: Send {
    fn append(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push buffered bytes to the storage tier
    fn flush(&mut self) -> io::Result<()>;

    /// Flush and wait until the bytes are durable
    fn sync(&mut self) -> io::Result<()>;

    /// File length including everything appended through this handle
    fn position(&self) -> u64;
}

/// Read handle to one immutable file
pub trait ReadHandle: Send {
    fn size(&self) -> io::Result<u64>;

    /// Read exactly `length` bytes starting at `offset`.
    /// A short file is `UnexpectedEof`.
    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Bytes>;
}

impl std::fmt::Debug for dyn ReadHandle + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle").finish_non_exhaustive()
    }
}
