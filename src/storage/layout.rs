//! Path layout shared by writers and readers
//!
//! Both sides must derive identical paths from the same inputs, so every
//! path is built here.

use std::fmt;
use std::path::{Path, PathBuf};

pub const DATA_FILE_EXTENSION: &str = "data";
pub const INDEX_FILE_EXTENSION: &str = "index";

/// Contiguous range of partitions stored in one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionRange {
    pub start: u32,
    pub end: u32,
}

impl PartitionRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Range holding `partition_id` when `per_range` partitions share a directory
    pub fn for_partition(partition_id: u32, per_range: u32) -> Self {
        let per_range = per_range.max(1);
        let start = partition_id / per_range * per_range;
        Self {
            start,
            end: start + per_range - 1,
        }
    }

    pub fn contains(&self, partition_id: u32) -> bool {
        (self.start..=self.end).contains(&partition_id)
    }

    /// All ranges covering `partition_num` partitions
    pub fn all(partition_num: u32, per_range: u32) -> Vec<Self> {
        let per_range = per_range.max(1);
        (0..partition_num)
            .step_by(per_range as usize)
            .map(|start| Self::for_partition(start, per_range))
            .collect()
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Path builder for one shuffle under one storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleLayout {
    base_path: PathBuf,
    app_id: String,
    shuffle_id: u32,
}

impl ShuffleLayout {
    pub fn new(base_path: impl AsRef<Path>, app_id: &str, shuffle_id: u32) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            app_id: app_id.to_string(),
            shuffle_id,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// `{base}/{app_id}/{shuffle_id}`
    pub fn shuffle_dir(&self) -> PathBuf {
        self.base_path
            .join(&self.app_id)
            .join(self.shuffle_id.to_string())
    }

    /// `{base}/{app_id}/{shuffle_id}/{start}-{end}`
    pub fn partition_dir(&self, range: PartitionRange) -> PathBuf {
        self.shuffle_dir().join(range.to_string())
    }

    /// Data/index pair of one writer shard
    pub fn shard_files(&self, range: PartitionRange, shard_name: &str, file_index: u32) -> ShardFiles {
        let dir = self.partition_dir(range);
        let stem = format!("{}_{}", shard_name, file_index);
        ShardFiles {
            shard_name: shard_name.to_string(),
            file_index,
            data_path: dir.join(format!("{}.{}", stem, DATA_FILE_EXTENSION)),
            index_path: dir.join(format!("{}.{}", stem, INDEX_FILE_EXTENSION)),
        }
    }
}

/// The data/index file pair of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFiles {
    pub shard_name: String,
    pub file_index: u32,
    pub data_path: PathBuf,
    pub index_path: PathBuf,
}

impl ShardFiles {
    /// Recognize a shard from its index file path.
    ///
    /// "writer1_3.index" → shard "writer1", file index 3.
    /// Copies carrying an extra extension ("writer1_3.cp.index") are not shards.
    pub fn from_index_path(path: &Path) -> Option<Self> {
        if path.extension()? != INDEX_FILE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.contains('.') {
            return None;
        }
        let (shard_name, index_str) = stem.rsplit_once('_')?;
        if shard_name.is_empty() {
            return None;
        }
        let file_index = index_str.parse().ok()?;

        Some(Self {
            shard_name: shard_name.to_string(),
            file_index,
            data_path: path.with_extension(DATA_FILE_EXTENSION),
            index_path: path.to_path_buf(),
        })
    }
}
