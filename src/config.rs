//! Configuration for shufflestore
//!
//! Centralized read/write configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ShuffleError};
use crate::retry::RetryPolicy;
use crate::storage::{PartitionRange, ShuffleLayout};

// =============================================================================
// Read Configuration
// =============================================================================

/// Configuration for reading one partition
#[derive(Debug, Clone)]
pub struct ReadConfig {
    // -------------------------------------------------------------------------
    // Location
    // -------------------------------------------------------------------------
    /// Storage roots to read from. Every root holding the partition
    /// directory contributes its shards; roots after the first act as replicas.
    /// Internal structure:
    ///   {base_path}/{app_id}/{shuffle_id}/{start}-{end}/
    ///     ├── {shard}_{n}.data
    ///     └── {shard}_{n}.index
    pub base_paths: Vec<PathBuf>,

    pub app_id: String,

    pub shuffle_id: u32,

    // -------------------------------------------------------------------------
    // Partitioning
    // -------------------------------------------------------------------------
    /// Partition to reconstruct
    pub partition_id: u32,

    /// Partitions grouped into one directory by the writers
    pub partition_num_per_range: u32,

    /// Total number of partitions of the shuffle
    pub partition_num: u32,

    // -------------------------------------------------------------------------
    // Read Tuning
    // -------------------------------------------------------------------------
    /// Max index entries materialized per read call
    pub index_read_limit: usize,

    /// Payload bytes after which a batched read is closed
    pub read_buffer_size: usize,

    /// Retry policy for transient storage errors
    pub retry: RetryPolicy,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            base_paths: vec![PathBuf::from("./shuffle_data")],
            app_id: String::new(),
            shuffle_id: 0,
            partition_id: 0,
            partition_num_per_range: 1,
            partition_num: 1,
            index_read_limit: 1000,
            read_buffer_size: 32 * 1024 * 1024, // 32 MB
            retry: RetryPolicy::default(),
        }
    }
}

impl ReadConfig {
    /// Create a new config builder
    pub fn builder() -> ReadConfigBuilder {
        ReadConfigBuilder::default()
    }

    /// Reject settings that would make reads meaningless
    pub fn validate(&self) -> Result<()> {
        if self.base_paths.is_empty() {
            return Err(ShuffleError::Config("at least one base path is required".into()));
        }
        if self.partition_num_per_range == 0 {
            return Err(ShuffleError::Config("partition_num_per_range must be > 0".into()));
        }
        if self.partition_id >= self.partition_num {
            return Err(ShuffleError::Config(format!(
                "partition_id {} out of range for {} partitions",
                self.partition_id, self.partition_num
            )));
        }
        if self.index_read_limit == 0 {
            return Err(ShuffleError::Config("index_read_limit must be > 0".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(ShuffleError::Config("read_buffer_size must be > 0".into()));
        }
        Ok(())
    }

    /// Directory range holding this partition
    pub fn partition_range(&self) -> PartitionRange {
        PartitionRange::for_partition(self.partition_id, self.partition_num_per_range)
    }

    /// One layout per configured base path
    pub fn layouts(&self) -> Vec<ShuffleLayout> {
        self.base_paths
            .iter()
            .map(|base| ShuffleLayout::new(base, &self.app_id, self.shuffle_id))
            .collect()
    }
}

/// Builder for ReadConfig
#[derive(Default)]
pub struct ReadConfigBuilder {
    config: ReadConfig,
}

impl ReadConfigBuilder {
    /// Read from a single storage root
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_paths = vec![path.into()];
        self
    }

    /// Read from several storage roots (replicas)
    pub fn base_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.base_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self
    }

    pub fn shuffle_id(mut self, id: u32) -> Self {
        self.config.shuffle_id = id;
        self
    }

    pub fn partition_id(mut self, id: u32) -> Self {
        self.config.partition_id = id;
        self
    }

    pub fn partition_num_per_range(mut self, count: u32) -> Self {
        self.config.partition_num_per_range = count;
        self
    }

    pub fn partition_num(mut self, count: u32) -> Self {
        self.config.partition_num = count;
        self
    }

    /// Set the max number of index entries per read call
    pub fn index_read_limit(mut self, limit: usize) -> Self {
        self.config.index_read_limit = limit;
        self
    }

    /// Set the read buffer threshold (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the number of retries for transient storage errors
    pub fn retry_max(mut self, retries: usize) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set the base interval between retries (in milliseconds)
    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry.initial_backoff = Duration::from_millis(ms);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn build(self) -> ReadConfig {
        self.config
    }
}

// =============================================================================
// Write Configuration
// =============================================================================

/// Configuration for a shard writer
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Storage root the writer appends under
    pub base_path: PathBuf,

    pub app_id: String,

    pub shuffle_id: u32,

    /// Sync strategy: whether each batch is fsynced
    pub sync_strategy: WriteSyncStrategy,
}

/// Writer sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSyncStrategy {
    /// fsync data and index after every batch (safest, slowest)
    EveryBatch,

    /// flush to the OS and let it decide when to persist
    OsBuffered,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./shuffle_data"),
            app_id: String::new(),
            shuffle_id: 0,
            sync_strategy: WriteSyncStrategy::EveryBatch,
        }
    }
}

impl WriteConfig {
    /// Create a new config builder
    pub fn builder() -> WriteConfigBuilder {
        WriteConfigBuilder::default()
    }

    pub fn layout(&self) -> ShuffleLayout {
        ShuffleLayout::new(&self.base_path, &self.app_id, self.shuffle_id)
    }
}

/// Builder for WriteConfig
#[derive(Default)]
pub struct WriteConfigBuilder {
    config: WriteConfig,
}

impl WriteConfigBuilder {
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_path = path.into();
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self
    }

    pub fn shuffle_id(mut self, id: u32) -> Self {
        self.config.shuffle_id = id;
        self
    }

    pub fn sync_strategy(mut self, strategy: WriteSyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn build(self) -> WriteConfig {
        self.config
    }
}
