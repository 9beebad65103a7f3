//! Partition Read Handler
//!
//! Presents every shard of a partition range, across every storage root,
//! as one continuous segment index space.
//!
//! ## Responsibilities
//! - Discover shards under each configured base path
//! - Skip shards that are absent or are copies
//! - Map a global segment index to (shard, local index), moving forward only

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ReadConfig;
use crate::error::{Result, ShuffleError};
use crate::retry::retry_with_backoff;
use crate::storage::{ShardFiles, ShuffleStorage, INDEX_FILE_EXTENSION};

use super::{ShardReadHandler, ShuffleDataResult};

/// Reads all shards of one partition range in order
pub struct PartitionReadHandler {
    handlers: Vec<ShardReadHandler>,
    /// Segment count of each handler
    segment_counts: Vec<usize>,
    /// Handler currently being read; never moves backward
    read_handler_index: usize,
    /// Global index of the current handler's first segment
    base_segment: usize,
}

impl PartitionReadHandler {
    /// Discover and open every shard for the configured partition
    ///
    /// A base path without the partition directory contributes nothing.
    pub fn open(config: &ReadConfig, storage: Arc<dyn ShuffleStorage>) -> Result<Self> {
        config.validate()?;
        let range = config.partition_range();
        let mut handlers = Vec::new();

        for layout in config.layouts() {
            let dir = layout.partition_dir(range);
            let listing = match retry_with_backoff(&config.retry, "list partition dir", || {
                storage.list(&dir)
            }) {
                Ok(listing) => listing,
                Err(e) if e.is_not_found() => {
                    debug!(dir = %dir.display(), "No shuffle data under base path");
                    continue;
                }
                Err(e) => return Err(e.into_shuffle_error(format!("list {}", dir.display()))),
            };

            for path in listing {
                let Some(files) = ShardFiles::from_index_path(&path) else {
                    if path.extension().is_some_and(|ext| ext == INDEX_FILE_EXTENSION) {
                        debug!(index = %path.display(), "Skipping copied index file");
                    }
                    continue;
                };

                let handler = ShardReadHandler::open(
                    Arc::clone(&storage),
                    files,
                    config.index_read_limit,
                    config.read_buffer_size,
                    config.retry.clone(),
                )?;
                handlers.extend(handler);
            }
        }

        let handler = Self::from_handlers(handlers);
        info!(
            app_id = %config.app_id,
            shuffle_id = config.shuffle_id,
            partition_id = config.partition_id,
            range = %range,
            shards = handler.shard_count(),
            segments = handler.total_segments(),
            "Opened partition for reading"
        );
        Ok(handler)
    }

    /// Build from already opened shard handlers, read in the given order
    pub fn from_handlers(handlers: Vec<ShardReadHandler>) -> Self {
        let segment_counts = handlers.iter().map(ShardReadHandler::segment_count).collect();
        Self {
            handlers,
            segment_counts,
            read_handler_index: 0,
            base_segment: 0,
        }
    }

    /// A handler with no shards
    pub fn empty() -> Self {
        Self::from_handlers(Vec::new())
    }

    /// Read global segment `segment_index`; `Ok(None)` once every shard is exhausted
    pub fn read_shuffle_data(&mut self, segment_index: usize) -> Result<Option<ShuffleDataResult>> {
        if segment_index < self.base_segment {
            return Err(ShuffleError::SegmentOutOfOrder {
                requested: segment_index,
                current: self.base_segment,
            });
        }

        while self.read_handler_index < self.handlers.len() {
            let local_index = segment_index - self.base_segment;
            let count = self.segment_counts[self.read_handler_index];
            if local_index < count {
                return self.handlers[self.read_handler_index].read_shuffle_data(local_index);
            }

            // Shard exhausted: release it and move on
            let handler = &mut self.handlers[self.read_handler_index];
            debug!(
                shard = %handler.files().shard_name,
                file_index = handler.files().file_index,
                segments = count,
                "Shard exhausted"
            );
            handler.close();
            self.base_segment += count;
            self.read_handler_index += 1;
        }

        Ok(None)
    }

    /// Release every open data file
    pub fn close(&mut self) {
        for handler in &mut self.handlers {
            handler.close();
        }
    }

    /// Index of the shard currently being read
    pub fn read_handler_index(&self) -> usize {
        self.read_handler_index
    }

    /// Segment count of each shard, in read order
    pub fn segment_counts(&self) -> &[usize] {
        &self.segment_counts
    }

    pub fn total_segments(&self) -> usize {
        self.segment_counts.iter().sum()
    }

    pub fn shard_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn handlers(&self) -> &[ShardReadHandler] {
        &self.handlers
    }
}
