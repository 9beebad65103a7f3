//! Shuffle Write Handler
//!
//! Appends block payloads to a shard's data file and one index entry per
//! block to its index file.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{WriteConfig, WriteSyncStrategy};
use crate::error::{Result, ShuffleError};
use crate::storage::{AppendHandle, PartitionRange, ShardFiles, ShuffleLayout, ShuffleStorage};

use super::{IndexEntry, ShufflePartitionedBlock, INDEX_ENTRY_SIZE};

/// Writer for one (shuffle, partition range, shard) unit
///
/// Files are `{shard}_{file_index}.data` / `.index`. After a failed batch
/// the current pair is abandoned and the next batch starts a fresh pair, so
/// nothing is ever appended behind a partial write.
pub struct ShuffleWriteHandler {
    storage: Arc<dyn ShuffleStorage>,
    layout: ShuffleLayout,
    range: PartitionRange,
    shard_name: String,
    sync_strategy: WriteSyncStrategy,
    /// Index of the file pair currently written
    file_index: u32,
    /// Open handles for the current pair (opened lazily)
    open: Option<OpenShard>,
    /// Blocks written successfully through this handler
    blocks_written: u64,
}

struct OpenShard {
    files: ShardFiles,
    data: Box<dyn AppendHandle>,
    index: Box<dyn AppendHandle>,
}

impl ShuffleWriteHandler {
    /// Create a writer for `shard_name` inside `range`
    ///
    /// Shard names must be non-empty and may not contain '.' or path
    /// separators, since readers recognize shards by file name.
    pub fn new(
        config: &WriteConfig,
        storage: Arc<dyn ShuffleStorage>,
        range: PartitionRange,
        shard_name: &str,
    ) -> Result<Self> {
        if shard_name.is_empty() || shard_name.contains(['.', '/', '\\']) {
            return Err(ShuffleError::Config(format!(
                "invalid shard name {:?}",
                shard_name
            )));
        }

        Ok(Self {
            storage,
            layout: config.layout(),
            range,
            shard_name: shard_name.to_string(),
            sync_strategy: config.sync_strategy,
            file_index: 0,
            open: None,
            blocks_written: 0,
        })
    }

    /// Append a batch of blocks
    ///
    /// On success every block is present in both files. On failure bytes
    /// already flushed stay where they are and the handler moves on to the
    /// next file pair.
    pub fn write(&mut self, blocks: &[ShufflePartitionedBlock]) -> Result<()> {
        for block in blocks {
            block.validate()?;
        }

        match self.write_batch(blocks) {
            Ok(()) => {
                self.blocks_written += blocks.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!(
                    shard = %self.shard_name,
                    file_index = self.file_index,
                    error = %e,
                    "Shard write failed, abandoning file pair"
                );
                self.open = None;
                self.file_index += 1;
                Err(e)
            }
        }
    }

    /// Close the current file pair; the next batch starts a new one
    pub fn roll_over(&mut self) -> Result<()> {
        if let Some(mut open) = self.open.take() {
            open.data.sync()?;
            open.index.sync()?;
        }
        self.file_index += 1;
        Ok(())
    }

    /// Flush and sync the current pair
    pub fn close(mut self) -> Result<()> {
        if let Some(mut open) = self.open.take() {
            open.data.sync()?;
            open.index.sync()?;
        }
        Ok(())
    }

    /// Paths of the pair the next batch goes to
    pub fn current_files(&self) -> ShardFiles {
        match &self.open {
            Some(open) => open.files.clone(),
            None => self
                .layout
                .shard_files(self.range, &self.shard_name, self.file_index),
        }
    }

    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn shard_name(&self) -> &str {
        &self.shard_name
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn write_batch(&mut self, blocks: &[ShufflePartitionedBlock]) -> Result<()> {
        let sync_strategy = self.sync_strategy;
        let open = self.open_shard()?;

        // Payloads first, recording where each one lands
        let mut index_buf = Vec::with_capacity(blocks.len() * INDEX_ENTRY_SIZE);
        for block in blocks {
            let entry = IndexEntry {
                length: block.length,
                uncompressed_length: block.uncompressed_length,
                crc: block.crc,
                block_id: block.block_id,
                task_attempt_id: block.task_attempt_id,
                offset: open.data.position(),
            };
            open.data.append(&block.data)?;
            entry.encode_into(&mut index_buf);
        }

        // Data must be on storage before any index entry points at it
        match sync_strategy {
            WriteSyncStrategy::EveryBatch => open.data.sync()?,
            WriteSyncStrategy::OsBuffered => open.data.flush()?,
        }

        open.index.append(&index_buf)?;
        match sync_strategy {
            WriteSyncStrategy::EveryBatch => open.index.sync()?,
            WriteSyncStrategy::OsBuffered => open.index.flush()?,
        }

        let data_size = open.data.position();
        debug!(
            shard = %self.shard_name,
            file_index = self.file_index,
            blocks = blocks.len(),
            data_size,
            "Wrote shuffle blocks"
        );
        Ok(())
    }

    /// Current open pair, opening one if needed
    fn open_shard(&mut self) -> Result<&mut OpenShard> {
        let open = match self.open.take() {
            Some(open) => open,
            None => self.open_next_shard()?,
        };
        Ok(self.open.insert(open))
    }

    /// Open the pair at `file_index`, skipping any pair whose index was left
    /// with a partial entry by an earlier writer.
    fn open_next_shard(&mut self) -> Result<OpenShard> {
        loop {
            let files = self
                .layout
                .shard_files(self.range, &self.shard_name, self.file_index);
            let index = self.storage.open_append(&files.index_path)?;

            if index.position() % INDEX_ENTRY_SIZE as u64 != 0 {
                warn!(
                    index = %files.index_path.display(),
                    size = index.position(),
                    "Index has a partial trailing entry, starting next file pair"
                );
                self.file_index += 1;
                continue;
            }

            let data = self.storage.open_append(&files.data_path)?;
            return Ok(OpenShard { files, data, index });
        }
    }
}
