//! Task Attempt Context
//!
//! Tracks the blocks one task attempt produces: which were acknowledged as
//! written and which failed. The finished report is what readers later use
//! as their expected-block bitmaps.
//!
//! ```text
//!   new(task) ──► create_block() ──► write_with() / ack() / fail()
//!                                               │
//!                                   finish() ──► TaskWriteReport
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use roaring::RoaringTreemap;
use tracing::{debug, warn};

use crate::block_id::{BlockId, MAX_SEQUENCE_NO, MAX_TASK_ATTEMPT_ID, SEQUENCE_NO_BITS, TASK_ATTEMPT_ID_BITS};
use crate::error::{Result, ShuffleError};
use crate::shuffle::{ShufflePartitionedBlock, ShuffleWriteHandler};

/// Write-side state of one task attempt
#[derive(Debug)]
pub struct TaskAttemptContext {
    task_attempt_id: u64,
    /// Next sequence number; shared by all partitions of the attempt
    next_sequence: u64,
    /// Blocks built but neither acknowledged nor failed, by partition
    pending: BTreeMap<u32, RoaringTreemap>,
    success: BTreeMap<u32, RoaringTreemap>,
    failed: BTreeMap<u32, RoaringTreemap>,
}

impl TaskAttemptContext {
    pub fn new(task_attempt_id: u64) -> Result<Self> {
        if task_attempt_id > MAX_TASK_ATTEMPT_ID {
            return Err(ShuffleError::BlockIdOverflow {
                field: "task_attempt_id",
                value: task_attempt_id,
                bits: TASK_ATTEMPT_ID_BITS,
            });
        }

        Ok(Self {
            task_attempt_id,
            next_sequence: 0,
            pending: BTreeMap::new(),
            success: BTreeMap::new(),
            failed: BTreeMap::new(),
        })
    }

    pub fn task_attempt_id(&self) -> u64 {
        self.task_attempt_id
    }

    /// Build the next block of `partition_id`
    ///
    /// The reserved sequence number is never handed out, so an attempt can
    /// produce at most `MAX_SEQUENCE_NO` blocks.
    pub fn create_block(
        &mut self,
        partition_id: u32,
        data: impl Into<Bytes>,
    ) -> Result<ShufflePartitionedBlock> {
        if self.next_sequence >= MAX_SEQUENCE_NO {
            return Err(ShuffleError::BlockIdOverflow {
                field: "sequence",
                value: self.next_sequence,
                bits: SEQUENCE_NO_BITS,
            });
        }

        let block_id = BlockId::new(self.next_sequence, self.task_attempt_id, partition_id as u64)?;
        let block = ShufflePartitionedBlock::new(block_id, self.task_attempt_id, data)?;
        self.next_sequence += 1;

        self.pending
            .entry(partition_id)
            .or_default()
            .insert(block_id.as_u64());
        Ok(block)
    }

    /// Record blocks as durably written
    pub fn ack(&mut self, blocks: &[ShufflePartitionedBlock]) {
        for block in blocks {
            let (partition, id) = self.take_pending(block);
            self.success.entry(partition).or_default().insert(id);
        }
    }

    /// Record blocks whose write failed
    pub fn fail(&mut self, blocks: &[ShufflePartitionedBlock]) {
        for block in blocks {
            let (partition, id) = self.take_pending(block);
            self.failed.entry(partition).or_default().insert(id);
        }
    }

    /// Write `blocks` through `handler` and record the outcome
    pub fn write_with(
        &mut self,
        handler: &mut ShuffleWriteHandler,
        blocks: &[ShufflePartitionedBlock],
    ) -> Result<()> {
        match handler.write(blocks) {
            Ok(()) => {
                self.ack(blocks);
                Ok(())
            }
            Err(e) => {
                self.fail(blocks);
                Err(e)
            }
        }
    }

    /// Close the attempt. Blocks never acknowledged count as failed.
    pub fn finish(mut self) -> TaskWriteReport {
        let pending = std::mem::take(&mut self.pending);
        for (partition, ids) in pending {
            if ids.is_empty() {
                continue;
            }
            warn!(
                task_attempt_id = self.task_attempt_id,
                partition,
                blocks = ids.len(),
                "Blocks never acknowledged, reporting as failed"
            );
            *self.failed.entry(partition).or_default() |= ids;
        }

        debug!(
            task_attempt_id = self.task_attempt_id,
            partitions = self.success.len(),
            "Task attempt finished"
        );

        TaskWriteReport {
            task_attempt_id: self.task_attempt_id,
            success_block_ids: self.success,
            failed_block_ids: self.failed,
        }
    }

    fn take_pending(&mut self, block: &ShufflePartitionedBlock) -> (u32, u64) {
        let partition = block.block_id.partition_id() as u32;
        let id = block.block_id.as_u64();
        if let Some(ids) = self.pending.get_mut(&partition) {
            ids.remove(id);
        }
        (partition, id)
    }
}

/// Outcome of one task attempt, by partition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskWriteReport {
    pub task_attempt_id: u64,
    pub success_block_ids: BTreeMap<u32, RoaringTreemap>,
    pub failed_block_ids: BTreeMap<u32, RoaringTreemap>,
}

impl TaskWriteReport {
    /// Acknowledged blocks of one partition
    pub fn block_ids_for(&self, partition_id: u32) -> RoaringTreemap {
        self.success_block_ids
            .get(&partition_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn failed_block_ids_for(&self, partition_id: u32) -> RoaringTreemap {
        self.failed_block_ids
            .get(&partition_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn success_count(&self) -> u64 {
        self.success_block_ids.values().map(RoaringTreemap::len).sum()
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_block_ids.values().map(RoaringTreemap::len).sum()
    }
}
