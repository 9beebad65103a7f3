//! Read Client Module
//!
//! Reconstructs one partition from every shard and replica, delivering each
//! acknowledged block exactly once.
//!
//! ## Responsibilities
//! - Pull batches from the partition handler in global segment order
//! - Drop blocks that were never acknowledged, belong to a losing task
//!   attempt, or were already delivered from another shard
//! - Verify the checksum of every delivered block
//! - Confirm at the end that every expected block was delivered
//!
//! ## Reconciliation
//! ```text
//!  batch from shard ──► expected block? ──no──► skip (unexpected)
//!                              │yes
//!                      expected task? ──no──► skip (speculative loser)
//!                              │yes
//!                     already processed? ─yes─► skip (duplicate)
//!                              │no
//!                        crc matches? ──no──► Checksum error
//!                              │yes
//!                   record in processed set, deliver
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roaring::RoaringTreemap;
use tracing::{debug, info, warn};

use crate::checksum::{self, ChecksumFn};
use crate::config::ReadConfig;
use crate::error::{Result, ShuffleError};
use crate::shuffle::{PartitionReadHandler, ShuffleDataResult};
use crate::storage::ShuffleStorage;

/// Missing ids listed in a data loss report
const MISSING_SAMPLE_SIZE: usize = 10;

/// Counters describing what a client has read so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Batches pulled from storage, including fully filtered ones
    pub batches_read: u64,
    pub blocks_delivered: u64,
    pub bytes_delivered: u64,
    /// Blocks whose id was never acknowledged as written
    pub unexpected_blocks: u64,
    /// Blocks written by a task attempt that did not win
    pub filtered_by_task: u64,
    /// Blocks already delivered from another shard or replica
    pub duplicate_blocks: u64,
}

/// Stops a client from another thread
///
/// A read already in progress completes; the next one returns end of stream.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reads and reconciles the blocks of one partition
pub struct ShuffleReadClient {
    handler: PartitionReadHandler,

    /// Blocks acknowledged as written for this partition
    expected_block_ids: RoaringTreemap,

    /// Task attempts whose output counts
    expected_task_ids: RoaringTreemap,

    /// Blocks delivered so far; only grows
    processed_block_ids: RoaringTreemap,

    /// Expected blocks seen on storage but written by a superseded attempt
    superseded_block_ids: RoaringTreemap,

    checksum: ChecksumFn,

    /// Next global segment to request
    segment_index: usize,

    stats: ReadStats,
    cancel: CancelHandle,
    closed: bool,
    /// Set once the partition handler ran out of segments
    exhausted: bool,
}

impl ShuffleReadClient {
    /// Open a client for the partition named by `config`
    ///
    /// With no expected blocks there is nothing to deliver and no shard is
    /// opened.
    pub fn new(
        config: ReadConfig,
        storage: Arc<dyn ShuffleStorage>,
        expected_block_ids: RoaringTreemap,
        expected_task_ids: RoaringTreemap,
    ) -> Result<Self> {
        config.validate()?;

        let handler = if expected_block_ids.is_empty() {
            info!(
                app_id = %config.app_id,
                shuffle_id = config.shuffle_id,
                partition_id = config.partition_id,
                "No expected blocks, skipping shard discovery"
            );
            PartitionReadHandler::empty()
        } else {
            PartitionReadHandler::open(&config, storage)?
        };

        Ok(Self::from_handler(handler, expected_block_ids, expected_task_ids))
    }

    /// Build a client over an already opened partition handler
    pub fn from_handler(
        handler: PartitionReadHandler,
        expected_block_ids: RoaringTreemap,
        expected_task_ids: RoaringTreemap,
    ) -> Self {
        Self {
            handler,
            expected_block_ids,
            expected_task_ids,
            processed_block_ids: RoaringTreemap::new(),
            superseded_block_ids: RoaringTreemap::new(),
            checksum: checksum::crc32,
            segment_index: 0,
            stats: ReadStats::default(),
            cancel: CancelHandle::default(),
            closed: false,
            exhausted: false,
        }
    }

    /// Replace the checksum used to verify delivered blocks
    pub fn with_checksum(mut self, checksum: ChecksumFn) -> Self {
        self.checksum = checksum;
        self
    }

    /// Next batch holding at least one deliverable block
    ///
    /// Only the deliverable blocks are listed in the result; the buffer is
    /// shared with the read and is not copied. `Ok(None)` is end of stream,
    /// either because every segment was read or because the client was
    /// closed or cancelled; [`Self::is_exhausted`] tells them apart.
    pub fn read_shuffle_block_data(&mut self) -> Result<Option<ShuffleDataResult>> {
        loop {
            if self.closed || self.cancel.is_cancelled() {
                return Ok(None);
            }

            let Some(batch) = self.handler.read_shuffle_data(self.segment_index)? else {
                self.exhausted = true;
                return Ok(None);
            };
            self.segment_index += 1;
            self.stats.batches_read += 1;

            let (buffer, segments) = batch.into_parts();
            let mut delivered = Vec::with_capacity(segments.len());

            for segment in segments {
                let block_id = segment.block_id.as_u64();

                if !self.expected_block_ids.contains(block_id) {
                    self.stats.unexpected_blocks += 1;
                    continue;
                }
                if !self.expected_task_ids.contains(segment.task_attempt_id) {
                    // Only an entry whose id agrees on the attempt accounts for the block
                    if segment.block_id.task_attempt_id() == segment.task_attempt_id {
                        self.superseded_block_ids.insert(block_id);
                    }
                    self.stats.filtered_by_task += 1;
                    continue;
                }
                if self.processed_block_ids.contains(block_id) {
                    self.stats.duplicate_blocks += 1;
                    continue;
                }

                let end = segment.offset + segment.length;
                let Some(payload) = buffer.get(segment.offset..end) else {
                    return Err(ShuffleError::DataLoss(format!(
                        "block {} spans {}..{} of a {} byte read",
                        segment.block_id,
                        segment.offset,
                        end,
                        buffer.len()
                    )));
                };

                let actual = (self.checksum)(payload);
                if actual != segment.crc {
                    warn!(block_id = %segment.block_id, expected = segment.crc, actual, "Checksum mismatch");
                    return Err(ShuffleError::Checksum {
                        block_id,
                        expected: segment.crc,
                        actual,
                    });
                }

                self.processed_block_ids.insert(block_id);
                self.stats.blocks_delivered += 1;
                self.stats.bytes_delivered += segment.length as u64;
                delivered.push(segment);
            }

            if delivered.is_empty() {
                debug!(segment_index = self.segment_index - 1, "Batch had no deliverable blocks");
                continue;
            }

            return Ok(Some(ShuffleDataResult::new(buffer, delivered)));
        }
    }

    /// Fail unless every expected block has been delivered
    ///
    /// Expected blocks that were found only under a superseded task attempt
    /// are accounted for: they exist, they are just not this reader's to
    /// deliver.
    pub fn check_processed_block_ids(&self) -> Result<()> {
        let mut missing = &self.expected_block_ids - &self.processed_block_ids;
        missing -= &self.superseded_block_ids;
        if missing.is_empty() {
            return Ok(());
        }

        let sample: Vec<u64> = missing.iter().take(MISSING_SAMPLE_SIZE).collect();
        Err(ShuffleError::DataLoss(format!(
            "expected {} blocks, processed {} blocks, {} missing, first missing: {:?}",
            self.expected_block_ids.len(),
            self.processed_block_ids.len(),
            missing.len(),
            sample
        )))
    }

    /// Release storage handles; reads after this return end of stream
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handler.close();
        info!(
            blocks = self.stats.blocks_delivered,
            bytes = self.stats.bytes_delivered,
            duplicates = self.stats.duplicate_blocks,
            filtered_by_task = self.stats.filtered_by_task,
            "Closed shuffle read client"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether every segment has been read, as opposed to the stream
    /// ending through `close()` or cancellation
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn processed_block_ids(&self) -> &RoaringTreemap {
        &self.processed_block_ids
    }

    pub fn superseded_block_ids(&self) -> &RoaringTreemap {
        &self.superseded_block_ids
    }

    pub fn expected_block_ids(&self) -> &RoaringTreemap {
        &self.expected_block_ids
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Handle that stops this client from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn partition_handler(&self) -> &PartitionReadHandler {
        &self.handler
    }
}
