//! Shuffle Module
//!
//! Paired data/index files per writer shard, and the handlers that read them
//! back in bounded batches.
//!
//! ## File Format
//! ```text
//! {shard}_{n}.data
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │ payload 0    │ payload 1    │ ... │ payload k    │   (no framing)
//! └──────────────┴──────────────┴─────┴──────────────┘
//!
//! {shard}_{n}.index  (36 bytes per block, little-endian)
//! ┌─────────┬───────────┬────────┬────────────┬─────────────┬────────────┐
//! │ Len (4) │ URawLen(4)│ CRC (4)│ BlockId (8)│ TaskAtt (8) │ Offset (8) │
//! └─────────┴───────────┴────────┴────────────┴─────────────┴────────────┘
//!   ... repeated, in the same order as the payloads ...
//! ```
//!
//! Offsets only grow, so consecutive entries can be merged into one ranged
//! read of the data file.

mod index;
mod partition;
mod reader;
mod writer;

use bytes::Bytes;

use crate::block_id::BlockId;
use crate::checksum;
use crate::error::{Result, ShuffleError};

pub use index::{decode_index_entries, IndexEntry, INDEX_ENTRY_SIZE};
pub use partition::PartitionReadHandler;
pub use reader::{plan_file_segments, ShardReadHandler};
pub use writer::ShuffleWriteHandler;

// =============================================================================
// Blocks
// =============================================================================

/// One checksummed block of partitioned payload, as handed to a writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShufflePartitionedBlock {
    pub length: u32,
    pub uncompressed_length: u32,
    pub crc: u32,
    pub block_id: BlockId,
    pub task_attempt_id: u64,
    pub data: Bytes,
}

impl ShufflePartitionedBlock {
    /// Build a block, computing its length and CRC from the payload
    pub fn new(block_id: BlockId, task_attempt_id: u64, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let length = u32::try_from(data.len()).map_err(|_| {
            ShuffleError::InvalidBlock(format!(
                "block {} payload of {} bytes does not fit a u32 length",
                block_id.as_u64(),
                data.len()
            ))
        })?;

        Ok(Self {
            length,
            uncompressed_length: length,
            crc: checksum::crc32(&data),
            block_id,
            task_attempt_id,
            data,
        })
    }

    /// Reject blocks whose declared length disagrees with the payload
    pub(crate) fn validate(&self) -> Result<()> {
        if self.length as usize != self.data.len() {
            return Err(ShuffleError::InvalidBlock(format!(
                "block {} declares {} bytes but carries {}",
                self.block_id.as_u64(),
                self.length,
                self.data.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Read Results
// =============================================================================

/// Position of one block inside a read buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSegment {
    /// Offset relative to the start of the buffer
    pub offset: usize,
    pub length: usize,
    pub block_id: BlockId,
    pub task_attempt_id: u64,
    pub crc: u32,
    pub uncompressed_length: u32,
}

/// One planned ranged read of a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    /// Offset of the first byte in the data file
    pub offset: u64,
    /// Bytes covered, from the first block's start to the last block's end
    pub length: usize,
    pub buffer_segments: Vec<BufferSegment>,
}

/// A materialized batch: the bytes read plus the blocks inside them
#[derive(Debug, Clone, Default)]
pub struct ShuffleDataResult {
    buffer: Bytes,
    segments: Vec<BufferSegment>,
}

impl ShuffleDataResult {
    pub fn new(buffer: Bytes, segments: Vec<BufferSegment>) -> Self {
        Self { buffer, segments }
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn segments(&self) -> &[BufferSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Payload of one segment, sharing the underlying buffer
    pub fn block_data(&self, segment: &BufferSegment) -> Bytes {
        self.buffer
            .slice(segment.offset..segment.offset + segment.length)
    }

    /// Iterate `(segment, payload)` pairs in buffer order
    pub fn blocks(&self) -> impl Iterator<Item = (&BufferSegment, Bytes)> + '_ {
        self.segments.iter().map(move |s| (s, self.block_data(s)))
    }

    pub fn into_parts(self) -> (Bytes, Vec<BufferSegment>) {
        (self.buffer, self.segments)
    }
}
