//! Block Identifier Codec
//!
//! Packs `(sequence, task_attempt_id, partition_id)` into one 64-bit id.
//!
//! ## Layout (most significant first)
//! ```text
//! ┌───┬──────────────────┬───────────────────────┬──────────────────────┐
//! │ 0 │ sequence (18)    │ task_attempt_id (21)  │ partition_id (24)    │
//! └───┴──────────────────┴───────────────────────┴──────────────────────┘
//!  63  62            45   44                 24   23                  0
//! ```
//!
//! Writers and readers of one job must agree on these widths. A mismatch
//! cannot be detected at runtime, so the widths are constants rather than
//! configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShuffleError};

/// Width of the partition id field
pub const PARTITION_ID_BITS: u32 = 24;

/// Width of the task attempt id field
pub const TASK_ATTEMPT_ID_BITS: u32 = 21;

/// Width of the per-writer sequence field
pub const SEQUENCE_NO_BITS: u32 = 18;

pub const MAX_PARTITION_ID: u64 = (1 << PARTITION_ID_BITS) - 1;
pub const MAX_TASK_ATTEMPT_ID: u64 = (1 << TASK_ATTEMPT_ID_BITS) - 1;

/// Largest sequence number. Reserved: no writer ever hands it out, so an id
/// built with it names a block that cannot exist.
pub const MAX_SEQUENCE_NO: u64 = (1 << SEQUENCE_NO_BITS) - 1;

const TASK_ATTEMPT_ID_SHIFT: u32 = PARTITION_ID_BITS;
const SEQUENCE_NO_SHIFT: u32 = PARTITION_ID_BITS + TASK_ATTEMPT_ID_BITS;

/// A 64-bit block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    /// Encode the three fields into a block id.
    ///
    /// Fails with `BlockIdOverflow` when a field does not fit its width.
    pub fn new(sequence: u64, task_attempt_id: u64, partition_id: u64) -> Result<Self> {
        check_width("sequence", sequence, SEQUENCE_NO_BITS)?;
        check_width("task_attempt_id", task_attempt_id, TASK_ATTEMPT_ID_BITS)?;
        check_width("partition_id", partition_id, PARTITION_ID_BITS)?;

        Ok(Self(
            (sequence << SEQUENCE_NO_SHIFT)
                | (task_attempt_id << TASK_ATTEMPT_ID_SHIFT)
                | partition_id,
        ))
    }

    /// Id of a block that no writer can produce, for the given task and partition
    pub fn impossible(task_attempt_id: u64, partition_id: u64) -> Result<Self> {
        Self::new(MAX_SEQUENCE_NO, task_attempt_id, partition_id)
    }

    /// Wrap a raw id read back from storage
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Decode into `(sequence, task_attempt_id, partition_id)`
    pub fn decode(self) -> (u64, u64, u64) {
        (self.sequence(), self.task_attempt_id(), self.partition_id())
    }

    pub fn sequence(self) -> u64 {
        (self.0 >> SEQUENCE_NO_SHIFT) & MAX_SEQUENCE_NO
    }

    pub fn task_attempt_id(self) -> u64 {
        (self.0 >> TASK_ATTEMPT_ID_SHIFT) & MAX_TASK_ATTEMPT_ID
    }

    pub fn partition_id(self) -> u64 {
        self.0 & MAX_PARTITION_ID
    }
}

impl From<u64> for BlockId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<BlockId> for u64 {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (seq, task, partition) = self.decode();
        write!(f, "{}[seq={}, task={}, partition={}]", self.0, seq, task, partition)
    }
}

fn check_width(field: &'static str, value: u64, bits: u32) -> Result<()> {
    if value >> bits != 0 {
        return Err(ShuffleError::BlockIdOverflow { field, value, bits });
    }
    Ok(())
}
