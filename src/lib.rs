//! # shufflestore
//!
//! A remote shuffle block store with:
//! - 64-bit block ids packing sequence, task attempt and partition
//! - Paired data/index files written append-only per writer shard
//! - Bounded, batched reads planned from a fully cached index
//! - Read-time reconciliation with compressed bitmaps and checksums
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TaskAttemptContext + ShuffleWriteHandler        │
//! │           ({shard}_{n}.data / {shard}_{n}.index pairs)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ ShuffleStorage (local / memory)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          ShardReadHandler (one per shard, per replica)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │     PartitionReadHandler (one global segment index space)    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐      expected blocks / tasks
//!               │  ReadClient   │◄──── (RoaringTreemap)
//!               │ (exactly once)│
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │RecordIterator │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod block_id;
pub mod checksum;
pub mod retry;
pub mod storage;
pub mod shuffle;
pub mod task;
pub mod client;
pub mod record;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use block_id::BlockId;
pub use client::{CancelHandle, ReadStats, ShuffleReadClient};
pub use config::{ReadConfig, WriteConfig, WriteSyncStrategy};
pub use error::{Result, ShuffleError};
pub use record::{RecordIterator, ReadMetrics, ShuffleReadMetrics};
pub use shuffle::{ShuffleDataResult, ShufflePartitionedBlock, ShuffleWriteHandler};
pub use storage::{LocalStorage, MemoryStorage, ShuffleStorage};
pub use task::{TaskAttemptContext, TaskWriteReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shufflestore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
