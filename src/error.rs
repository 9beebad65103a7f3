//! Error types for shufflestore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ShuffleError
pub type Result<T> = std::result::Result<T, ShuffleError>;

/// Unified error type for shufflestore operations
#[derive(Debug, Error)]
pub enum ShuffleError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A transient storage failure that kept failing after every retry.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    /// Bytes that were acknowledged as written cannot be delivered.
    #[error("Blocks read inconsistent: {0}")]
    DataLoss(String),

    #[error("Unexpected crc value for block {block_id}, expected: {expected}, actual: {actual}")]
    Checksum {
        block_id: u64,
        expected: u32,
        actual: u32,
    },

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Index corruption detected: {0}")]
    IndexCorruption(String),

    #[error("Block id field {field} value {value} exceeds {bits} bits")]
    BlockIdOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Segment index {requested} is behind the current read position {current}")]
    SegmentOutOfOrder { requested: usize, current: usize },
}

impl From<bincode::Error> for ShuffleError {
    fn from(e: bincode::Error) -> Self {
        ShuffleError::Serialization(e.to_string())
    }
}
