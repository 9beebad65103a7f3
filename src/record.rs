//! Record Iterator Module
//!
//! Adapts a [`ShuffleReadClient`] to an iterator of typed key/value records.
//!
//! ## Block Payload Format
//! ```text
//! ┌────────────────┬────────────────┬─────┬────────────────┐
//! │ bincode (K, V) │ bincode (K, V) │ ... │ bincode (K, V) │
//! └────────────────┴────────────────┴─────┴────────────────┘
//! ```
//! Records carry no framing of their own; bincode's encoding is
//! self-delimiting.

use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::ShuffleReadClient;
use crate::error::Result;

// =============================================================================
// Record Codec
// =============================================================================

/// Encode records into one block payload
pub fn encode_records<K, V>(records: &[(K, V)]) -> Result<Bytes>
where
    K: Serialize,
    V: Serialize,
{
    let mut buf = Vec::new();
    for record in records {
        bincode::serialize_into(&mut buf, record)?;
    }
    Ok(Bytes::from(buf))
}

/// Decode every record of one block payload
pub fn decode_records<K, V>(payload: &[u8]) -> Result<Vec<(K, V)>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let mut cursor = payload;
    let mut records = Vec::new();
    while !cursor.is_empty() {
        records.push(bincode::deserialize_from(&mut cursor)?);
    }
    Ok(records)
}

// =============================================================================
// Metrics
// =============================================================================

/// Write-only sink for read-side metrics
pub trait ShuffleReadMetrics {
    fn inc_records_read(&self, count: u64);

    fn inc_bytes_read(&self, bytes: u64);

    /// Time spent blocked waiting for the next batch
    fn inc_fetch_wait(&self, wait: Duration);
}

/// Atomic counters implementing [`ShuffleReadMetrics`]
#[derive(Debug, Default)]
pub struct ReadMetrics {
    records_read: AtomicU64,
    bytes_read: AtomicU64,
    fetch_wait_nanos: AtomicU64,
}

impl ReadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn fetch_wait(&self) -> Duration {
        Duration::from_nanos(self.fetch_wait_nanos.load(Ordering::Relaxed))
    }
}

impl ShuffleReadMetrics for ReadMetrics {
    fn inc_records_read(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    fn inc_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn inc_fetch_wait(&self, wait: Duration) {
        let nanos = u64::try_from(wait.as_nanos()).unwrap_or(u64::MAX);
        self.fetch_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl<T: ShuffleReadMetrics + ?Sized> ShuffleReadMetrics for Arc<T> {
    fn inc_records_read(&self, count: u64) {
        (**self).inc_records_read(count)
    }

    fn inc_bytes_read(&self, bytes: u64) {
        (**self).inc_bytes_read(bytes)
    }

    fn inc_fetch_wait(&self, wait: Duration) {
        (**self).inc_fetch_wait(wait)
    }
}

// =============================================================================
// Record Iterator
// =============================================================================

/// Iterator over the `(K, V)` records of one partition
///
/// When the client reads to the end of the partition its completeness check
/// runs exactly once and its failure, if any, is the last item. Stopping
/// through a cancel handle ends the stream without a check. The client is closed afterwards
/// and the iterator yields nothing more.
pub struct RecordIterator<K, V, M = ReadMetrics> {
    client: ShuffleReadClient,
    metrics: M,
    /// Delivered blocks not decoded yet
    pending_blocks: VecDeque<Bytes>,
    /// Records of the block being consumed
    records: std::vec::IntoIter<(K, V)>,
    finished: bool,
}

impl<K, V, M> RecordIterator<K, V, M>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    M: ShuffleReadMetrics,
{
    pub fn new(client: ShuffleReadClient, metrics: M) -> Self {
        Self {
            client,
            metrics,
            pending_blocks: VecDeque::new(),
            records: Vec::new().into_iter(),
            finished: false,
        }
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn client(&self) -> &ShuffleReadClient {
        &self.client
    }

    /// Stop early and release storage handles
    pub fn close(&mut self) {
        self.finished = true;
        self.client.close();
    }

    /// End of stream: completeness check, then close
    ///
    /// A stream stopped by close or cancellation is not checked.
    fn finish(&mut self) -> Option<Result<(K, V)>> {
        self.finished = true;
        if !self.client.is_exhausted() {
            self.client.close();
            debug!("Record stream stopped before the end");
            return None;
        }

        let check = self.client.check_processed_block_ids();
        self.client.close();
        debug!(
            processed = self.client.processed_block_ids().len(),
            complete = check.is_ok(),
            "Record stream finished"
        );
        check.err().map(Err)
    }

    fn fail(&mut self, error: crate::ShuffleError) -> Option<Result<(K, V)>> {
        self.finished = true;
        self.client.close();
        Some(Err(error))
    }
}

impl<K, V, M> Iterator for RecordIterator<K, V, M>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    M: ShuffleReadMetrics,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(record) = self.records.next() {
                self.metrics.inc_records_read(1);
                return Some(Ok(record));
            }

            if let Some(block) = self.pending_blocks.pop_front() {
                match decode_records(&block) {
                    Ok(records) => {
                        self.metrics.inc_bytes_read(block.len() as u64);
                        self.records = records.into_iter();
                        continue;
                    }
                    Err(e) => return self.fail(e),
                }
            }

            let started = Instant::now();
            match self.client.read_shuffle_block_data() {
                Ok(Some(batch)) => {
                    self.metrics.inc_fetch_wait(started.elapsed());
                    self.pending_blocks
                        .extend(batch.blocks().map(|(_, payload)| payload));
                }
                Ok(None) => return self.finish(),
                Err(e) => return self.fail(e),
            }
        }
    }
}

impl<K, V, M> FusedIterator for RecordIterator<K, V, M>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    M: ShuffleReadMetrics,
{
}
