//! Tests for the record codec and RecordIterator
//!
//! These tests verify:
//! - Records survive the block payload encoding
//! - The iterator yields every record of every delivered block
//! - Metrics count records, bytes and fetch wait
//! - A failed completeness check is the last item, after all records
//! - Undecodable payloads end the stream with an error
//! - Cancelling ends the stream without a completeness check

use std::collections::BTreeMap;
use std::sync::Arc;

use roaring::RoaringTreemap;
use shufflestore::block_id::BlockId;
use shufflestore::record::{decode_records, encode_records};
use shufflestore::storage::PartitionRange;
use shufflestore::{
    MemoryStorage, ReadConfig, ReadMetrics, RecordIterator, ShuffleError, ShufflePartitionedBlock,
    ShuffleReadClient, ShuffleStorage, ShuffleWriteHandler, TaskAttemptContext, WriteConfig,
};

// =============================================================================
// Helper Functions
// =============================================================================

type Record = (String, u64);

fn records_for(block: u64, count: u64) -> Vec<Record> {
    (0..count).map(|i| (format!("key-{block}-{i}"), block * 100 + i)).collect()
}

/// Write `blocks` blocks of `per_block` records each to partition 0.
/// Returns the storage, expected ids, expected tasks and every record.
fn populate(
    blocks: u64,
    per_block: u64,
) -> (Arc<dyn ShuffleStorage>, RoaringTreemap, RoaringTreemap, Vec<Record>) {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let config = WriteConfig::builder().base_path("/mem").app_id("appId").build();
    let mut writer =
        ShuffleWriteHandler::new(&config, Arc::clone(&storage), PartitionRange::new(0, 0), "w")
            .unwrap();

    let mut ctx = TaskAttemptContext::new(5).unwrap();
    let mut all = Vec::new();
    for b in 0..blocks {
        let records = records_for(b, per_block);
        let block = ctx.create_block(0, encode_records(&records).unwrap()).unwrap();
        ctx.write_with(&mut writer, std::slice::from_ref(&block)).unwrap();
        all.extend(records);
    }
    writer.close().unwrap();

    let report = ctx.finish();
    let tasks: RoaringTreemap = [report.task_attempt_id].into_iter().collect();
    (storage, report.block_ids_for(0), tasks, all)
}

fn client(
    storage: Arc<dyn ShuffleStorage>,
    expected: RoaringTreemap,
    tasks: RoaringTreemap,
) -> ShuffleReadClient {
    let config = ReadConfig::builder()
        .base_path("/mem")
        .app_id("appId")
        .read_buffer_size(100)
        .build();
    ShuffleReadClient::new(config, storage, expected, tasks).unwrap()
}

// =============================================================================
// Codec Tests
// =============================================================================

#[test]
fn test_encode_decode_records() {
    let records = records_for(3, 20);
    let payload = encode_records(&records).unwrap();
    let decoded: Vec<Record> = decode_records(&payload).unwrap();
    assert_eq!(decoded, records);
}

#[test]
fn test_decode_empty_payload() {
    let decoded: Vec<Record> = decode_records(&[]).unwrap();
    assert!(decoded.is_empty());
}

#[test]
fn test_decode_truncated_payload_fails() {
    let payload = encode_records(&records_for(1, 4)).unwrap();
    let result: shufflestore::Result<Vec<Record>> = decode_records(&payload[..payload.len() - 3]);
    assert!(matches!(result, Err(ShuffleError::Serialization(_))));
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterator_yields_every_record() {
    let (storage, expected, tasks, all) = populate(8, 10);
    let iter: RecordIterator<String, u64> = RecordIterator::new(client(storage, expected, tasks), ReadMetrics::new());

    let read: Vec<Record> = iter.collect::<shufflestore::Result<_>>().unwrap();
    assert_eq!(read.len(), all.len());

    let want: BTreeMap<_, _> = all.into_iter().collect();
    let got: BTreeMap<_, _> = read.into_iter().collect();
    assert_eq!(got, want);
}

#[test]
fn test_metrics_are_counted() {
    let (storage, expected, tasks, all) = populate(4, 25);
    let metrics = Arc::new(ReadMetrics::new());
    let mut iter: RecordIterator<String, u64, Arc<ReadMetrics>> =
        RecordIterator::new(client(storage, expected, tasks), Arc::clone(&metrics));

    let mut count = 0;
    for item in iter.by_ref() {
        item.unwrap();
        count += 1;
    }

    assert_eq!(count, all.len());
    assert_eq!(metrics.records_read(), all.len() as u64);
    let stats = iter.client().stats();
    assert_eq!(metrics.bytes_read(), stats.bytes_delivered);
    assert!(metrics.bytes_read() > 0);
    assert!(iter.client().is_closed());
}

#[test]
fn test_missing_block_is_last_item() {
    let (storage, mut expected, tasks, all) = populate(3, 5);
    expected.insert(BlockId::impossible(5, 0).unwrap().as_u64());

    let mut iter: RecordIterator<String, u64> =
        RecordIterator::new(client(storage, expected, tasks), ReadMetrics::new());

    for _ in 0..all.len() {
        assert!(iter.next().unwrap().is_ok());
    }

    let err = iter.next().unwrap().unwrap_err();
    assert!(matches!(err, ShuffleError::DataLoss(_)));
    assert!(err.to_string().starts_with("Blocks read inconsistent:"));

    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
}

#[test]
fn test_undecodable_block_ends_stream() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let config = WriteConfig::builder().base_path("/mem").app_id("appId").build();
    let mut writer =
        ShuffleWriteHandler::new(&config, Arc::clone(&storage), PartitionRange::new(0, 0), "w")
            .unwrap();

    // A u64 length prefix promising far more string bytes than follow
    let mut garbage = 1_000u64.to_le_bytes().to_vec();
    garbage.extend_from_slice(b"short");
    let id = BlockId::new(0, 1, 0).unwrap();
    writer.write(&[ShufflePartitionedBlock::new(id, 1, garbage).unwrap()]).unwrap();

    let expected: RoaringTreemap = [id.as_u64()].into_iter().collect();
    let tasks: RoaringTreemap = [1u64].into_iter().collect();
    let mut iter: RecordIterator<String, u64> =
        RecordIterator::new(client(storage, expected, tasks), ReadMetrics::new());

    assert!(matches!(iter.next(), Some(Err(ShuffleError::Serialization(_)))));
    assert!(iter.next().is_none());
}

#[test]
fn test_cancel_mid_stream_ends_without_error() {
    let (storage, expected, tasks, all) = populate(10, 5);
    let mut iter: RecordIterator<String, u64> =
        RecordIterator::new(client(storage, expected, tasks), ReadMetrics::new());

    assert!(iter.next().unwrap().is_ok());
    iter.client().cancel_handle().cancel();

    let rest: Vec<_> = iter.by_ref().collect();
    assert!(rest.iter().all(Result::is_ok), "cancelled stream yielded an error");
    assert!(rest.len() + 1 < all.len());
    assert!(iter.next().is_none());
    assert!(!iter.client().is_exhausted());
    assert!(iter.client().is_closed());
}

#[test]
fn test_close_stops_iteration() {
    let (storage, expected, tasks, _) = populate(3, 5);
    let mut iter: RecordIterator<String, u64> =
        RecordIterator::new(client(storage, expected, tasks), ReadMetrics::new());

    assert!(iter.next().unwrap().is_ok());
    iter.close();
    assert!(iter.next().is_none());
    assert!(iter.client().is_closed());
}

#[test]
fn test_empty_partition_yields_nothing() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let mut iter: RecordIterator<String, u64> = RecordIterator::new(
        client(storage, RoaringTreemap::new(), RoaringTreemap::new()),
        ReadMetrics::new(),
    );
    assert!(iter.next().is_none());
}
