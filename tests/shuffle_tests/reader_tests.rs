//! Tests for ShardReadHandler
//!
//! These tests verify:
//! - Every written block is read back with its payload and CRC
//! - Segment counts follow the batching rule for any index_read_limit
//! - Absent shards (missing data or index) open as None
//! - Data that disappears after the index was cached is data loss
//! - A partial trailing index entry is ignored
//! - Corrupt offsets and shrinking indexes skip the shard instead of failing

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use shufflestore::checksum::crc32;
use shufflestore::retry::RetryPolicy;
use shufflestore::shuffle::{ShardReadHandler, INDEX_ENTRY_SIZE};
use shufflestore::storage::{AppendHandle, PartitionRange, ReadHandle, ShardFiles};
use shufflestore::{
    BlockId, LocalStorage, MemoryStorage, ShuffleError, ShufflePartitionedBlock,
    ShuffleStorage, ShuffleWriteHandler, WriteConfig,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const RANGE: PartitionRange = PartitionRange { start: 0, end: 0 };

/// Deterministic pseudo-random payload
fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 33) as u8
        })
        .collect()
}

/// Write `num` blocks of `length` bytes in one batch; returns them
fn write_blocks(
    storage: Arc<dyn ShuffleStorage>,
    base: &Path,
    shard: &str,
    first_seq: u64,
    num: u64,
    length: usize,
) -> (ShardFiles, Vec<ShufflePartitionedBlock>) {
    let config = WriteConfig::builder().base_path(base).app_id("appId").build();
    let mut writer = ShuffleWriteHandler::new(&config, storage, RANGE, shard).unwrap();
    let blocks: Vec<_> = (first_seq..first_seq + num)
        .map(|seq| {
            let id = BlockId::new(seq, 0, 0).unwrap();
            ShufflePartitionedBlock::new(id, 0, payload(seq, length)).unwrap()
        })
        .collect();
    writer.write(&blocks).unwrap();
    let files = writer.current_files();
    writer.close().unwrap();
    (files, blocks)
}

fn open(
    storage: Arc<dyn ShuffleStorage>,
    files: &ShardFiles,
    index_read_limit: usize,
    read_buffer_size: usize,
) -> Option<ShardReadHandler> {
    ShardReadHandler::open(
        storage,
        files.clone(),
        index_read_limit,
        read_buffer_size,
        RetryPolicy::fixed(1, std::time::Duration::from_millis(1)),
    )
    .unwrap()
}

/// Segments expected from `num` equal blocks
fn expected_segment_count(num: usize, length: usize, limit: usize, buffer_size: usize) -> usize {
    let mut total = 0;
    let mut remaining = num;
    while remaining > 0 {
        let group = remaining.min(limit);
        let per_batch = buffer_size.div_ceil(length).max(1);
        total += group.div_ceil(per_batch);
        remaining -= group;
    }
    total
}

/// Read every segment and return the blocks as (block_id, payload, crc)
fn read_all_blocks(handler: &mut ShardReadHandler) -> Vec<(BlockId, Vec<u8>, u32)> {
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(result) = handler.read_shuffle_data(i).unwrap() {
        for (segment, data) in result.blocks() {
            out.push((segment.block_id, data.to_vec(), segment.crc));
        }
        i += 1;
    }
    out
}

/// Memory storage whose read handles overstate the file size, as if the
/// file shrank between the size check and the read
#[derive(Debug)]
struct ShrinkingStorage {
    inner: MemoryStorage,
    overstated_by: u64,
}

impl ShuffleStorage for ShrinkingStorage {
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn AppendHandle>> {
        self.inner.open_append(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadHandle>> {
        Ok(Box::new(ShrinkingRead {
            inner: self.inner.open_read(path)?,
            overstated_by: self.overstated_by,
        }))
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list(dir)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        self.inner.exists(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.inner.delete(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }
}

struct ShrinkingRead {
    inner: Box<dyn ReadHandle>,
    overstated_by: u64,
}

impl ReadHandle for ShrinkingRead {
    fn size(&self) -> io::Result<u64> {
        Ok(self.inner.size()? + self.overstated_by)
    }

    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Bytes> {
        self.inner.read_at(offset, length)
    }
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_reads_back_every_block() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, blocks) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 10, 30);

    let mut handler = open(storage, &files, 100, 100).unwrap();
    assert_eq!(handler.block_count(), 10);

    let read = read_all_blocks(&mut handler);
    assert_eq!(read.len(), 10);
    for ((id, data, crc), block) in read.iter().zip(&blocks) {
        assert_eq!(*id, block.block_id);
        assert_eq!(data[..], block.data[..]);
        assert_eq!(*crc, crc32(data));
    }
}

#[test]
fn test_segment_count_follows_batching_rule() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 11, 30);

    for limit in [1, 2, 3, 10, 11, 100] {
        for buffer in [1, 30, 59, 60, 100, 10_000] {
            let handler = open(Arc::clone(&storage), &files, limit, buffer).unwrap();
            assert_eq!(
                handler.segment_count(),
                expected_segment_count(11, 30, limit, buffer),
                "limit {limit}, buffer {buffer}"
            );
        }
    }
}

#[test]
fn test_index_read_limit_does_not_change_blocks() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 11, 17);

    let mut baseline = open(Arc::clone(&storage), &files, 1000, 64).unwrap();
    let expected = read_all_blocks(&mut baseline);

    for limit in [1, 2, 3, 10, 11] {
        let mut handler = open(Arc::clone(&storage), &files, limit, 64).unwrap();
        assert_eq!(read_all_blocks(&mut handler), expected, "limit {limit}");
    }
}

#[test]
fn test_past_last_segment_is_none() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 3, 10);

    let mut handler = open(storage, &files, 100, 1000).unwrap();
    assert_eq!(handler.segment_count(), 1);
    assert!(handler.read_shuffle_data(0).unwrap().is_some());
    assert!(handler.read_shuffle_data(1).unwrap().is_none());
    assert!(handler.read_shuffle_data(99).unwrap().is_none());
}

#[test]
fn test_file_segments_cover_blocks() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 4, 25);

    let handler = open(storage, &files, 100, 50).unwrap();
    let segments = handler.file_segments();
    assert_eq!(segments.len(), 2);
    assert_eq!((segments[0].offset, segments[0].length), (0, 50));
    assert_eq!((segments[1].offset, segments[1].length), (50, 50));
}

// =============================================================================
// Absent Shard Tests
// =============================================================================

#[test]
fn test_missing_data_file_skips_shard() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 5, 10);

    storage.delete(&files.data_path).unwrap();
    assert!(open(storage, &files, 100, 100).is_none());
}

#[test]
fn test_missing_index_file_skips_shard() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 5, 10);

    storage.delete(&files.index_path).unwrap();
    assert!(open(storage, &files, 100, 100).is_none());
}

#[test]
fn test_overlapping_index_skips_shard() {
    let storage = MemoryStorage::new();
    let shared: Arc<dyn ShuffleStorage> = Arc::new(storage.clone());
    let (files, _) = write_blocks(Arc::clone(&shared), Path::new("/mem"), "test", 0, 2, 10);

    // Point the second entry back into the first block
    let mut index = storage.contents(&files.index_path).unwrap();
    index[INDEX_ENTRY_SIZE + 28..INDEX_ENTRY_SIZE + 36].copy_from_slice(&3u64.to_le_bytes());
    storage.put(&files.index_path, index);

    assert!(open(shared, &files, 100, 100).is_none());
}

#[test]
fn test_offset_overflow_skips_shard() {
    let storage = MemoryStorage::new();
    let shared: Arc<dyn ShuffleStorage> = Arc::new(storage.clone());
    let (files, _) = write_blocks(Arc::clone(&shared), Path::new("/mem"), "test", 0, 2, 10);

    let mut index = storage.contents(&files.index_path).unwrap();
    index[INDEX_ENTRY_SIZE + 28..INDEX_ENTRY_SIZE + 36].copy_from_slice(&(u64::MAX - 3).to_le_bytes());
    storage.put(&files.index_path, index);

    assert!(open(shared, &files, 100, 100).is_none());
}

#[test]
fn test_index_shrinking_during_open_skips_shard() {
    let memory = MemoryStorage::new();
    let plain: Arc<dyn ShuffleStorage> = Arc::new(memory.clone());
    let (files, _) = write_blocks(plain, Path::new("/mem"), "test", 0, 3, 10);

    let shrinking: Arc<dyn ShuffleStorage> = Arc::new(ShrinkingStorage {
        inner: memory,
        overstated_by: 2 * INDEX_ENTRY_SIZE as u64,
    });
    assert!(open(shrinking, &files, 100, 100).is_none());
}

#[test]
fn test_huge_index_read_limit() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, blocks) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 4, 10);

    let mut handler = open(storage, &files, usize::MAX, 1000).unwrap();
    assert_eq!(read_all_blocks(&mut handler).len(), blocks.len());
}

// =============================================================================
// Data Loss Tests
// =============================================================================

#[test]
fn test_data_deleted_after_open_is_data_loss() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 5, 10);

    let mut handler = open(Arc::clone(&storage), &files, 100, 100).unwrap();
    storage.delete(&files.data_path).unwrap();

    let err = handler.read_shuffle_data(0).unwrap_err();
    assert!(matches!(err, ShuffleError::DataLoss(_)));
    assert!(err.to_string().starts_with("Blocks read inconsistent:"));
}

#[test]
fn test_data_truncated_after_open_is_data_loss() {
    let storage = MemoryStorage::new();
    let shared: Arc<dyn ShuffleStorage> = Arc::new(storage.clone());
    let (files, _) = write_blocks(Arc::clone(&shared), Path::new("/mem"), "test", 0, 5, 10);

    let mut handler = open(shared, &files, 100, 100).unwrap();
    storage.put(&files.data_path, vec![0u8; 20]);

    let err = handler.read_shuffle_data(0).unwrap_err();
    assert!(matches!(err, ShuffleError::DataLoss(_)));
}

#[test]
fn test_index_deleted_after_open_has_no_effect() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, blocks) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 5, 10);

    let mut handler = open(Arc::clone(&storage), &files, 100, 100).unwrap();
    storage.delete(&files.index_path).unwrap();

    assert_eq!(read_all_blocks(&mut handler).len(), blocks.len());
}

#[test]
fn test_offset_far_past_data_is_data_loss() {
    let temp = TempDir::new().unwrap();
    let storage: Arc<dyn ShuffleStorage> = Arc::new(LocalStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), temp.path(), "test", 0, 2, 10);

    // Move the second block a terabyte out; the batch now spans the gap
    let mut index = std::fs::read(&files.index_path).unwrap();
    index[INDEX_ENTRY_SIZE + 28..INDEX_ENTRY_SIZE + 36].copy_from_slice(&(1u64 << 40).to_le_bytes());
    std::fs::write(&files.index_path, index).unwrap();

    let mut handler = open(storage, &files, 100, 100).unwrap();
    let err = handler.read_shuffle_data(0).unwrap_err();
    assert!(matches!(err, ShuffleError::DataLoss(_)));
}

// =============================================================================
// Partial Write Tests
// =============================================================================

#[test]
fn test_partial_trailing_index_entry_ignored() {
    let storage = MemoryStorage::new();
    let shared: Arc<dyn ShuffleStorage> = Arc::new(storage.clone());
    let (files, _) = write_blocks(Arc::clone(&shared), Path::new("/mem"), "test", 0, 3, 10);

    let mut index = storage.contents(&files.index_path).unwrap();
    index.extend_from_slice(&[0xFF; 20]);
    storage.put(&files.index_path, index);

    let mut handler = open(shared, &files, 2, 1000).unwrap();
    assert_eq!(handler.block_count(), 3);
    assert_eq!(read_all_blocks(&mut handler).len(), 3);
}

#[test]
fn test_close_reopens_lazily() {
    let storage: Arc<dyn ShuffleStorage> = Arc::new(MemoryStorage::new());
    let (files, _) = write_blocks(Arc::clone(&storage), Path::new("/mem"), "test", 0, 2, 10);

    let mut handler = open(storage, &files, 100, 10).unwrap();
    assert!(handler.read_shuffle_data(0).unwrap().is_some());
    handler.close();
    assert!(handler.read_shuffle_data(1).unwrap().is_some());
}
