//! Shard Read Handler
//!
//! Reads one shard's index completely at open, plans bounded batched reads,
//! and reads each batch from the data file on demand.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, ShuffleError};
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::storage::{ReadHandle, ShardFiles, ShuffleStorage};

use super::{decode_index_entries, BufferSegment, FileSegment, IndexEntry, ShuffleDataResult, INDEX_ENTRY_SIZE};

/// Reader for one shard's data/index pair
pub struct ShardReadHandler {
    storage: Arc<dyn ShuffleStorage>,
    files: ShardFiles,
    retry: RetryPolicy,
    /// Planned batches, in data file order
    data_segments: Vec<FileSegment>,
    block_count: usize,
    /// Data file handle, opened at the first payload read
    data_reader: Option<Box<dyn ReadHandle>>,
}

impl ShardReadHandler {
    /// Open a shard and cache its whole index
    ///
    /// Returns `Ok(None)` when the shard is absent: the data file is missing,
    /// the index vanished before it could be read, or the index is corrupt.
    pub fn open(
        storage: Arc<dyn ShuffleStorage>,
        files: ShardFiles,
        index_read_limit: usize,
        read_buffer_size: usize,
        retry: RetryPolicy,
    ) -> Result<Option<Self>> {
        let data_exists = retry_with_backoff(&retry, "check data file", || {
            storage.exists(&files.data_path)
        })
        .map_err(|e| e.into_shuffle_error(format!("check {}", files.data_path.display())))?;

        if !data_exists {
            warn!(data = %files.data_path.display(), "Data file missing, skipping shard");
            return Ok(None);
        }

        let entries = match read_index(storage.as_ref(), &files, index_read_limit, &retry) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                warn!(index = %files.index_path.display(), "Index file missing, skipping shard");
                return Ok(None);
            }
            Err(e) if e.is_unexpected_eof() => {
                warn!(index = %files.index_path.display(), "Index file shrank while reading, skipping shard");
                return Ok(None);
            }
            Err(e) => {
                return Err(e.into_shuffle_error(format!("read {}", files.index_path.display())))
            }
        };

        let data_segments = match plan_file_segments(&entries, read_buffer_size, index_read_limit) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(index = %files.index_path.display(), error = %e, "Unreadable index, skipping shard");
                return Ok(None);
            }
        };

        debug!(
            shard = %files.shard_name,
            file_index = files.file_index,
            blocks = entries.len(),
            segments = data_segments.len(),
            "Loaded shard index"
        );

        Ok(Some(Self {
            storage,
            files,
            retry,
            data_segments,
            block_count: entries.len(),
            data_reader: None,
        }))
    }

    /// Read batch `segment_index`; `Ok(None)` past the last batch
    ///
    /// The index proved these bytes were written, so a data file that has
    /// since disappeared or shrunk is data loss.
    pub fn read_shuffle_data(&mut self, segment_index: usize) -> Result<Option<ShuffleDataResult>> {
        let Some(segment) = self.data_segments.get(segment_index) else {
            return Ok(None);
        };
        let offset = segment.offset;
        let length = segment.length;
        let buffer_segments = segment.buffer_segments.clone();

        let data_path = self.files.data_path.clone();
        let block_count = self.block_count;
        let data_loss = |e: RetryError| match e {
            RetryError::Permanent(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                ShuffleError::DataLoss(format!(
                    "expected {} bytes at offset {} of {} holding {} indexed blocks: {}",
                    length,
                    offset,
                    data_path.display(),
                    block_count,
                    io
                ))
            }
            other => other.into_shuffle_error(format!("read {}", data_path.display())),
        };

        if self.data_reader.is_none() {
            let storage = &self.storage;
            let reader = retry_with_backoff(&self.retry, "open data file", || {
                storage.open_read(&self.files.data_path)
            })
            .map_err(&data_loss)?;
            self.data_reader = Some(reader);
        }

        let retry = &self.retry;
        let buffer = match self.data_reader.as_mut() {
            Some(reader) => {
                retry_with_backoff(retry, "read data file", || reader.read_at(offset, length))
                    .map_err(&data_loss)?
            }
            None => return Ok(None),
        };

        debug!(
            shard = %self.files.shard_name,
            segment_index,
            offset,
            length,
            blocks = buffer_segments.len(),
            "Read shuffle data segment"
        );

        Ok(Some(ShuffleDataResult::new(buffer, buffer_segments)))
    }

    /// Release the data file handle
    pub fn close(&mut self) {
        self.data_reader = None;
    }

    pub fn segment_count(&self) -> usize {
        self.data_segments.len()
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn file_segments(&self) -> &[FileSegment] {
        &self.data_segments
    }

    pub fn files(&self) -> &ShardFiles {
        &self.files
    }
}

/// Read every complete index entry, `limit` entries per storage read
fn read_index(
    storage: &dyn ShuffleStorage,
    files: &ShardFiles,
    limit: usize,
    retry: &RetryPolicy,
) -> std::result::Result<Vec<IndexEntry>, RetryError> {
    let mut reader = retry_with_backoff(retry, "open index file", || storage.open_read(&files.index_path))?;
    let size = retry_with_backoff(retry, "stat index file", || reader.size())?;

    let whole = size - size % INDEX_ENTRY_SIZE as u64;
    if whole != size {
        warn!(
            index = %files.index_path.display(),
            trailing_bytes = size - whole,
            "Ignoring partial trailing index entry"
        );
    }

    let chunk_bytes = limit.max(1).saturating_mul(INDEX_ENTRY_SIZE) as u64;
    let mut entries = Vec::with_capacity((whole / INDEX_ENTRY_SIZE as u64) as usize);
    let mut offset = 0u64;
    while offset < whole {
        let length = chunk_bytes.min(whole - offset) as usize;
        let bytes = retry_with_backoff(retry, "read index file", || reader.read_at(offset, length))?;
        let (chunk, _) = decode_index_entries(&bytes);
        entries.extend(chunk);
        offset += length as u64;
    }

    Ok(entries)
}

/// Group index entries into batched reads.
///
/// Entries are taken in order and at most `index_read_limit` at a time; a
/// batch closes once its payload reaches `read_buffer_size` bytes or at the
/// end of each group of `index_read_limit` entries. A single block larger
/// than the threshold forms its own batch. Offsets must not go backwards.
pub fn plan_file_segments(
    entries: &[IndexEntry],
    read_buffer_size: usize,
    index_read_limit: usize,
) -> Result<Vec<FileSegment>> {
    let mut segments = Vec::new();
    let mut previous_end = 0u64;

    for group in entries.chunks(index_read_limit.max(1)) {
        let mut start = 0u64;
        let mut end = 0u64;
        let mut payload = 0usize;
        let mut current: Vec<BufferSegment> = Vec::new();

        for entry in group {
            let Some(entry_end) = entry.end_offset() else {
                return Err(ShuffleError::IndexCorruption(format!(
                    "block {} at offset {} with {} bytes ends past the largest file offset",
                    entry.block_id.as_u64(),
                    entry.offset,
                    entry.length
                )));
            };
            if entry.offset < previous_end {
                return Err(ShuffleError::IndexCorruption(format!(
                    "block {} starts at {} before the previous block ends at {}",
                    entry.block_id.as_u64(),
                    entry.offset,
                    previous_end
                )));
            }
            previous_end = entry_end;

            if current.is_empty() {
                start = entry.offset;
            }
            current.push(BufferSegment {
                offset: (entry.offset - start) as usize,
                length: entry.length as usize,
                block_id: entry.block_id,
                task_attempt_id: entry.task_attempt_id,
                crc: entry.crc,
                uncompressed_length: entry.uncompressed_length,
            });
            end = entry_end;
            payload += entry.length as usize;

            if payload >= read_buffer_size {
                segments.push(FileSegment {
                    offset: start,
                    length: span_length(start, end)?,
                    buffer_segments: std::mem::take(&mut current),
                });
                payload = 0;
            }
        }

        if !current.is_empty() {
            segments.push(FileSegment {
                offset: start,
                length: span_length(start, end)?,
                buffer_segments: current,
            });
        }
    }

    Ok(segments)
}

/// Byte length of a batch spanning `start..end`
fn span_length(start: u64, end: u64) -> Result<usize> {
    usize::try_from(end - start).map_err(|_| {
        ShuffleError::IndexCorruption(format!(
            "batch {}..{} does not fit in memory",
            start, end
        ))
    })
}
