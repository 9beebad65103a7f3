//! Index entry codec

use crate::block_id::BlockId;
use crate::error::{Result, ShuffleError};

/// Length (4) + UncompressedLength (4) + CRC (4) + BlockId (8)
/// + TaskAttemptId (8) + Offset (8) = 36 bytes
pub const INDEX_ENTRY_SIZE: usize = 36;

/// Metadata of one block plus where its payload starts in the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub length: u32,
    pub uncompressed_length: u32,
    pub crc: u32,
    pub block_id: BlockId,
    pub task_attempt_id: u64,
    pub offset: u64,
}

impl IndexEntry {
    /// Offset one past the last payload byte; `None` if it does not fit a u64
    pub fn end_offset(&self) -> Option<u64> {
        self.offset.checked_add(self.length as u64)
    }

    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.uncompressed_length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc.to_le_bytes());
        buf[12..20].copy_from_slice(&self.block_id.as_u64().to_le_bytes());
        buf[20..28].copy_from_slice(&self.task_attempt_id.to_le_bytes());
        buf[28..36].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.encode());
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_ENTRY_SIZE {
            return Err(ShuffleError::IndexCorruption(format!(
                "index entry needs {} bytes, got {}",
                INDEX_ENTRY_SIZE,
                bytes.len()
            )));
        }

        Ok(Self::from_chunk(bytes))
    }

    /// Caller guarantees `chunk` holds at least one whole entry
    fn from_chunk(chunk: &[u8]) -> Self {
        Self {
            length: read_u32(chunk, 0),
            uncompressed_length: read_u32(chunk, 4),
            crc: read_u32(chunk, 8),
            block_id: BlockId::from_raw(read_u64(chunk, 12)),
            task_attempt_id: read_u64(chunk, 20),
            offset: read_u64(chunk, 28),
        }
    }
}

/// Decode every complete entry in `bytes`.
///
/// Returns the entries and the number of trailing bytes that did not form a
/// whole entry (left behind by an interrupted index append).
pub fn decode_index_entries(bytes: &[u8]) -> (Vec<IndexEntry>, usize) {
    let chunks = bytes.chunks_exact(INDEX_ENTRY_SIZE);
    let trailing = chunks.remainder().len();
    let entries = chunks.map(IndexEntry::from_chunk).collect();
    (entries, trailing)
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(bytes)
}
