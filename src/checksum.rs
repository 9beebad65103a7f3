//! Block checksums

/// Function used to checksum a block payload
pub type ChecksumFn = fn(&[u8]) -> u32;

/// CRC32 (IEEE) of a payload
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
