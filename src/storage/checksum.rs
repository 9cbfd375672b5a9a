//! CRC32 checksum for persisted key-value records
//!
//! Every record read from the backend is checksum-verified. A mismatch on a
//! foreground read fails the read; during restore it refuses startup.

use crc32fast::Hasher;

/// Computes a CRC32 (IEEE) checksum over `data`.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
