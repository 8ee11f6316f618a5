use crc32fast::Hasher as Crc32FastHasher;

/// Computes a 4-byte CRC32 checksum using hardware-accelerated SIMD
/// instructions when available (SSE4.2 on x86_64, NEON on ARM).
///
/// Used to frame WAL segment records so the loader can distinguish a fully
/// written record from a torn trailing one.
#[inline]
pub fn compute_checksum(data: &[u8]) -> [u8; 4] {
    let mut hasher = Crc32FastHasher::new();
    hasher.update(data);
    hasher.finalize().to_le_bytes()
}
