use xxhash_rust::xxh3::xxh3_64;

/// Key hash used to route a series key to a ring shard and to tag WAL
/// records. Not required to be stable across process restarts.
#[inline]
pub fn compute_hash(key: &[u8]) -> u64 {
    xxh3_64(key)
}
