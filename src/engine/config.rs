//! Cache construction knobs beyond the single `maxSize` parameter the
//! original constructor took.

use crate::engine::ring::RING_SHARDS;

/// Configuration for [`crate::engine::cache::Cache::with_config`].
///
/// `Cache::new(max_size)` remains the primary constructor and is equivalent
/// to `Cache::with_config(CacheConfig { max_size, ..Default::default() })`.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Soft cap, in bytes, on live-store size. `0` means unbounded.
    pub max_size: u64,
    /// Number of shards in the ring store. Must be a nonzero power of two.
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            shard_count: RING_SHARDS,
        }
    }
}
