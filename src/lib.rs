//! # Cache
//!
//! An in-memory, size-bounded write buffer for time-series points, sitting
//! in front of whatever durable storage engine compacts it out to disk.
//!
//! - **Sharded concurrent storage**: keys are routed across a fixed set of
//!   shards by a fast non-cryptographic hash, so unrelated keys rarely
//!   contend on the same lock.
//! - **Atomic snapshotting**: [`Cache::snapshot`] swaps the live store for a
//!   fresh one in O(1), handing the old store to a compactor as a read-only
//!   snapshot while new writes keep landing.
//! - **WAL replay**: [`CacheLoader`] rebuilds a cache from write-ahead log
//!   segments on startup, tolerating a torn trailing record left by an
//!   unclean shutdown.
//!
//! ## Example
//! ```rust
//! use cache::Cache;
//! use cache::{Value, Values};
//!
//! let cache = Cache::new(0);
//! cache
//!     .write(b"cpu,host=a", Values::new(vec![Value::Float { timestamp: 1, value: 64.2 }]))
//!     .unwrap();
//! assert_eq!(cache.values(b"cpu,host=a").len(), 1);
//! ```

mod digest;
mod engine;
mod error;

pub use engine::{
    Cache, CacheConfig, CacheLoader, CacheStatistics, EmptyStore, Entry, Ring, SegmentReader,
    Statistic, Storer, Value, ValueKind, Values, WalRecord, CACHE_MEASUREMENT, RING_SHARDS,
};
pub use error::CacheError;

#[cfg(any(test, debug_assertions))]
pub use engine::WalSegmentWriter;

pub use digest::{compute_checksum, compute_hash, Xxh3BuildHasher, Xxh3Hasher};
