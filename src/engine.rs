pub mod cache;
pub mod config;
pub mod entry;
pub mod loader;
pub mod ring;
pub mod stats;
pub mod value;
pub mod wal;

pub use cache::Cache;
pub use config::CacheConfig;
pub use entry::Entry;
pub use loader::CacheLoader;
pub use ring::{EmptyStore, Ring, Storer, RING_SHARDS};
pub use stats::{CacheStatistics, Statistic, CACHE_MEASUREMENT};
pub use value::{Value, ValueKind, Values};
pub use wal::{SegmentReader, WalRecord, WalSegmentReader};

#[cfg(any(test, debug_assertions))]
pub use wal::WalSegmentWriter;
