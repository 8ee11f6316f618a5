//! Cache statistics, exposed the way the original exposed expvar-style
//! counters: a fixed set of named atomic counters snapshotted on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Measurement name these statistics would be reported under by a metrics
/// sink (mirrors the original `measurementCache` constant).
pub const CACHE_MEASUREMENT: &str = "tsm1_cache";

/// Monotonic counters tracking cache behavior since process start. All
/// fields are independently atomic; a snapshot via [`CacheStatistics::snapshot`]
/// is not a consistent point-in-time view across fields, matching the
/// original's use of plain `atomic.LoadInt64` per field.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    pub mem_size_bytes: AtomicI64,
    pub disk_size_bytes: AtomicI64,
    pub snapshot_count: AtomicI64,
    pub cache_age_ms: AtomicI64,
    pub cached_bytes: AtomicI64,
    pub wal_compaction_time_ms: AtomicI64,
    pub write_ok: AtomicI64,
    pub write_err: AtomicI64,
    pub write_dropped: AtomicI64,
}

impl CacheStatistics {
    /// Snapshots every counter into the original's field-name vocabulary.
    pub fn snapshot(&self) -> HashMap<&'static str, i64> {
        let mut m = HashMap::with_capacity(9);
        m.insert("memBytes", self.mem_size_bytes.load(Ordering::Relaxed));
        m.insert("diskBytes", self.disk_size_bytes.load(Ordering::Relaxed));
        m.insert("snapshotCount", self.snapshot_count.load(Ordering::Relaxed));
        m.insert("cacheAgeMs", self.cache_age_ms.load(Ordering::Relaxed));
        m.insert("cachedBytes", self.cached_bytes.load(Ordering::Relaxed));
        m.insert(
            "WALCompactionTimeMs",
            self.wal_compaction_time_ms.load(Ordering::Relaxed),
        );
        m.insert("writeOk", self.write_ok.load(Ordering::Relaxed));
        m.insert("writeErr", self.write_err.load(Ordering::Relaxed));
        m.insert("writeDropped", self.write_dropped.load(Ordering::Relaxed));
        m
    }
}

/// A tagged statistics snapshot, the unit a monitoring subsystem would
/// collect and ship.
#[derive(Debug, Clone)]
pub struct Statistic {
    pub name: &'static str,
    pub tags: HashMap<String, String>,
    pub values: HashMap<&'static str, i64>,
}
