//! The write buffer in front of the storage engine: bounded by a soft byte
//! limit, drained via atomic snapshot swaps, and safe under concurrent
//! readers and writers.
//!
//! Lock hierarchy, outermost first: `Cache::inner` (`RwLock`), then a ring
//! shard's lock (inside `Storer`), then an `Entry`'s lock. Never acquire
//! these out of order. The coarse `inner` lock is only ever held for the
//! O(1) bookkeeping around a write or a snapshot swap — the bulk of value
//! storage and lookup happens under the much finer shard/entry locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::engine::config::CacheConfig;
use crate::engine::entry::Entry;
use crate::engine::ring::{EmptyStore, Ring, Storer};
use crate::engine::stats::{CacheStatistics, Statistic, CACHE_MEASUREMENT};
use crate::engine::value::{ValueKind, Values};
use crate::error::CacheError;

struct CacheInner {
    store: Arc<dyn Storer>,
    snapshot: Option<Box<Cache>>,
    snapshotting: bool,
    snapshot_attempts: u32,
    last_snapshot: Instant,
    last_write_time: Option<Instant>,
}

/// The in-memory write buffer. Admits writes up to `max_size` bytes, and
/// drains via [`Cache::snapshot`] into a frozen copy a compactor can read
/// while new writes keep landing in a fresh live store.
pub struct Cache {
    size: AtomicU64,
    snapshot_size: AtomicU64,
    max_size: AtomicU64,
    shard_count: usize,
    initialized: AtomicU32,
    stats: CacheStatistics,
    inner: RwLock<CacheInner>,
}

impl Cache {
    /// Equivalent to `Cache::with_config(CacheConfig { max_size, ..Default::default() })`.
    pub fn new(max_size: u64) -> Self {
        Self::with_config(CacheConfig {
            max_size,
            ..Default::default()
        })
    }

    /// Builds a cache with an uninitialized store (an [`EmptyStore`]); the
    /// real [`Ring`] is allocated lazily on first use via [`Cache::init`].
    ///
    /// # Panics
    /// Panics if `config.shard_count` is not a nonzero power of two — this
    /// is a programmer error in wiring, not a runtime condition.
    pub fn with_config(config: CacheConfig) -> Self {
        assert!(
            config.shard_count != 0 && config.shard_count.is_power_of_two(),
            "shard_count must be a nonzero power of two, got {}",
            config.shard_count
        );
        Self {
            size: AtomicU64::new(0),
            snapshot_size: AtomicU64::new(0),
            max_size: AtomicU64::new(config.max_size),
            shard_count: config.shard_count,
            initialized: AtomicU32::new(0),
            stats: CacheStatistics::default(),
            inner: RwLock::new(CacheInner {
                store: Arc::new(EmptyStore),
                snapshot: None,
                snapshotting: false,
                snapshot_attempts: 0,
                last_snapshot: Instant::now(),
                last_write_time: None,
            }),
        }
    }

    fn empty_like(&self) -> Cache {
        Cache::with_config(CacheConfig {
            max_size: self.max_size.load(Ordering::Relaxed),
            shard_count: self.shard_count,
        })
    }

    /// Allocates the real ring store on first use. Safe to call repeatedly;
    /// only the first caller after construction or [`Cache::free`] does work.
    pub fn init(&self) -> Result<(), CacheError> {
        if self
            .initialized
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let mut inner = self.inner.write().unwrap();
        inner.store = Arc::new(Ring::new(self.shard_count)?);
        Ok(())
    }

    /// Releases the ring store, replacing it with the zero-cost
    /// [`EmptyStore`] sentinel. Safe to call repeatedly.
    pub fn free(&self) {
        if self
            .initialized
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let mut inner = self.inner.write().unwrap();
        inner.store = Arc::new(EmptyStore);
        self.size.store(0, Ordering::Relaxed);
    }

    fn store_handle(&self) -> Arc<dyn Storer> {
        self.inner.read().unwrap().store.clone()
    }

    /// Admits `values` for `key`, rejecting the whole call if it would push
    /// the live store past `max_size`. `max_size == 0` means unbounded.
    pub fn write(&self, key: &[u8], values: Values) -> Result<(), CacheError> {
        let mut single = HashMap::with_capacity(1);
        single.insert(key.to_vec(), values);
        self.write_multi(single)
    }

    /// Admits a batch atomically with respect to the size check: the whole
    /// batch's size is checked against `max_size` up front, then each key is
    /// written; a per-key failure (field-type conflict) rolls back that
    /// key's contribution to the size accounting and is recorded in
    /// `write_err`/`write_dropped`. The rest of the batch still commits, but
    /// the first per-key error is surfaced to the caller.
    pub fn write_multi(&self, values: HashMap<Vec<u8>, Values>) -> Result<(), CacheError> {
        self.init()?;
        let value_bytes: u64 = values.values().map(|v| v.size() as u64).sum();

        let max = self.max_size.load(Ordering::Relaxed);
        self.increase_size(value_bytes);
        // Admission is checked against live + outstanding-snapshot bytes, so
        // a snapshot awaiting compaction still exerts backpressure.
        let new_total = self.size();
        if max > 0 && new_total > max {
            self.decrease_size(value_bytes);
            self.stats.write_err.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::MemorySizeLimitExceeded {
                current: new_total,
                max,
            });
        }

        let store = self.store_handle();
        let mut store_errors = 0u64;
        let mut first_err = None;
        for (key, vals) in values {
            let written_size = vals.size() as u64;
            match store.write(&key, vals) {
                Ok(true) => {
                    // New key: the accounted size must also cover the key
                    // bytes themselves, not just the value payload.
                    self.increase_size(key.len() as u64);
                }
                Ok(false) => {}
                Err(e) => {
                    self.decrease_size(written_size);
                    store_errors += 1;
                    debug!(error = %e, "dropping batch entry after field-type conflict");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if store_errors > 0 {
            self.stats.write_dropped.fetch_add(store_errors as i64, Ordering::Relaxed);
            self.stats.write_err.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.write_ok.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.write().unwrap();
        inner.last_write_time = Some(Instant::now());
        drop(inner);

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(())
    }

    /// Atomically swaps the live store for a fresh empty one, making the
    /// previous live store a read-only snapshot.
    ///
    /// If a snapshot is already outstanding and non-empty, this returns `Ok`
    /// without swapping again — the caller (a compactor) is expected to
    /// retry the same snapshot it already has. Only an outstanding-but-empty
    /// snapshot (a genuine double-call) fails with
    /// [`CacheError::SnapshotInProgress`].
    pub fn snapshot(&self) -> Result<(), CacheError> {
        self.init()?;
        let mut inner = self.inner.write().unwrap();

        if inner.snapshotting {
            inner.snapshot_attempts += 1;
            let non_empty = inner
                .snapshot
                .as_ref()
                .map(|s| s.count() > 0)
                .unwrap_or(false);
            if non_empty {
                return Ok(());
            }
            return Err(CacheError::SnapshotInProgress);
        }

        inner.snapshotting = true;
        let mut empty = self.empty_like();
        empty.init()?;

        {
            let mut empty_inner = empty.inner.write().unwrap();
            std::mem::swap(&mut inner.store, &mut empty_inner.store);
        }

        let snapshot_size = self.size.swap(0, Ordering::AcqRel);
        self.snapshot_size.store(snapshot_size, Ordering::Release);
        // The child cache's own `size` must reflect the frozen bytes too,
        // so its own Size() and a failed-compaction restore both see them.
        empty.size.store(snapshot_size, Ordering::Release);

        inner.snapshot = Some(Box::new(empty));
        inner.last_snapshot = Instant::now();
        self.update_snapshots_locked();

        info!(bytes = snapshot_size, "cache snapshot taken");
        Ok(())
    }

    /// Finalizes (`success = true`) or discards (`success = false`) the
    /// current snapshot. On success, the snapshot's memory is released. On
    /// failure, the snapshot's store is merged back in as the new live store
    /// so none of its data is lost.
    pub fn clear_snapshot(&self, success: bool) -> Result<(), CacheError> {
        let mut inner = self.inner.write().unwrap();
        let Some(snapshot) = inner.snapshot.take() else {
            inner.snapshotting = false;
            return Ok(());
        };

        if success {
            self.snapshot_size.store(0, Ordering::Release);
        } else {
            let failed_store = snapshot.store_handle();
            let restored_size = snapshot.size.load(Ordering::Relaxed);
            let mut wrapped = self.empty_like();
            wrapped.init()?;
            {
                let mut wrapped_inner = wrapped.inner.write().unwrap();
                wrapped_inner.store = failed_store;
            }
            inner.store = wrapped.store_handle();
            self.size.fetch_add(restored_size, Ordering::AcqRel);
            self.snapshot_size.store(0, Ordering::Release);
        }

        inner.snapshotting = false;
        inner.snapshot_attempts = 0;
        Ok(())
    }

    fn update_snapshots_locked(&self) {
        self.stats.snapshot_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .cached_bytes
            .store(self.snapshot_size.load(Ordering::Relaxed) as i64, Ordering::Relaxed);
    }

    /// Merges snapshot and live values for `key`, deduplicating the result.
    pub fn values(&self, key: &[u8]) -> Values {
        let inner = self.inner.read().unwrap();
        let mut combined = Values::default();

        if let Some(snapshot) = &inner.snapshot
            && let Some(entry) = snapshot.store_handle().entry(key)
        {
            combined.extend(entry.snapshot_values());
        }
        if let Some(entry) = inner.store.entry(key) {
            combined.extend(entry.snapshot_values());
        }
        drop(inner);

        combined.deduplicate();
        combined
    }

    /// The field type for `key`, checked live store first, then snapshot.
    pub fn field_type(&self, key: &[u8]) -> Result<ValueKind, CacheError> {
        let inner = self.inner.read().unwrap();
        if let Some(entry) = inner.store.entry(key) {
            return entry.influxql_type();
        }
        if let Some(snapshot) = &inner.snapshot
            && let Some(entry) = snapshot.store_handle().entry(key)
        {
            return entry.influxql_type();
        }
        Ok(ValueKind::Unknown)
    }

    pub fn keys(&self, sorted: bool) -> Vec<Vec<u8>> {
        self.store_handle().keys(sorted)
    }

    pub fn count(&self) -> usize {
        self.store_handle().count()
    }

    /// Live bytes plus any outstanding snapshot's frozen bytes — the total
    /// that `max_size` admission guards against.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed) + self.snapshot_size.load(Ordering::Relaxed)
    }

    fn increase_size(&self, delta: u64) -> u64 {
        self.size.fetch_add(delta, Ordering::AcqRel) + delta
    }

    fn decrease_size(&self, delta: u64) {
        // Two's-complement negation lets a single fetch_add express
        // subtraction without a separate fetch_sub racing the adds above.
        self.size
            .fetch_add((!delta).wrapping_add(1), Ordering::AcqRel);
    }

    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Relaxed)
    }

    pub fn set_max_size(&self, max_size: u64) {
        self.max_size.store(max_size, Ordering::Relaxed);
    }

    /// Partitions the live store into `n` disjoint caches, each carrying a
    /// proportional share of `max_size`. Used ahead of parallel compaction.
    pub fn split(&self, n: usize) -> Vec<Cache> {
        if n == 0 {
            return Vec::new();
        }
        let store = self.store_handle();
        let parts = store.split(n);
        let per_part_max = self.max_size.load(Ordering::Relaxed) / n as u64;
        parts
            .into_iter()
            .map(|p| {
                let c = Self::with_config(CacheConfig {
                    max_size: per_part_max,
                    shard_count: self.shard_count,
                });
                c.initialized.store(1, Ordering::Relaxed);
                c.size.store(p.count() as u64, Ordering::Relaxed);
                c.inner.write().unwrap().store = p;
                c
            })
            .collect()
    }

    pub fn delete(&self, key: &[u8]) {
        self.delete_range(key, i64::MIN, i64::MAX);
    }

    pub fn delete_range(&self, key: &[u8], min: i64, max: i64) {
        let store = self.store_handle();
        if let Some(entry) = store.entry(key) {
            let orig_size = entry.size() as u64;
            entry.filter(min, max);
            if entry.count() == 0 {
                store.remove(key);
                self.decrease_size(orig_size + key.len() as u64);
            } else {
                let new_size = entry.size() as u64;
                self.decrease_size(orig_size.saturating_sub(new_size));
            }
        }
    }

    /// Applies dedup-and-sort to every entry in the live store.
    pub fn deduplicate(&self) {
        let store = self.store_handle();
        let _ = store.apply(&|_key, entry| {
            entry.deduplicate();
            Ok(())
        });
    }

    /// Runs `f` over every live entry, in parallel across shards. Returns
    /// the first error seen, after still visiting every entry. Intended for
    /// callers outside this crate that need a custom per-entry pass (e.g. a
    /// compactor collecting candidates) without reaching into `Ring`.
    pub fn apply_entry_fn(
        &self,
        f: &(dyn Fn(&[u8], &Entry) -> Result<(), CacheError> + Sync),
    ) -> Result<(), CacheError> {
        self.store_handle().apply(f)
    }

    pub fn last_write_time(&self) -> Option<Instant> {
        self.inner.read().unwrap().last_write_time
    }

    pub fn update_age(&self) {
        let inner = self.inner.read().unwrap();
        let age = Instant::now().saturating_duration_since(inner.last_snapshot);
        self.stats
            .cache_age_ms
            .store(age.as_millis() as i64, Ordering::Relaxed);
    }

    pub fn update_compact_time(&self, duration: Duration) {
        self.stats
            .wal_compaction_time_ms
            .fetch_add(duration.as_millis() as i64, Ordering::Relaxed);
    }

    pub fn statistics(&self, tags: HashMap<String, String>) -> Statistic {
        self.stats
            .mem_size_bytes
            .store(self.size.load(Ordering::Relaxed) as i64, Ordering::Relaxed);
        Statistic {
            name: CACHE_MEASUREMENT,
            tags,
            values: self.stats.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::Value;

    fn values(ts: i64, v: f64) -> Values {
        Values::new(vec![Value::Float {
            timestamp: ts,
            value: v,
        }])
    }

    #[test]
    fn write_then_read_back_merges_nothing_extra() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.write(b"cpu", values(2, 2.0)).unwrap();
        assert_eq!(cache.values(b"cpu").len(), 2);
    }

    #[test]
    fn write_rejected_when_over_max_size() {
        let cache = Cache::new(10);
        let err = cache.write(b"cpu", values(1, 1.0)).unwrap_err();
        assert!(matches!(err, CacheError::MemorySizeLimitExceeded { .. }));
        assert_eq!(cache.size(), 0, "rejected write must not inflate size");
    }

    #[test]
    fn snapshot_moves_live_data_out_but_keeps_it_accounted() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        let size_before = cache.size();
        cache.snapshot().unwrap();
        // The bytes move from live to frozen, but size() keeps counting them
        // until the snapshot is cleared.
        assert_eq!(cache.size(), size_before);
        assert_eq!(cache.values(b"cpu").len(), 1, "snapshot must still be readable");
        assert!(size_before > 0);
    }

    #[test]
    fn clear_snapshot_success_drops_snapshot_data() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.snapshot().unwrap();
        cache.clear_snapshot(true).unwrap();
        assert_eq!(cache.values(b"cpu").len(), 0);
    }

    #[test]
    fn clear_snapshot_failure_restores_data_to_live() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.snapshot().unwrap();
        cache.clear_snapshot(false).unwrap();
        assert_eq!(cache.values(b"cpu").len(), 1);
        assert!(cache.size() > 0);
    }

    #[test]
    fn writes_during_snapshot_land_in_fresh_live_store() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.snapshot().unwrap();
        cache.write(b"cpu", values(2, 2.0)).unwrap();
        assert_eq!(cache.values(b"cpu").len(), 2, "merge must see both snapshot and live values");
    }

    #[test]
    fn delete_range_removes_only_matching_points() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.write(b"cpu", values(5, 5.0)).unwrap();
        cache.delete_range(b"cpu", 0, 3);
        assert_eq!(cache.values(b"cpu").as_slice(), &[Value::Float { timestamp: 5, value: 5.0 }]);
    }

    #[test]
    fn delete_removes_whole_key() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.delete(b"cpu");
        assert_eq!(cache.values(b"cpu").len(), 0);
    }

    #[test]
    fn split_preserves_total_point_count() {
        let cache = Cache::new(0);
        for k in [b"a".as_slice(), b"b", b"c", b"d"] {
            cache.write(k, values(1, 1.0)).unwrap();
        }
        let parts = cache.split(2);
        let total: usize = parts.iter().map(|p| p.count()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn free_resets_size_and_count() {
        let cache = Cache::new(0);
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        cache.free();
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.size(), 0);
        // Re-initializes transparently on next write.
        cache.write(b"cpu", values(1, 1.0)).unwrap();
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn apply_entry_fn_visits_every_live_entry() {
        let cache = Cache::new(0);
        for k in [b"a".as_slice(), b"b", b"c"] {
            cache.write(k, values(1, 1.0)).unwrap();
        }
        let visited = std::sync::atomic::AtomicUsize::new(0);
        cache
            .apply_entry_fn(&|_key, _entry| {
                visited.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
        assert_eq!(visited.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn second_snapshot_before_clear_returns_ok_without_reswapping() {
        let cache = Cache::new(0);
        cache.write(b"a", values(1, 1.0)).unwrap();
        cache.snapshot().unwrap();
        assert!(cache.snapshot().is_ok());
        assert_eq!(cache.values(b"a").len(), 1);
    }
}
