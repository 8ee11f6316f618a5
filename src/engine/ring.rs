//! The sharded store: a fixed array of `(RwLock, HashMap)` shards routed by
//! key hash, plus the empty sentinel used before `Cache::init` and after
//! `Cache::free`.
//!
//! Deliberately not a generic concurrent map (`DashMap` et al.) — per the
//! design notes, the working set is bounded by `maxSize`, so global-resizing
//! concurrent maps buy nothing here and a fixed shard array keeps the lock
//! hierarchy simple: shard lock, then (inside `Entry`) the per-key lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::digest::compute_hash;
use crate::engine::entry::Entry;
use crate::engine::value::Values;
use crate::error::CacheError;

/// Default ring shard count. Must be a power of two; empirically, a value
/// larger than the host's core count buys nothing.
pub const RING_SHARDS: usize = 16;

/// The storage interface `Cache` depends on. Exactly two implementations
/// exist: [`Ring`] and [`EmptyStore`] — an interface with two concrete
/// bodies, not an open-ended runtime type registry.
pub trait Storer: Send + Sync {
    fn entry(&self, key: &[u8]) -> Option<Arc<Entry>>;
    /// Upsert. Returns `true` if this call created a new key.
    fn write(&self, key: &[u8], values: Values) -> Result<bool, CacheError>;
    /// Unconditional set, used to move entries wholesale (snapshot split).
    fn add(&self, key: Vec<u8>, entry: Arc<Entry>);
    fn remove(&self, key: &[u8]);
    fn keys(&self, sorted: bool) -> Vec<Vec<u8>>;
    /// Invokes `f` on every entry in parallel across shards. Visits all
    /// entries regardless of failures; returns the first error seen.
    fn apply(
        &self,
        f: &(dyn Fn(&[u8], &Entry) -> Result<(), CacheError> + Sync),
    ) -> Result<(), CacheError>;
    /// Same contract, but serialized and fails fast on the first error.
    fn apply_serial(
        &self,
        f: &mut dyn FnMut(&[u8], &Entry) -> Result<(), CacheError>,
    ) -> Result<(), CacheError>;
    fn reset(&self);
    /// Partitions the logical key set into `n` disjoint stores. Shard
    /// layout need not be preserved across the split.
    fn split(&self, n: usize) -> Vec<Arc<dyn Storer>>;
    fn count(&self) -> usize;
}

#[derive(Default)]
struct Shard {
    data: RwLock<HashMap<Vec<u8>, Arc<Entry>>>,
}

pub struct Ring {
    shards: Vec<Shard>,
    mask: u64,
}

impl Ring {
    pub fn new(shard_count: usize) -> Result<Self, CacheError> {
        if shard_count == 0 || !shard_count.is_power_of_two() {
            return Err(CacheError::InvalidShardCount(shard_count));
        }
        Ok(Self {
            shards: (0..shard_count).map(|_| Shard::default()).collect(),
            mask: (shard_count as u64) - 1,
        })
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        let idx = (compute_hash(key) & self.mask) as usize;
        &self.shards[idx]
    }
}

impl Storer for Ring {
    fn entry(&self, key: &[u8]) -> Option<Arc<Entry>> {
        self.shard_for(key).data.read().unwrap().get(key).cloned()
    }

    fn write(&self, key: &[u8], values: Values) -> Result<bool, CacheError> {
        let shard = self.shard_for(key);
        let guard = shard.data.read().unwrap();
        if let Some(existing) = guard.get(key) {
            existing.add(values)?;
            return Ok(false);
        }
        drop(guard);

        let mut guard = shard.data.write().unwrap();
        // Re-check: another writer may have raced us between the read lock
        // release above and acquiring the write lock.
        if let Some(existing) = guard.get(key) {
            existing.add(values)?;
            return Ok(false);
        }
        let entry = Arc::new(Entry::new(values)?);
        guard.insert(key.to_vec(), entry);
        Ok(true)
    }

    fn add(&self, key: Vec<u8>, entry: Arc<Entry>) {
        let shard = self.shard_for(&key);
        shard.data.write().unwrap().insert(key, entry);
    }

    fn remove(&self, key: &[u8]) {
        self.shard_for(key).data.write().unwrap().remove(key);
    }

    fn keys(&self, sorted: bool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.data.read().unwrap().keys().cloned());
        }
        if sorted {
            out.sort();
        }
        out
    }

    fn apply(
        &self,
        f: &(dyn Fn(&[u8], &Entry) -> Result<(), CacheError> + Sync),
    ) -> Result<(), CacheError> {
        let mut first_err = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| {
                    scope.spawn(move || {
                        let guard = shard.data.read().unwrap();
                        let mut err = None;
                        for (key, entry) in guard.iter() {
                            if let Err(e) = f(key, entry) {
                                if err.is_none() {
                                    err = Some(e);
                                }
                            }
                        }
                        err
                    })
                })
                .collect();
            for handle in handles {
                if let Some(e) = handle.join().unwrap()
                    && first_err.is_none()
                {
                    first_err = Some(e);
                }
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply_serial(
        &self,
        f: &mut dyn FnMut(&[u8], &Entry) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        for shard in &self.shards {
            let guard = shard.data.read().unwrap();
            for (key, entry) in guard.iter() {
                f(key, entry)?;
            }
        }
        Ok(())
    }

    fn reset(&self) {
        for shard in &self.shards {
            shard.data.write().unwrap().clear();
        }
    }

    fn split(&self, n: usize) -> Vec<Arc<dyn Storer>> {
        if n == 0 {
            return Vec::new();
        }
        let rings: Vec<Ring> = (0..n)
            .map(|_| Ring::new(RING_SHARDS).expect("RING_SHARDS is a compile-time power of two"))
            .collect();
        for shard in &self.shards {
            let guard = shard.data.read().unwrap();
            for (key, entry) in guard.iter() {
                let idx = (compute_hash(key) as usize) % n;
                rings[idx].add(key.clone(), entry.clone());
            }
        }
        rings
            .into_iter()
            .map(|r| Arc::new(r) as Arc<dyn Storer>)
            .collect()
    }

    fn count(&self) -> usize {
        self.shards.iter().map(|s| s.data.read().unwrap().len()).sum()
    }
}

/// No-op store used before `Cache::init` allocates a real [`Ring`] and after
/// `Cache::free` tears one down. Avoids branch-on-null in every hot-path
/// method.
pub struct EmptyStore;

impl Storer for EmptyStore {
    fn entry(&self, _key: &[u8]) -> Option<Arc<Entry>> {
        None
    }

    fn write(&self, _key: &[u8], _values: Values) -> Result<bool, CacheError> {
        Ok(false)
    }

    fn add(&self, _key: Vec<u8>, _entry: Arc<Entry>) {}

    fn remove(&self, _key: &[u8]) {}

    fn keys(&self, _sorted: bool) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn apply(
        &self,
        _f: &(dyn Fn(&[u8], &Entry) -> Result<(), CacheError> + Sync),
    ) -> Result<(), CacheError> {
        Ok(())
    }

    fn apply_serial(
        &self,
        _f: &mut dyn FnMut(&[u8], &Entry) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    fn reset(&self) {}

    fn split(&self, _n: usize) -> Vec<Arc<dyn Storer>> {
        Vec::new()
    }

    fn count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::Value;

    fn values(ts: i64) -> Values {
        Values::new(vec![Value::Integer {
            timestamp: ts,
            value: ts,
        }])
    }

    #[test]
    fn rejects_non_power_of_two_shard_count() {
        assert!(matches!(
            Ring::new(3),
            Err(CacheError::InvalidShardCount(3))
        ));
    }

    #[test]
    fn write_reports_new_key_then_append() {
        let ring = Ring::new(4).unwrap();
        assert!(ring.write(b"cpu", values(1)).unwrap());
        assert!(!ring.write(b"cpu", values(2)).unwrap());
        assert_eq!(ring.entry(b"cpu").unwrap().count(), 2);
    }

    #[test]
    fn keys_sorted_is_lexicographic() {
        let ring = Ring::new(4).unwrap();
        ring.write(b"b", values(1)).unwrap();
        ring.write(b"a", values(1)).unwrap();
        ring.write(b"c", values(1)).unwrap();
        assert_eq!(
            ring.keys(true),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn reset_clears_all_shards() {
        let ring = Ring::new(4).unwrap();
        ring.write(b"a", values(1)).unwrap();
        ring.reset();
        assert_eq!(ring.count(), 0);
        assert!(ring.entry(b"a").is_none());
    }

    #[test]
    fn split_preserves_every_key_disjointly() {
        let ring = Ring::new(4).unwrap();
        for k in [b"a".as_slice(), b"b", b"c", b"d", b"e"] {
            ring.write(k, values(1)).unwrap();
        }
        let parts = ring.split(3);
        let total: usize = parts.iter().map(|p| p.count()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn apply_visits_every_entry_and_reports_first_error() {
        let ring = Ring::new(4).unwrap();
        for k in [b"a".as_slice(), b"b", b"c"] {
            ring.write(k, values(1)).unwrap();
        }
        let visited = std::sync::atomic::AtomicUsize::new(0);
        let result = ring.apply(&|key, _e| {
            visited.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if key == b"b" {
                Err(CacheError::FieldTypeConflict)
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(visited.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
