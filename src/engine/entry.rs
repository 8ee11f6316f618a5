//! Per-key container of values with a fixed value type and fine-grained
//! locking, mirroring the original `entry` type: a write lock guards the
//! value sequence, while the value kind is pinned once and read lock-free.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::engine::value::{Value, ValueKind, Values};
use crate::error::CacheError;

/// Owns a [`Values`] sequence for one series key, plus the fixed `vtype`
/// that every value in the sequence must share.
pub struct Entry {
    values: RwLock<Values>,
    /// `ValueKind as u8`. `0` (Unknown) means the entry has never received a
    /// value yet. Read-only once non-zero, so reads never need the lock.
    vtype: AtomicU8,
}

impl Entry {
    /// Builds an entry from an initial batch of values. Empty input yields
    /// an empty entry with `vtype` unset. A mix of kinds in `values` fails
    /// with [`CacheError::FieldTypeConflict`].
    pub fn new(values: Values) -> Result<Self, CacheError> {
        let vtype = match values.influxql_type()? {
            ValueKind::Unknown => 0,
            kind => kind as u8,
        };
        Ok(Self {
            values: RwLock::new(values),
            vtype: AtomicU8::new(vtype),
        })
    }

    /// Appends `incoming` to the entry. If the entry was empty, `incoming`
    /// is adopted directly and fixes `vtype`; otherwise values are appended
    /// unsorted — sorting is deferred to [`Entry::deduplicate`].
    pub fn add(&self, mut incoming: Values) -> Result<(), CacheError> {
        if incoming.is_empty() {
            return Ok(());
        }

        let fixed = self.vtype.load(Ordering::Acquire);
        if fixed != 0 {
            for v in incoming.iter() {
                if v.kind() as u8 != fixed {
                    return Err(CacheError::FieldTypeConflict);
                }
            }
        }

        let mut guard = self.values.write().unwrap();
        if guard.is_empty() {
            let kind = incoming.influxql_type()?;
            self.vtype.store(kind as u8, Ordering::Release);
            *guard = incoming;
        } else {
            guard.append(&mut incoming);
        }
        Ok(())
    }

    /// Sorts and dedups the value sequence in place. A no-op on an entry
    /// with zero or one values. Idempotent.
    pub fn deduplicate(&self) {
        let mut guard = self.values.write().unwrap();
        if guard.len() <= 1 {
            return;
        }
        guard.deduplicate();
    }

    /// Removes every value with a timestamp in the closed range
    /// `[min, max]`. Deduplicates first so the post-condition (sorted,
    /// range-free) holds regardless of prior ordering.
    pub fn filter(&self, min: i64, max: i64) {
        let mut guard = self.values.write().unwrap();
        if guard.len() > 1 {
            guard.deduplicate();
        }
        guard.exclude(min, max);
    }

    pub fn count(&self) -> usize {
        self.values.read().unwrap().len()
    }

    pub fn size(&self) -> usize {
        self.values.read().unwrap().size()
    }

    pub fn influxql_type(&self) -> Result<ValueKind, CacheError> {
        self.values.read().unwrap().influxql_type()
    }

    /// A read-locked clone of the current sequence, used by `Cache::values`
    /// to build the snapshot+live merge buffer without holding the entry
    /// lock across the merge.
    pub fn snapshot_values(&self) -> Values {
        self.values.read().unwrap().clone()
    }
}
