//! Typed time-stamped points and the sequence operations the cache needs:
//! byte-cost estimation, stable dedup-by-timestamp, and range exclusion.

use crate::error::CacheError;

/// The fixed scalar type of every [`Value`] in one [`crate::engine::Entry`].
///
/// `Unknown` (0) only ever appears for an entry that has never received a
/// value; once an entry has seen one write its `vtype` is pinned.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unknown = 0,
    Float = 1,
    Integer = 2,
    String = 3,
    Boolean = 4,
    Unsigned = 5,
}

impl ValueKind {
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => ValueKind::Float,
            2 => ValueKind::Integer,
            3 => ValueKind::String,
            4 => ValueKind::Boolean,
            5 => ValueKind::Unsigned,
            _ => ValueKind::Unknown,
        }
    }
}

/// A single timestamped point. The timestamp is unix-nanoseconds and is not
/// guaranteed monotonic across a write sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float { timestamp: i64, value: f64 },
    Integer { timestamp: i64, value: i64 },
    Unsigned { timestamp: i64, value: u64 },
    Boolean { timestamp: i64, value: bool },
    String { timestamp: i64, value: String },
}

impl Value {
    pub fn timestamp(&self) -> i64 {
        match self {
            Value::Float { timestamp, .. }
            | Value::Integer { timestamp, .. }
            | Value::Unsigned { timestamp, .. }
            | Value::Boolean { timestamp, .. }
            | Value::String { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float { .. } => ValueKind::Float,
            Value::Integer { .. } => ValueKind::Integer,
            Value::Unsigned { .. } => ValueKind::Unsigned,
            Value::Boolean { .. } => ValueKind::Boolean,
            Value::String { .. } => ValueKind::String,
        }
    }

    /// Byte-cost estimate: 8-byte timestamp plus a fixed-width payload for
    /// numeric/bool kinds, or the string's own length for `String`. This is
    /// the accounting unit `Cache` uses for `maxSize` admission.
    pub fn size(&self) -> usize {
        8 + match self {
            Value::Float { .. } | Value::Integer { .. } | Value::Unsigned { .. } => 8,
            Value::Boolean { .. } => 1,
            Value::String { value, .. } => value.len(),
        }
    }
}

/// An ordered sequence of [`Value`], possibly unsorted and containing
/// duplicate timestamps until [`Values::deduplicate`] is called.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(Vec<Value>);

impl Values {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }

    /// Moves `other`'s values onto the end of `self`, leaving `other` empty.
    /// No sorting is performed — writes are the hot path; sort cost is
    /// deferred to [`Values::deduplicate`].
    pub fn append(&mut self, other: &mut Values) {
        self.0.append(&mut other.0);
    }

    pub fn extend(&mut self, other: Values) {
        self.0.extend(other.0);
    }

    /// Sum of [`Value::size`] over the sequence.
    pub fn size(&self) -> usize {
        self.0.iter().map(Value::size).sum()
    }

    /// Sorts by ascending timestamp; for equal timestamps, the value that
    /// appeared later in `self` wins. Idempotent: calling this again on an
    /// already-deduplicated sequence is a no-op in effect (not skipped, but
    /// stable on already-sorted, already-unique input).
    pub fn deduplicate(&mut self) {
        if self.0.len() <= 1 {
            return;
        }
        self.0.sort_by_key(Value::timestamp);
        let mut deduped: Vec<Value> = Vec::with_capacity(self.0.len());
        for v in self.0.drain(..) {
            match deduped.last() {
                Some(last) if last.timestamp() == v.timestamp() => {
                    *deduped.last_mut().unwrap() = v;
                }
                _ => deduped.push(v),
            }
        }
        self.0 = deduped;
    }

    /// Removes every value whose timestamp falls in the closed range
    /// `[min, max]`.
    pub fn exclude(&mut self, min: i64, max: i64) {
        self.0.retain(|v| {
            let ts = v.timestamp();
            !(ts >= min && ts <= max)
        });
    }

    /// The shared kind of every value in the sequence, or
    /// [`CacheError::FieldTypeConflict`] if the sequence mixes kinds.
    /// An empty sequence reports `ValueKind::Unknown`.
    pub fn influxql_type(&self) -> Result<ValueKind, CacheError> {
        let mut kind = None;
        for v in &self.0 {
            match kind {
                None => kind = Some(v.kind()),
                Some(k) if k == v.kind() => {}
                Some(_) => return Err(CacheError::FieldTypeConflict),
            }
        }
        Ok(kind.unwrap_or(ValueKind::Unknown))
    }
}

impl From<Vec<Value>> for Values {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Values {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
