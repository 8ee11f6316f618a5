//! Literal scenario tests mirroring the cache's documented behavior
//! examples: admission, field-type conflicts, size limits, snapshotting,
//! and cross-snapshot deduplication.

use cache::{Cache, CacheError, Value, Values};

fn float(ts: i64, v: f64) -> Value {
    Value::Float {
        timestamp: ts,
        value: v,
    }
}

fn int(ts: i64, v: i64) -> Value {
    Value::Integer {
        timestamp: ts,
        value: v,
    }
}

#[test]
fn s1_write_then_read_and_size_accounting() {
    let cache = Cache::new(1024);
    cache
        .write(b"cpu", Values::new(vec![float(1, 1.0), float(2, 2.0)]))
        .unwrap();

    assert_eq!(cache.values(b"cpu").as_slice(), &[float(1, 1.0), float(2, 2.0)]);
    // 2 values * (8 ts + 8 payload) + 3-byte key = 19.
    assert_eq!(cache.size(), 19);
}

#[test]
fn s2_conflicting_kind_is_rejected_without_mutating() {
    let cache = Cache::new(0);
    cache.write(b"cpu", Values::new(vec![float(1, 1.0)])).unwrap();
    let err = cache.write(b"cpu", Values::new(vec![int(1, 1)])).unwrap_err();
    assert!(matches!(err, CacheError::FieldTypeConflict));
    assert_eq!(cache.values(b"cpu").as_slice(), &[float(1, 1.0)]);
}

#[test]
fn s3_max_size_exceeded_reports_current_and_max() {
    let cache = Cache::new(32);
    // 1 float value = 16 value bytes + 1-byte key "a" = 17 accounted bytes.
    cache.write(b"a", Values::new(vec![float(1, 1.0)])).unwrap();

    // A second value-heavy write pushes the value-byte admission check over
    // the limit before key-length accounting even applies.
    let err = cache
        .write(b"b", Values::new(vec![float(2, 2.0), float(3, 3.0)]))
        .unwrap_err();
    match err {
        CacheError::MemorySizeLimitExceeded { current, max } => {
            assert_eq!(max, 32);
            assert!(current > max);
        }
        other => panic!("expected MemorySizeLimitExceeded, got {other:?}"),
    }
}

#[test]
fn s4_snapshot_freezes_prior_writes_and_keeps_them_accounted() {
    let cache = Cache::new(0);
    cache.write(b"a", Values::new(vec![float(1, 1.0)])).unwrap();
    cache.write(b"b", Values::new(vec![float(2, 2.0)])).unwrap();
    let live_size_before = cache.size();

    cache.snapshot().unwrap();
    // Frozen bytes stay accounted in size() until clear_snapshot runs.
    assert_eq!(cache.size(), live_size_before);
    assert_eq!(cache.values(b"a").as_slice(), &[float(1, 1.0)]);

    // A second snapshot before clearing returns without swapping again —
    // the live store stays empty and the snapshot keeps the same data.
    cache.snapshot().unwrap();
    assert_eq!(cache.values(b"a").as_slice(), &[float(1, 1.0)]);

    cache.clear_snapshot(true).unwrap();
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.values(b"a").len(), 0);
    assert!(live_size_before > 0);
}

#[test]
fn s5_duplicate_timestamps_keep_the_later_write() {
    let cache = Cache::new(0);
    cache
        .write(
            b"x",
            Values::new(vec![float(5, 5.0), float(3, 3.0), float(5, 50.0)]),
        )
        .unwrap();
    assert_eq!(cache.values(b"x").as_slice(), &[float(3, 3.0), float(5, 50.0)]);
}
