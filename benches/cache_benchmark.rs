//! Throughput and lock-contention benchmarks for the cache write buffer.
//!
//!   $ cargo bench --bench cache_benchmark

use cache::{Cache, Value, Values};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

const THREADS: usize = 8;
const WRITES_PER_THREAD: usize = 1_000;

fn single_threaded_write(c: &mut Criterion) {
    c.bench_function("write_1k_sequential", |b| {
        b.iter(|| {
            let cache = Cache::new(0);
            for i in 0..1_000i64 {
                cache
                    .write(
                        format!("cpu-{i}").as_bytes(),
                        Values::new(vec![Value::Float {
                            timestamp: i,
                            value: i as f64,
                        }]),
                    )
                    .unwrap();
            }
        });
    });
}

fn contention_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("writers_vs_shard_lock");
    group.sample_size(10);

    for &shard_count in &[1usize, 4, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(shard_count),
            &shard_count,
            |b, &shard_count| {
                b.iter(|| {
                    let cache = Arc::new(Cache::with_config(cache::CacheConfig {
                        max_size: 0,
                        shard_count,
                    }));

                    std::thread::scope(|scope| {
                        for t in 0..THREADS {
                            let cache = cache.clone();
                            scope.spawn(move || {
                                for i in 0..WRITES_PER_THREAD {
                                    let key = format!("t{t}-k{i}");
                                    cache
                                        .write(
                                            key.as_bytes(),
                                            Values::new(vec![Value::Float {
                                                timestamp: i as i64,
                                                value: i as f64,
                                            }]),
                                        )
                                        .unwrap();
                                }
                            });
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

fn snapshot_swap(c: &mut Criterion) {
    c.bench_function("snapshot_swap_10k_keys", |b| {
        b.iter(|| {
            let cache = Cache::new(0);
            for i in 0..10_000i64 {
                cache
                    .write(
                        format!("cpu-{i}").as_bytes(),
                        Values::new(vec![Value::Float {
                            timestamp: i,
                            value: i as f64,
                        }]),
                    )
                    .unwrap();
            }
            cache.snapshot().unwrap();
            cache.clear_snapshot(true).unwrap();
        });
    });
}

criterion_group!(benches, single_threaded_write, contention_bench, snapshot_swap);
criterion_main!(benches);
