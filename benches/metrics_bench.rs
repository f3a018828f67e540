//! Benchmarks for metrics store contention

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use localinfer_core::metrics::{MetricsStore, ResponseTimeLog, RESPONSE_LOG_CAPACITY};
use std::sync::Arc;
use std::thread;

fn record(store: &MetricsStore, seconds: f64) {
    store.update(|snap, log| {
        snap.active_requests = snap.active_requests.saturating_sub(1);
        log.push(seconds);
        snap.tokens_per_second = 10.0 / seconds;
    });
}

fn bench_response_log(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_log");

    group.bench_function("push_at_capacity", |b| {
        let mut log = ResponseTimeLog::with_capacity(RESPONSE_LOG_CAPACITY);
        for i in 0..RESPONSE_LOG_CAPACITY {
            log.push(i as f64);
        }
        b.iter(|| log.push(black_box(0.25)));
    });

    group.bench_function("mean_full", |b| {
        let mut log = ResponseTimeLog::with_capacity(RESPONSE_LOG_CAPACITY);
        for i in 0..RESPONSE_LOG_CAPACITY {
            log.push(i as f64);
        }
        b.iter(|| black_box(log.mean()));
    });

    group.finish();
}

fn bench_store_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_contention");

    for writers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(writers), writers, |b, &writers| {
            let store = Arc::new(MetricsStore::new());
            b.iter(|| {
                let handles: Vec<_> = (0..writers)
                    .map(|_| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            for i in 1..=250 {
                                record(&store, i as f64 / 100.0);
                                black_box(store.snapshot());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_response_log, bench_store_contention);
criterion_main!(benches);
