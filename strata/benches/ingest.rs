//! Microbenchmarks for the ingest and query paths.
//!
//! Run with: `cargo bench -p strata -- ingest`

#![allow(missing_docs, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use strata::{MemStore, RedbStore, Store, ValueKind};
use tempfile::tempdir;

const BASE_TS: u32 = 1_700_000_000;

/// Fills a store with `count` gauge readings for unit 1, ten seconds apart.
fn filled(count: u32) -> Store<MemStore> {
    let mut store = Store::in_memory();
    for i in 0..count {
        store
            .put_value(0, BASE_TS + i * 10, 1, f64::from(i % 100), false)
            .unwrap();
    }
    store
}

fn bench_put_memory(c: &mut Criterion) {
    let mut store = Store::in_memory();
    let mut ts = BASE_TS;

    c.bench_function("ingest/memory_gauge", |b| {
        b.iter(|| {
            ts += 10;
            store
                .put_value(0, black_box(ts), 1, black_box(42.5), false)
                .unwrap();
        });
    });
}

fn bench_put_redb(c: &mut Criterion) {
    let temp_dir = tempdir().unwrap();
    let mut store = Store::<RedbStore>::open(temp_dir.path().join("bench.redb")).unwrap();
    let mut ts = BASE_TS;
    let mut counter = 0.0;

    c.bench_function("ingest/redb_gauge", |b| {
        b.iter(|| {
            ts += 10;
            store
                .put_value(0, black_box(ts), 1, black_box(42.5), false)
                .unwrap();
        });
    });

    c.bench_function("ingest/redb_counter", |b| {
        b.iter(|| {
            ts += 10;
            counter += 1_000.0;
            store
                .put_value(0, black_box(ts), 2, black_box(counter), true)
                .unwrap();
        });
    });
}

fn bench_get_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("query/buckets");
    let count = 100_000u32;
    let store = filled(count);
    let end = BASE_TS + count * 10;

    for buckets in [60usize, 600, 6_000] {
        let mut out = vec![0.0; buckets];
        group.bench_with_input(BenchmarkId::from_parameter(buckets), &buckets, |b, _| {
            b.iter(|| {
                store
                    .get_values_into(1, BASE_TS, black_box(end), ValueKind::Avg, &mut out)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put_memory, bench_put_redb, bench_get_values);
criterion_main!(benches);
