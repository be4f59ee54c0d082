//! Collection operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use recollect_bench::{people_collection, random_people};
use recollect_core::{Condition, Query, Value};

/// Benchmark batch inserts.
fn bench_insert_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_many");

    for batch_size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let (_db, people) = people_collection(0);
                let batch = random_people(batch_size);
                b.iter(|| people.insert_many(black_box(batch.clone())).unwrap());
            },
        );
    }
    group.finish();
}

/// Benchmark full scans against index lookups.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    for count in [100usize, 1000] {
        let (_db, people) = people_collection(count);
        let by_team = Query::new().eq("team", "red");
        let adults = Query::new().field("age", Condition::new().gte(18));

        group.bench_with_input(BenchmarkId::new("scan", count), &count, |b, _| {
            b.iter(|| people.find(black_box(&by_team)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("index", count), &count, |b, _| {
            b.iter(|| {
                people
                    .find_by_index("team", "red", black_box(&Query::new()))
                    .unwrap()
            });
        });
        group.bench_with_input(BenchmarkId::new("index_filtered", count), &count, |b, _| {
            b.iter(|| people.find_by_index("team", "red", black_box(&adults)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("first", count), &count, |b, _| {
            b.iter(|| people.find_one(black_box(&adults)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark merge updates over every record.
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for count in [100usize, 1000] {
        let (_db, people) = people_collection(count);
        let fields = Value::object([("seen", Value::from(true))]);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| people.update(&Query::new(), black_box(fields.clone())).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert_many, bench_find, bench_update);
criterion_main!(benches);
