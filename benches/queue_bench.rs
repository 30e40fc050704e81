//! Throughput benchmarks for the work queue and the TTL cache.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use xkit::cache::Cache;
use xkit::queue::WorkQueue;

const TASKS: u64 = 10_000;

fn bench_queue_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_fan_out");
    group.throughput(Throughput::Elements(TASKS));
    for workers in [1usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    let mut q = WorkQueue::new(256);
                    q.set_worker(|x: u64| black_box(x).wrapping_mul(31) ^ 0x9e37, workers);
                    q.set_merger(|acc: u64, item: u64| acc.wrapping_add(item), 0);
                    for i in 0..TASKS {
                        q.add(i);
                    }
                    black_box(q.wait())
                });
            },
        );
    }
    group.finish();
}

fn bench_queue_buffer_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_buffer");
    group.throughput(Throughput::Elements(TASKS));
    for buffer in [0usize, 16, 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(buffer),
            &buffer,
            |b, &buffer| {
                b.iter(|| {
                    let mut q = WorkQueue::new(buffer);
                    q.set_worker(|x: u64| x + 1, 4);
                    q.set_merger(|acc: u64, item: u64| acc + item, 0);
                    for i in 0..TASKS {
                        q.add(i);
                    }
                    black_box(q.wait())
                });
            },
        );
    }
    group.finish();
}

fn bench_cache_reads(c: &mut Criterion) {
    let cache: Cache<u64> = Cache::new();
    for i in 0..1000u64 {
        cache.set(&format!("key-{i}"), i, 0);
    }
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(cache.get(black_box("key-500"))));
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(cache.get(black_box("absent"))));
    });
    group.bench_function("set", |b| {
        b.iter(|| cache.set(black_box("key-500"), black_box(7), 60));
    });
    group.finish();
    cache.close();
}

criterion_group!(
    benches,
    bench_queue_fan_out,
    bench_queue_buffer_sizes,
    bench_cache_reads
);
criterion_main!(benches);
