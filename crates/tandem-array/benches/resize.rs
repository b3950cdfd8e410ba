//! Benchmarks for resizing shared arrays

#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tandem_array::{Group, GroupConfig, HostArray};

fn group(tag: &str, workers: usize) -> Group {
    let config =
        GroupConfig::new(format!("bench{tag}{}", std::process::id())).with_workers(workers);
    Group::spawn(config).expect("spawn group")
}

fn bench_reshape_within_capacity(c: &mut Criterion) {
    let mut bench = c.benchmark_group("reshape");

    for workers in [1usize, 4] {
        let group = group(&format!("r{workers}"), workers);
        let mut data = group.create_data::<f32>(2).expect("create");
        data.set_shape(&[256, 256], 1.0).expect("alloc");

        let mut rows = 128;
        bench.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                rows = if rows == 128 { 255 } else { 128 };
                data.set_length(black_box(rows), 1.0).expect("reshape");
            });
        });
    }

    bench.finish();
}

fn bench_realloc(c: &mut Criterion) {
    let mut bench = c.benchmark_group("realloc");

    for workers in [1usize, 4] {
        let group = group(&format!("a{workers}"), workers);
        let mut data = group.create_data::<f32>(1).expect("create");

        bench.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                data.set_length(black_box(4096), 1.0).expect("alloc");
                data.free_memory().expect("free");
            });
        });
    }

    bench.finish();
}

fn bench_set_value(c: &mut Criterion) {
    let group = group("v", 2);
    let mut data = group.create_data::<f64>(1).expect("create");
    let input = HostArray::from_vec((0..65536).map(|i| i as f32).collect::<Vec<_>>());

    c.bench_function("set_value_upcast_64k", |b| {
        b.iter(|| data.set_value(black_box(&input), false, 1.5).expect("set_value"));
    });
}

criterion_group!(benches, bench_reshape_within_capacity, bench_realloc, bench_set_value);

criterion_main!(benches);
