use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ml_resample_bench::synthetic_task;
use ml_resample_core::PartitionSpec;

fn bench_instantiate(c: &mut Criterion) {
    let mut group = c.benchmark_group("instantiate");
    for rows in [1_000usize, 10_000, 100_000] {
        let task = synthetic_task("blobs", rows, 2, 42).expect("synthetic task");
        let specs = [
            ("cv10", PartitionSpec::cv(10)),
            ("cv10_stratified", PartitionSpec::cv(10).stratified(true)),
            ("bootstrap30", PartitionSpec::bootstrap(30)),
            ("subsampling30", PartitionSpec::subsampling(30, 0.8)),
        ];
        for (name, spec) in specs {
            group.bench_with_input(BenchmarkId::new(name, rows), &task, |b, task| {
                b.iter(|| spec.instantiate(black_box(task)).expect("instantiate"));
            });
        }
    }
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let task = synthetic_task("blobs", 10_000, 2, 42).expect("synthetic task");
    let partitioning = PartitionSpec::repeated_cv(10, 5)
        .instantiate(&task)
        .expect("instantiate");
    c.bench_function("partitioning_to_bytes", |b| {
        b.iter(|| black_box(&partitioning).to_bytes().expect("encode"));
    });
}

criterion_group!(benches, bench_instantiate, bench_serialize);
criterion_main!(benches);
