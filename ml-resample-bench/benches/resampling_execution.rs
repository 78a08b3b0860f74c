use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ml_resample_bench::synthetic_task;
use ml_resample_core::{registry, ExecutionConfig, PartitionSpec};
use ml_resample_engine::{resample, ResamplingOptions};

fn bench_resample(c: &mut Criterion) {
    let task = synthetic_task("blobs", 2_000, 4, 42).expect("synthetic task");
    let learner = registry::learners().get("classif.kknn").expect("learner");
    let measure = registry::measures().get("classif.ce").expect("measure");
    let spec = PartitionSpec::cv(5).with_seed(42);

    let mut group = c.benchmark_group("resample_knn_cv5");
    group.sample_size(10);
    for workers in [1usize, 2, 4] {
        let config = if workers == 1 {
            ExecutionConfig::sequential()
        } else {
            ExecutionConfig::parallel(workers)
        };
        let options = ResamplingOptions::new()
            .with_config(config)
            .with_measures(vec![Arc::clone(&measure)]);
        group.bench_with_input(BenchmarkId::from_parameter(workers), &options, |b, options| {
            b.iter(|| resample(&task, &learner, spec.clone(), options.clone()).expect("resample"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resample);
criterion_main!(benches);
