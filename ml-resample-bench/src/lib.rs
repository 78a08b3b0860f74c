//! Benchmarks for resampling, benchmarking and tuning runs

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use ml_resample_core::{
    registry, DatasetBuilder, ExecutionConfig, Learner, Measure, PartitionSpec, Task,
};
use ml_resample_engine::{benchmark, expand_grid, resample, AggregateTable, ResamplingOptions};
use ml_resample_tuning::{AutoTuner, GridSearch, SearchSpace, Terminator, Tuner};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Timed iterations
    pub iterations: usize,

    /// Untimed warmup iterations
    pub warmup_iterations: usize,

    /// Rows in the synthetic task
    pub rows: usize,

    /// Numeric feature columns
    pub features: usize,

    /// Folds of the cross-validation used by the runs
    pub folds: usize,

    /// Seed for data generation and partitioning
    pub seed: u64,

    /// Worker threads; 1 runs sequentially
    pub num_threads: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            warmup_iterations: 3,
            rows: 1000,
            features: 4,
            folds: 5,
            seed: 42,
            num_threads: 4,
        }
    }
}

impl BenchConfig {
    fn options(&self) -> ResamplingOptions {
        let config = if self.num_threads > 1 {
            ExecutionConfig::parallel(self.num_threads)
        } else {
            ExecutionConfig::sequential()
        };
        ResamplingOptions::new().with_config(config)
    }
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchResult {
    /// Name of the benchmark
    pub name: String,

    /// Total time taken
    pub total_time: Duration,

    /// Average time per iteration
    pub avg_time: Duration,

    /// Min time per iteration
    pub min_time: Duration,

    /// Max time per iteration
    pub max_time: Duration,

    /// Resampling iterations (fits) per second
    pub throughput: f64,
}

/// Time `func` over the configured iterations
///
/// `func` returns the number of resampling iterations it ran, which feeds
/// the throughput figure.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn run_benchmark<F>(name: &str, config: &BenchConfig, func: F) -> Result<BenchResult>
where
    F: Fn() -> Result<usize>,
{
    ensure!(config.iterations > 0, "benchmark '{}' needs at least one iteration", name);

    for _ in 0..config.warmup_iterations {
        func().with_context(|| format!("warmup of '{}' failed", name))?;
    }

    let mut times = Vec::with_capacity(config.iterations);
    let mut fits = 0;
    let start_total = Instant::now();

    for _ in 0..config.iterations {
        let start = Instant::now();
        fits += func().with_context(|| format!("benchmark '{}' failed", name))?;
        times.push(start.elapsed());
    }

    let total_time = start_total.elapsed();
    let avg_time = times.iter().sum::<Duration>() / times.len() as u32;
    let min_time = times.iter().min().copied().unwrap_or_default();
    let max_time = times.iter().max().copied().unwrap_or_default();
    let throughput = fits as f64 / total_time.as_secs_f64().max(f64::EPSILON);

    info!(name, ?avg_time, throughput, "benchmark finished");
    Ok(BenchResult {
        name: name.to_string(),
        total_time,
        avg_time,
        min_time,
        max_time,
        throughput,
    })
}

/// Two-class task with Gaussian blobs shifted apart on every feature
#[allow(clippy::cast_precision_loss)]
pub fn synthetic_task(id: &str, rows: usize, features: usize, seed: u64) -> Result<Task> {
    ensure!(rows >= 2, "synthetic task needs at least two rows");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let labels: Vec<&str> = (0..rows).map(|i| if i % 2 == 0 { "a" } else { "b" }).collect();

    let mut builder = DatasetBuilder::new();
    for f in 0..features.max(1) {
        let column: Vec<f64> = labels
            .iter()
            .map(|label| {
                let center = if *label == "a" { 0.0 } else { 1.5 };
                // sum of uniforms is close enough to normal here
                let noise: f64 = (0..4).map(|_| rng.gen_range(-0.5..0.5)).sum();
                center + noise + f as f64 * 0.1
            })
            .collect();
        builder = builder.f64_column(&format!("x{}", f), &column);
    }
    let backend = builder.label_column("y", &labels).build()?;
    Ok(Task::classification(id, backend, "y")?)
}

fn lookup_learners(keys: &[&str]) -> Result<Vec<Arc<dyn Learner>>> {
    Ok(registry::learners().get_many(keys)?)
}

fn lookup_measures(keys: &[&str]) -> Result<Vec<Arc<dyn Measure>>> {
    Ok(registry::measures().get_many(keys)?)
}

/// Instantiate cross-validation splits on the synthetic task
pub fn bench_partitioning(config: &BenchConfig) -> Result<BenchResult> {
    let task = synthetic_task("blobs", config.rows, config.features, config.seed)?;
    let spec = PartitionSpec::cv(config.folds).with_seed(config.seed);
    run_benchmark("Partition Instantiation", config, || {
        Ok(spec.instantiate(&task)?.iters())
    })
}

/// Cross-validate a k-nearest-neighbour learner
pub fn bench_resampling(config: &BenchConfig) -> Result<BenchResult> {
    let task = synthetic_task("blobs", config.rows, config.features, config.seed)?;
    let learner = registry::learners().get("classif.kknn")?;
    let spec = PartitionSpec::cv(config.folds).with_seed(config.seed);
    let options = config.options().with_measures(lookup_measures(&["classif.ce"])?);
    run_benchmark("Resampling", config, || {
        let result = resample(&task, &learner, spec.clone(), options.clone())?;
        Ok(result.iters())
    })
}

/// Run a learner-by-task grid and return its aggregate table
pub fn run_benchmark_grid(config: &BenchConfig) -> Result<AggregateTable> {
    let tasks = vec![
        synthetic_task("blobs_small", config.rows / 4, config.features, config.seed)?,
        synthetic_task("blobs", config.rows, config.features, config.seed)?,
    ];
    let learners = lookup_learners(&["classif.featureless", "classif.kknn"])?;
    let specs = vec![PartitionSpec::cv(config.folds).with_seed(config.seed)];
    let design = expand_grid(&tasks, &learners, &specs)?;
    let result = benchmark(&design, config.options())?;
    Ok(result.aggregate(&lookup_measures(&["classif.ce", "classif.acc"])?)?)
}

/// Time the learner-by-task grid
pub fn bench_benchmark_grid(config: &BenchConfig) -> Result<BenchResult> {
    run_benchmark("Benchmark Grid", config, || {
        let table = run_benchmark_grid(config)?;
        Ok(table.rows().iter().map(|r| r.iters).sum())
    })
}

/// Nested resampling: a grid-tuned k-nearest-neighbour learner inside an
/// outer cross-validation
pub fn bench_nested_tuning(config: &BenchConfig) -> Result<BenchResult> {
    let task = synthetic_task("blobs", config.rows, config.features, config.seed)?;
    let measure = registry::measures().get("classif.ce")?;
    let tuner = Tuner::new(
        registry::learners().get("classif.kknn")?,
        SearchSpace::new().int("k", 1, 15),
        PartitionSpec::cv(3).with_seed(config.seed),
        Arc::clone(&measure),
        Arc::new(GridSearch::new(4)),
        Terminator::None,
    )?;
    let auto: Arc<dyn Learner> = Arc::new(AutoTuner::new(tuner));
    let outer = PartitionSpec::cv(config.folds).with_seed(config.seed);
    let options = config.options().with_measures(vec![measure]);
    run_benchmark("Nested Tuning", config, || {
        Ok(resample(&task, &auto, outer.clone(), options.clone())?.iters())
    })
}

/// Compare sequential and parallel resampling on the same workload
pub fn compare_parallel(config: &BenchConfig) -> Result<Vec<BenchResult>> {
    let sequential = BenchConfig {
        num_threads: 1,
        ..config.clone()
    };
    let mut results = Vec::new();
    for (label, cfg) in [("sequential", &sequential), ("parallel", config)] {
        let mut result = bench_resampling(cfg)?;
        result.name = format!("{} ({})", result.name, label);
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> BenchConfig {
        BenchConfig {
            iterations: 2,
            warmup_iterations: 0,
            rows: 40,
            features: 2,
            folds: 3,
            seed: 7,
            num_threads: 1,
        }
    }

    #[test]
    fn test_synthetic_task_is_reproducible() {
        let a = synthetic_task("t", 20, 3, 1).unwrap();
        let b = synthetic_task("t", 20, 3, 1).unwrap();
        assert_eq!(a.nrow(), 20);
        assert_eq!(a.feature_names().len(), 3);
        assert_eq!(
            a.features(a.row_ids()).unwrap().to_f64_rows().unwrap(),
            b.features(b.row_ids()).unwrap().to_f64_rows().unwrap()
        );
    }

    #[test]
    fn test_run_benchmark_counts_fits() {
        let result = bench_partitioning(&tiny()).unwrap();
        assert!(result.min_time <= result.max_time);
        assert!(result.throughput > 0.0);
    }

    #[test]
    fn test_failing_workload_is_reported() {
        let err = run_benchmark("broken", &tiny(), || anyhow::bail!("boom")).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_grid_separates_learners() {
        let table = run_benchmark_grid(&BenchConfig { rows: 80, ..tiny() }).unwrap();
        assert_eq!(table.rows().len(), 4);
        let knn = table.get("blobs", "classif.kknn", "classif.ce").unwrap();
        let baseline = table.get("blobs", "classif.featureless", "classif.ce").unwrap();
        assert!(knn < baseline);
    }
}
