//! Benchmark runner for resampling experiments

use anyhow::Result;
use ml_resample_bench::{
    bench_benchmark_grid, bench_nested_tuning, bench_partitioning, compare_parallel,
    run_benchmark_grid, BenchConfig, BenchResult,
};
use tracing_subscriber::EnvFilter;

fn report(result: &BenchResult) {
    println!("\nBenchmark: {}", result.name);
    println!("  Total time:   {:?}", result.total_time);
    println!("  Average time: {:?}", result.avg_time);
    println!("  Min time:     {:?}", result.min_time);
    println!("  Max time:     {:?}", result.max_time);
    println!("  Throughput:   {:.2} fits/sec", result.throughput);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    println!("=== Resampling Benchmarks ===");

    let config = BenchConfig {
        iterations: 5,
        warmup_iterations: 1,
        rows: 600,
        features: 4,
        folds: 5,
        seed: 42,
        num_threads: num_threads(),
    };

    report(&bench_partitioning(&config)?);
    report(&bench_benchmark_grid(&config)?);
    report(&bench_nested_tuning(&BenchConfig {
        iterations: 2,
        rows: 200,
        ..config.clone()
    })?);

    println!("\n=== Sequential vs Parallel ===");
    for result in compare_parallel(&config)? {
        println!("\nMode: {}", result.name);
        println!("  Average time: {:?}", result.avg_time);
        println!("  Throughput:   {:.2} fits/sec", result.throughput);
    }

    println!("\n=== Aggregate Scores ===");
    let table = run_benchmark_grid(&config)?;
    for row in table.rows() {
        let scores: Vec<String> = row
            .scores
            .iter()
            .map(|(measure, score)| format!("{}={:.4}", measure, score))
            .collect();
        println!(
            "  [{}] {:<12} {:<20} {:<4} iters={} errors={} {}",
            row.row,
            row.task_id,
            row.learner_id,
            row.resampling_id,
            row.iters,
            row.errors,
            scores.join(" ")
        );
    }

    // Scaling with task size
    println!("\n=== Scaling ===");
    for rows in [100, 1000, 10_000] {
        let result = bench_partitioning(&BenchConfig {
            rows,
            iterations: 3,
            ..config.clone()
        })?;
        println!("\nRows: {}", rows);
        println!("  Average time: {:?}", result.avg_time);
    }

    Ok(())
}

fn num_threads() -> usize {
    std::env::var("RESAMPLE_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4)
}
