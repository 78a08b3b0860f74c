//! Execution engines for resampling experiments
//!
//! [`ResamplingEngine`] runs every split of a partitioning through the
//! [`IterationExecutor`]; [`BenchmarkEngine`] runs a design of
//! task × learner × resampling rows. Learner failures inside a unit are
//! recorded as data and never abort sibling units.

#![warn(missing_docs)]

pub mod benchmark;
pub mod cancel;
pub mod error;
pub mod iteration;
pub mod pool;
pub mod resampling;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use benchmark::{
    benchmark, expand_grid, AggregateRow, AggregateTable, BenchmarkEngine, BenchmarkResult,
    DesignRow,
};
pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use iteration::{IterationError, IterationExecutor, IterationResult, Stage};
pub use pool::WorkerPool;
pub use resampling::{
    check_measures, resample, ResampleResult, ResamplingEngine, ResamplingOptions, ScoreRow,
};
