//! Core traits and data structures for resampling experiments
//!
//! This crate provides the pieces every experiment is built from: the
//! read-only [`Dataset`] backend, the [`Task`] view over it, the
//! [`Learner`] and [`Measure`] adapter traits, and the deterministic
//! partition generator behind [`Resampling`]. The engines that execute
//! experiments live in `ml-resample-engine` and `ml-resample-tuning`.

#![warn(missing_docs)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod learner;
pub mod learners;
pub mod measure;
pub mod params;
pub mod partition;
pub mod prediction;
pub mod registry;
pub mod schema;
pub mod task;
pub mod value;

// Re-export key types for convenience
pub use config::ExecutionConfig;
pub use dataset::{Dataset, DatasetBuilder, InMemoryDataset, TableView};
pub use error::{Error, Result};
pub use learner::{check_compatible, Learner, LearnerProperty, Model};
pub use learners::{FeaturelessLearner, KnnLearner};
pub use measure::{mean_of_scored, Average, Direction, Measure};
pub use params::{ParamDef, ParamKind, ParamSet, ParamValue, ParamValues};
pub use partition::{PartitionSpec, Partitioning, Resampling, Split, Strategy, DEFAULT_SEED};
pub use prediction::{PredictType, Prediction, ProbMatrix};
pub use registry::Registry;
pub use schema::{DataType, Field, Schema};
pub use task::{ColumnRole, Task, TaskType};
pub use value::{seq_row_ids, RowId, Value};

/// Built-in measures
pub mod measures {
    pub use crate::measure::{Accuracy, ClassifError, LogLoss, Mae, Mse, Rmse};
}
