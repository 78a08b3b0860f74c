//! Hyperparameter tuning and nested resampling
//!
//! A [`Tuner`] proposes configurations with an [`Optimizer`], evaluates each
//! one with an inner benchmark and stops according to a [`Terminator`].
//! [`AutoTuner`] turns a tuner into a [`ml_resample_core::Learner`], so
//! passing it to an outer resampling yields nested resampling.

#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod optimizer;
pub mod search_space;
pub mod terminator;
pub mod tuner;

// Re-export key types for convenience
pub use archive::{Archive, ArchiveEntry};
pub use error::{Error, Result};
pub use optimizer::{DesignPoints, GridSearch, Optimizer, Proposals, RandomSearch};
pub use search_space::SearchSpace;
pub use terminator::Terminator;
pub use tuner::{tune, AutoTuner, TunedModel, Tuner, TuningResult};
