//! Error types for resampling experiments

use std::io;
use thiserror::Error;

/// Result type for resampling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for resampling operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or parameter, detected before any work starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A learner failed while fitting a model
    #[error("Fit error in learner '{learner}': {message}")]
    Fit {
        /// Learner id
        learner: String,
        /// Failure description
        message: String,
    },

    /// A learner failed while predicting
    #[error("Predict error in learner '{learner}': {message}")]
    Predict {
        /// Learner id
        learner: String,
        /// Failure description
        message: String,
    },

    /// Attempt to combine results with mismatched task or learner identity
    #[error("Incompatible results: {0}")]
    IncompatibleResult(String),

    /// A measure could not score a prediction
    #[error("Measure error: {0}")]
    Measure(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index out of bounds
    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Length of the indexed sequence
        len: usize,
    },

    /// Data type mismatch
    #[error("Data type mismatch: {0}")]
    TypeMismatch(String),

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Shorthand for a fit error raised by `learner`
    pub fn fit(learner: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Fit {
            learner: learner.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a predict error raised by `learner`
    pub fn predict(learner: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Predict {
            learner: learner.into(),
            message: message.into(),
        }
    }

    /// Whether this error is detected at configuration time
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
