//! Error types for the execution engines

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for engine operations
///
/// Only configuration problems and result bookkeeping surface here; a
/// learner failing inside an iteration is recorded in the iteration result.
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] ml_resample_core::Error),

    /// The worker pool could not be built
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Whether this error was raised before any unit was dispatched
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Core(e) => e.is_configuration(),
            Error::WorkerPool(_) => true,
        }
    }

    /// Whether two results could not be combined
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Error::Core(ml_resample_core::Error::IncompatibleResult(_)))
    }
}
