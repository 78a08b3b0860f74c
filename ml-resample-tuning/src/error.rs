//! Error types for tuning

use thiserror::Error;

/// Result type for tuning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tuning operations
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] ml_resample_core::Error),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] ml_resample_engine::Error),

    /// Tuning finished without a usable configuration
    #[error("Tuning error: {0}")]
    Tuning(String),
}

impl Error {
    /// Whether this error was raised before any candidate was evaluated
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::Core(e) => e.is_configuration(),
            Error::Engine(e) => e.is_configuration(),
            Error::Tuning(_) => false,
        }
    }
}
