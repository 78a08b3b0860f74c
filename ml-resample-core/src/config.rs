//! Execution configuration shared by the engines

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How resampling iterations and benchmark rows are executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Keep fitted models in the iteration results
    pub retain_models: bool,

    /// Dispatch units to a worker pool instead of running them in order
    pub parallel: bool,

    /// Worker pool size, clamped to the available cores
    pub workers: usize,

    /// Record a panicking learner as an iteration error
    pub catch_panics: bool,

    /// Score each iteration as soon as it finishes
    pub store_provisional_scores: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retain_models: false,
            parallel: false,
            workers: num_cpus::get(),
            catch_panics: true,
            store_provisional_scores: true,
        }
    }
}

impl ExecutionConfig {
    /// Sequential execution with default settings
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Parallel execution over `workers` threads
    pub fn parallel(workers: usize) -> Self {
        Self {
            parallel: true,
            workers,
            ..Self::default()
        }
    }

    /// Set whether fitted models are kept
    #[must_use]
    pub fn with_retain_models(mut self, retain: bool) -> Self {
        self.retain_models = retain;
        self
    }

    /// Set whether learner panics are caught
    #[must_use]
    pub fn with_catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    /// Set whether iterations are scored eagerly
    #[must_use]
    pub fn with_provisional_scores(mut self, store: bool) -> Self {
        self.store_provisional_scores = store;
        self
    }

    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        Ok(())
    }

    /// Worker count actually used: 1 when sequential, otherwise
    /// `workers` bounded by the available cores
    pub fn effective_workers(&self) -> usize {
        if self.parallel {
            self.workers.clamp(1, num_cpus::get().max(1))
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert!(!config.retain_models);
        assert!(!config.parallel);
        assert!(config.catch_panics);
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = ExecutionConfig::from_json_str(r#"{"parallel": true, "workers": 2}"#).unwrap();
        assert!(config.parallel);
        assert!(!config.retain_models);
        assert!(config.effective_workers() <= 2);
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = ExecutionConfig::from_json_str(r#"{"workers": 0}"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_workers_clamped_to_cores() {
        let config = ExecutionConfig::parallel(100_000);
        assert!(config.effective_workers() <= num_cpus::get());
    }
}
