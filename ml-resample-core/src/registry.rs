//! Lookup of learners, measures and resampling specs by key
//!
//! Keys are resolved when an experiment is configured, so an unknown key
//! surfaces as a configuration error before any work starts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::learner::Learner;
use crate::learners::{FeaturelessLearner, KnnLearner};
use crate::measure::{Accuracy, ClassifError, LogLoss, Mae, Measure, Mse, Rmse};
use crate::partition::PartitionSpec;
use crate::task::TaskType;

type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Key → factory map
pub struct Registry<T> {
    kind: &'static str,
    entries: BTreeMap<String, Factory<T>>,
}

impl<T> Registry<T> {
    /// Empty registry; `kind` names the entries in error messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register a factory, replacing any previous entry under `key`
    pub fn add<F>(&mut self, key: &str, factory: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.entries.insert(key.to_string(), Arc::new(factory));
        self
    }

    /// Construct the entry registered under `key`
    pub fn get(&self, key: &str) -> Result<T> {
        self.entries.get(key).map(|f| f()).ok_or_else(|| {
            Error::config(format!(
                "unknown {} '{}', available: {}",
                self.kind,
                key,
                self.keys().join(", ")
            ))
        })
    }

    /// Construct several entries, failing on the first unknown key
    pub fn get_many(&self, keys: &[&str]) -> Result<Vec<T>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Registry of the built-in learners
pub fn learners() -> Registry<Arc<dyn Learner>> {
    let mut reg: Registry<Arc<dyn Learner>> = Registry::new("learner");
    for task_type in [TaskType::Classification, TaskType::Regression] {
        reg.add(&format!("{}.featureless", task_type), move || {
            Arc::new(FeaturelessLearner::new(task_type))
        });
        reg.add(&format!("{}.kknn", task_type), move || {
            Arc::new(KnnLearner::new(task_type))
        });
    }
    reg
}

/// Registry of the built-in measures
pub fn measures() -> Registry<Arc<dyn Measure>> {
    let mut reg: Registry<Arc<dyn Measure>> = Registry::new("measure");
    reg.add("classif.ce", || Arc::new(ClassifError))
        .add("classif.acc", || Arc::new(Accuracy))
        .add("classif.logloss", || Arc::new(LogLoss::default()))
        .add("regr.mse", || Arc::new(Mse))
        .add("regr.rmse", || Arc::new(Rmse))
        .add("regr.mae", || Arc::new(Mae));
    reg
}

/// Registry of resampling specs with their default settings
///
/// | key           | default                          |
/// |---------------|----------------------------------|
/// | `cv`          | 3 folds                          |
/// | `repeated_cv` | 10 folds, 10 repeats             |
/// | `holdout`     | 2/3 train                        |
/// | `loo`         | one split per row                |
/// | `bootstrap`   | 30 repeats                       |
/// | `subsampling` | 30 repeats, 2/3 train            |
pub fn resamplings() -> Registry<PartitionSpec> {
    let mut reg = Registry::new("resampling");
    reg.add("cv", || PartitionSpec::cv(3))
        .add("repeated_cv", || PartitionSpec::repeated_cv(10, 10))
        .add("holdout", || PartitionSpec::holdout(2.0 / 3.0))
        .add("loo", PartitionSpec::loo)
        .add("bootstrap", || PartitionSpec::bootstrap(30))
        .add("subsampling", || PartitionSpec::subsampling(30, 2.0 / 3.0));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("cv", 9, 3)]
    #[test_case("holdout", 9, 1)]
    #[test_case("loo", 9, 9)]
    #[test_case("bootstrap", 9, 30)]
    #[test_case("repeated_cv", 20, 100)]
    fn test_resampling_defaults(key: &str, n: usize, iters: usize) {
        let spec = resamplings().get(key).unwrap();
        assert_eq!(spec.iters(n), iters);
    }

    #[test]
    fn test_unknown_key_is_configuration_error() {
        let err = measures().get("classif.auc").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("classif.acc"));
    }

    #[test]
    fn test_learner_ids_match_keys() {
        let reg = learners();
        for key in reg.keys() {
            assert_eq!(reg.get(key).unwrap().id(), key);
        }
        assert!(reg.contains("regr.kknn"));
    }

    #[test]
    fn test_get_many_preserves_order() {
        let ms = measures().get_many(&["regr.mae", "regr.mse"]).unwrap();
        let ids: Vec<&str> = ms.iter().map(|m| m.id()).collect();
        assert_eq!(ids, ["regr.mae", "regr.mse"]);
    }
}
