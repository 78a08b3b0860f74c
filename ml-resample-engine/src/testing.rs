//! Test fixtures shared by the engine modules

use std::sync::Arc;

use ml_resample_core::{
    DatasetBuilder, Error, FeaturelessLearner, Learner, LearnerProperty, Model, ParamSet,
    ParamValues, Prediction, Result, RowId, Task, TaskType,
};

use crate::cancel::CancellationToken;

/// Route engine logs to the test harness; repeated calls are no-ops
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Two-class task with `n` rows, one numeric feature and alternating labels
pub(crate) fn toy_task(n: usize) -> Task {
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let y: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "a" } else { "b" }).collect();
    let backend = DatasetBuilder::new()
        .f64_column("x", &x)
        .label_column("y", &y)
        .build()
        .unwrap();
    Task::classification("toy", backend, "y").unwrap()
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Train,
    Panic,
    Predict,
    Warn,
    Cancel,
}

/// Featureless classifier that misbehaves whenever `trigger` is a test row
#[derive(Debug, Clone)]
pub(crate) struct FailingLearner {
    inner: FeaturelessLearner,
    failure: Failure,
    trigger: RowId,
    token: CancellationToken,
}

impl FailingLearner {
    pub(crate) fn new(failure: Failure, trigger: RowId) -> Self {
        Self {
            inner: FeaturelessLearner::new(TaskType::Classification),
            failure,
            trigger,
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled by the `Cancel` failure mode
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Learner for FailingLearner {
    fn id(&self) -> &str {
        "classif.failing"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Classification
    }

    fn properties(&self) -> &[LearnerProperty] {
        self.inner.properties()
    }

    fn feature_types(&self) -> &[&'static str] {
        self.inner.feature_types()
    }

    fn param_set(&self) -> &ParamSet {
        self.inner.param_set()
    }

    fn params(&self) -> &ParamValues {
        self.inner.params()
    }

    fn with_params(&self, _values: &ParamValues) -> Result<Arc<dyn Learner>> {
        Ok(Arc::new(self.clone()))
    }

    fn train(&self, task: &Task, rows: &[RowId]) -> Result<Model> {
        let held_out = !rows.contains(&self.trigger);
        match self.failure {
            Failure::Train if held_out => Err(Error::fit(self.id(), "forced failure")),
            Failure::Panic if held_out => panic!("forced panic"),
            Failure::Warn if held_out => {
                Ok(self.inner.train(task, rows)?.with_warning("forced warning"))
            }
            Failure::Cancel if held_out => {
                self.token.cancel();
                self.inner.train(task, rows)
            }
            _ => self.inner.train(task, rows),
        }
    }

    fn predict(&self, model: &Model, task: &Task, rows: &[RowId]) -> Result<Prediction> {
        if matches!(self.failure, Failure::Predict) && rows.contains(&self.trigger) {
            return Err(Error::predict(self.id(), "forced failure"));
        }
        self.inner.predict(model, task, rows)
    }
}
