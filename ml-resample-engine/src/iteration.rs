//! Execution of a single train/predict/score unit

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ml_resample_core::{
    ExecutionConfig, Learner, Measure, Model, ParamValues, Partitioning, Prediction, RowId, Task,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Step of an iteration that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Fitting the model
    Train,

    /// Predicting the test rows
    Predict,

    /// Scoring the prediction
    Score,

    /// The unit was never started
    Cancelled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Train => "train",
            Stage::Predict => "predict",
            Stage::Score => "score",
            Stage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A failure recorded as data inside an iteration result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationError {
    /// Where the failure happened
    pub stage: Stage,

    /// Learner or measure that failed
    pub source: String,

    /// Failure description
    pub message: String,
}

impl fmt::Display for IterationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed in '{}': {}", self.stage, self.source, self.message)
    }
}

/// Outcome of one resampling iteration
#[derive(Debug, Clone)]
pub struct IterationResult {
    iteration: usize,
    partitioning: Arc<Partitioning>,
    split: usize,
    model: Option<Model>,
    prediction: Option<Prediction>,
    train_time: Duration,
    predict_time: Duration,
    errors: Vec<IterationError>,
    warnings: Vec<String>,
    used_fallback: bool,
    scores: BTreeMap<String, f64>,
}

impl IterationResult {
    fn empty(partitioning: &Arc<Partitioning>, split: usize) -> Self {
        Self {
            iteration: split,
            partitioning: Arc::clone(partitioning),
            split,
            model: None,
            prediction: None,
            train_time: Duration::ZERO,
            predict_time: Duration::ZERO,
            errors: Vec::new(),
            warnings: Vec::new(),
            used_fallback: false,
            scores: BTreeMap::new(),
        }
    }

    /// Placeholder for a unit skipped because execution was cancelled
    pub fn cancelled(partitioning: &Arc<Partitioning>, split: usize) -> Self {
        let mut result = Self::empty(partitioning, split);
        result.errors.push(IterationError {
            stage: Stage::Cancelled,
            source: String::new(),
            message: "execution cancelled before this iteration started".into(),
        });
        result
    }

    /// 1-based position within the owning resample result
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub(crate) fn renumber(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    /// Partitioning this iteration was drawn from
    pub fn partitioning(&self) -> &Arc<Partitioning> {
        &self.partitioning
    }

    /// 1-based split index within [`IterationResult::partitioning`]
    pub fn split(&self) -> usize {
        self.split
    }

    /// Training row ids
    pub fn train_ids(&self) -> &[RowId] {
        &self.partitioning.splits()[self.split - 1].train
    }

    /// Test row ids
    pub fn test_ids(&self) -> &[RowId] {
        &self.partitioning.splits()[self.split - 1].test
    }

    /// Fitted model, present only when models are retained
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// Prediction on the test rows, absent if the iteration failed
    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    /// Time spent fitting
    pub fn train_time(&self) -> Duration {
        self.train_time
    }

    /// Time spent predicting
    pub fn predict_time(&self) -> Duration {
        self.predict_time
    }

    /// Errors recorded during this iteration
    pub fn errors(&self) -> &[IterationError] {
        &self.errors
    }

    /// Whether any error was recorded
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the iteration was skipped by cancellation
    pub fn is_cancelled(&self) -> bool {
        self.errors.iter().any(|e| e.stage == Stage::Cancelled)
    }

    /// Warnings raised by the learner
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether the prediction came from the fallback learner
    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    /// Scores computed when the iteration finished, by measure id
    pub fn provisional_scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    /// Score for `measure`, reusing the provisional score when present
    ///
    /// `NaN` when the iteration has no prediction or scoring fails.
    pub fn score(&self, measure: &dyn Measure) -> f64 {
        if let Some(score) = self.scores.get(measure.id()) {
            return *score;
        }
        self.prediction
            .as_ref()
            .and_then(|p| measure.score(p).ok())
            .unwrap_or(f64::NAN)
    }
}

/// Runs one train/predict/score unit and records every failure as data
#[derive(Clone, Default)]
pub struct IterationExecutor {
    config: ExecutionConfig,
    measures: Vec<Arc<dyn Measure>>,
    fallback: Option<Arc<dyn Learner>>,
}

impl IterationExecutor {
    /// Executor using `config`
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            measures: Vec::new(),
            fallback: None,
        }
    }

    /// Measures scored as soon as an iteration finishes
    #[must_use]
    pub fn with_measures(mut self, measures: Vec<Arc<dyn Measure>>) -> Self {
        self.measures = measures;
        self
    }

    /// Learner that takes over when the primary learner fails
    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn Learner>>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Fit `learner` on split `split` of `partitioning`, predict its test
    /// rows and score the prediction
    ///
    /// `split` is 1-based and must lie within the partitioning. Train,
    /// predict and score failures end up in [`IterationResult::errors`],
    /// as do panics when `catch_panics` is set.
    pub fn run(
        &self,
        learner: &Arc<dyn Learner>,
        task: &Task,
        partitioning: &Arc<Partitioning>,
        split: usize,
    ) -> IterationResult {
        let mut result = IterationResult::empty(partitioning, split);
        let train_ids = result.train_ids().to_vec();
        let test_ids = result.test_ids().to_vec();

        let primary = self.fit_predict(learner, task, &train_ids, &test_ids, &mut result);
        let outcome = match (primary, &self.fallback) {
            (Some(outcome), _) => Some(outcome),
            (None, Some(fallback)) => {
                debug!(iteration = split, fallback = fallback.id(), "switching to fallback learner");
                result.used_fallback = true;
                self.fit_predict(fallback, task, &train_ids, &test_ids, &mut result)
            }
            (None, None) => None,
        };

        if let Some((model, prediction)) = outcome {
            if self.config.store_provisional_scores {
                for measure in &self.measures {
                    let score = match measure.score(&prediction) {
                        Ok(score) => score,
                        Err(e) => {
                            record(&mut result, Stage::Score, measure.id(), e.to_string());
                            f64::NAN
                        }
                    };
                    result.scores.insert(measure.id().to_string(), score);
                }
            }
            if self.config.retain_models {
                result.model = Some(model);
            }
            result.prediction = Some(prediction);
        }
        result
    }

    fn fit_predict(
        &self,
        learner: &Arc<dyn Learner>,
        task: &Task,
        train_ids: &[RowId],
        test_ids: &[RowId],
        result: &mut IterationResult,
    ) -> Option<(Model, Prediction)> {
        // every unit fits its own configuration snapshot
        let snapshot = match learner.with_params(&ParamValues::new()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                record(result, Stage::Train, learner.id(), e.to_string());
                return None;
            }
        };

        let start = Instant::now();
        let trained = self.guarded(|| snapshot.train(task, train_ids));
        result.train_time += start.elapsed();
        let model = match trained {
            Ok(model) => model,
            Err(message) => {
                record(result, Stage::Train, learner.id(), message);
                return None;
            }
        };
        result.warnings.extend(model.warnings().iter().cloned());

        let start = Instant::now();
        let predicted = self.guarded(|| snapshot.predict(&model, task, test_ids));
        result.predict_time += start.elapsed();
        match predicted {
            Ok(prediction) => Some((model, prediction)),
            Err(message) => {
                record(result, Stage::Predict, learner.id(), message);
                None
            }
        }
    }

    fn guarded<T>(&self, f: impl FnOnce() -> ml_resample_core::Result<T>) -> Result<T, String> {
        if !self.config.catch_panics {
            return f().map_err(|e| e.to_string());
        }
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

impl fmt::Debug for IterationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationExecutor")
            .field("config", &self.config)
            .field("measures", &self.measures)
            .field("fallback", &self.fallback.as_ref().map(|l| l.id().to_string()))
            .finish()
    }
}

fn record(result: &mut IterationResult, stage: Stage, source: &str, message: String) {
    warn!(
        iteration = result.split,
        stage = %stage,
        source,
        "iteration failed: {}",
        message
    );
    result.errors.push(IterationError {
        stage,
        source: source.to_string(),
        message,
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_task, FailingLearner, Failure};
    use ml_resample_core::measures::ClassifError;
    use ml_resample_core::{FeaturelessLearner, PartitionSpec, TaskType};

    fn setup() -> (Task, Arc<Partitioning>) {
        let task = toy_task(12);
        let partitioning = PartitionSpec::cv(3).with_seed(7).instantiate(&task).unwrap();
        (task, Arc::new(partitioning))
    }

    fn held_out(partitioning: &Partitioning, split: usize) -> RowId {
        partitioning.test_set(split).unwrap()[0].clone()
    }

    #[test]
    fn test_successful_iteration_is_scored() {
        let (task, partitioning) = setup();
        let learner: Arc<dyn Learner> =
            Arc::new(FeaturelessLearner::new(TaskType::Classification));
        let executor = IterationExecutor::new(ExecutionConfig::default())
            .with_measures(vec![Arc::new(ClassifError)]);

        let result = executor.run(&learner, &task, &partitioning, 2);
        assert_eq!(result.iteration(), 2);
        assert!(!result.has_errors());
        assert!(result.model().is_none());
        let prediction = result.prediction().unwrap();
        assert_eq!(prediction.row_ids(), partitioning.test_set(2).unwrap());
        assert!(result.provisional_scores().contains_key("classif.ce"));
    }

    #[test]
    fn test_fit_error_is_recorded() {
        let (task, partitioning) = setup();
        let trigger = held_out(&partitioning, 1);
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Train, trigger));
        let result = IterationExecutor::default().run(&learner, &task, &partitioning, 1);
        assert!(result.prediction().is_none());
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].stage, Stage::Train);
        assert!(result.score(&ClassifError).is_nan());
    }

    #[test]
    fn test_panic_is_caught() {
        let (task, partitioning) = setup();
        let trigger = held_out(&partitioning, 3);
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Panic, trigger));
        let executor = IterationExecutor::new(ExecutionConfig::default().with_catch_panics(true));
        let result = executor.run(&learner, &task, &partitioning, 3);
        assert_eq!(result.errors()[0].stage, Stage::Train);
        assert!(result.errors()[0].message.contains("panicked"));
    }

    #[test]
    fn test_fallback_supplies_prediction() {
        let (task, partitioning) = setup();
        let trigger = held_out(&partitioning, 1);
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Predict, trigger));
        let fallback: Arc<dyn Learner> =
            Arc::new(FeaturelessLearner::new(TaskType::Classification));
        let executor = IterationExecutor::new(ExecutionConfig::default().with_retain_models(true))
            .with_fallback(Some(fallback));

        let result = executor.run(&learner, &task, &partitioning, 1);
        assert!(result.used_fallback());
        assert_eq!(result.errors()[0].stage, Stage::Predict);
        assert!(result.prediction().is_some());
        assert_eq!(result.model().unwrap().learner_id(), "classif.featureless");
    }

    #[test]
    fn test_learner_warnings_are_copied() {
        let (task, partitioning) = setup();
        let trigger = held_out(&partitioning, 2);
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Warn, trigger));
        let result = IterationExecutor::default().run(&learner, &task, &partitioning, 2);
        assert!(!result.has_errors());
        assert_eq!(result.warnings().len(), 1);
    }
}
