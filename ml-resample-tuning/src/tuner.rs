//! Hyperparameter tuning and the self-tuning learner
//!
//! [`Tuner`] evaluates candidate configurations with an inner benchmark and
//! keeps every result in an [`Archive`]. [`AutoTuner`] wraps a tuner as an
//! ordinary [`Learner`]: handing it to an outer resampling gives nested
//! resampling without any special handling in the outer engine.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ml_resample_core::{
    check_compatible, Learner, LearnerProperty, Measure, Model, ParamSet, ParamValues,
    PartitionSpec, PredictType, Prediction, Resampling, RowId, Task, TaskType,
};
use ml_resample_engine::{BenchmarkEngine, DesignRow, ResamplingOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::{Archive, ArchiveEntry};
use crate::error::{Error, Result};
use crate::optimizer::Optimizer;
use crate::search_space::SearchSpace;
use crate::terminator::Terminator;

/// Outcome of a tuning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    /// Best configuration found
    pub best_params: ParamValues,

    /// Its aggregated inner score
    pub best_score: f64,

    /// Every evaluated configuration
    pub archive: Archive,
}

/// Searches a learner's hyperparameters with an inner resampling
#[derive(Clone)]
pub struct Tuner {
    learner: Arc<dyn Learner>,
    search_space: SearchSpace,
    resampling: PartitionSpec,
    measure: Arc<dyn Measure>,
    optimizer: Arc<dyn Optimizer>,
    terminator: Terminator,
    options: ResamplingOptions,
}

impl Tuner {
    /// Configure a tuner
    ///
    /// Fails when the search space does not fit the learner's parameters,
    /// when the measure cannot score the learner, or when neither the
    /// optimizer nor the terminator guarantees that tuning ends.
    pub fn new(
        learner: Arc<dyn Learner>,
        search_space: SearchSpace,
        resampling: PartitionSpec,
        measure: Arc<dyn Measure>,
        optimizer: Arc<dyn Optimizer>,
        terminator: Terminator,
    ) -> Result<Self> {
        search_space.validate(learner.param_set())?;
        if measure.task_type() != learner.task_type() {
            return Err(ml_resample_core::Error::config(format!(
                "measure '{}' cannot score learner '{}'",
                measure.id(),
                learner.id()
            ))
            .into());
        }
        if measure.predict_type() == PredictType::Prob
            && !learner.predict_types().contains(&PredictType::Prob)
        {
            return Err(ml_resample_core::Error::config(format!(
                "measure '{}' needs probabilities, which learner '{}' does not predict",
                measure.id(),
                learner.id()
            ))
            .into());
        }
        terminator.validate()?;
        if !optimizer.is_bounded() && !terminator.is_bounding() {
            return Err(ml_resample_core::Error::config(format!(
                "optimizer '{}' never runs out of candidates and terminator {:?} may never trigger",
                optimizer.id(),
                terminator
            ))
            .into());
        }
        let options = ResamplingOptions::new().with_measures(vec![Arc::clone(&measure)]);
        Ok(Self {
            learner,
            search_space,
            resampling,
            measure,
            optimizer,
            terminator,
            options,
        })
    }

    /// Options for the inner benchmark; the tuning measure is always scored
    #[must_use]
    pub fn with_options(mut self, options: ResamplingOptions) -> Self {
        self.options = options.with_measures(vec![Arc::clone(&self.measure)]);
        self
    }

    /// Learner being tuned
    pub fn learner(&self) -> &Arc<dyn Learner> {
        &self.learner
    }

    /// Ranges being searched
    pub fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }

    /// Measure being optimized
    pub fn measure(&self) -> &Arc<dyn Measure> {
        &self.measure
    }

    fn with_learner(&self, learner: Arc<dyn Learner>) -> Self {
        Self {
            learner,
            ..self.clone()
        }
    }

    /// Tune on all active rows of `task`
    ///
    /// The inner resampling is instantiated once, so every candidate is
    /// evaluated on identical splits.
    pub fn tune(&self, task: &Task) -> Result<TuningResult> {
        check_compatible(self.learner.as_ref(), task)?;
        let partitioning = Arc::new(self.resampling.instantiate(task)?);
        let mut proposals = self.optimizer.propose(&self.search_space)?;
        let engine = BenchmarkEngine::new(self.options.clone())?;

        let started = Instant::now();
        let mut archive = Archive::new(self.measure.id(), self.measure.direction());
        info!(
            task = task.id(),
            learner = self.learner.id(),
            optimizer = self.optimizer.id(),
            "tuning started"
        );

        loop {
            let cancelled = self.options.cancel.as_ref().is_some_and(|t| t.is_cancelled());
            if cancelled || self.terminator.is_terminated(&archive, started) {
                break;
            }
            let size = self
                .terminator
                .remaining_evals(archive.n_evals())
                .map_or(self.optimizer.batch_size(), |n| {
                    n.min(self.optimizer.batch_size())
                });
            let batch: Vec<ParamValues> = proposals.by_ref().take(size).collect();
            if batch.is_empty() {
                break;
            }

            let design = batch
                .iter()
                .map(|params| -> Result<DesignRow> {
                    Ok(DesignRow::new(
                        task.clone(),
                        self.learner.with_params(params)?,
                        Resampling::Instantiated(Arc::clone(&partitioning)),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let bmr = engine.execute(&design)?;

            let batch_nr = archive.n_batches() + 1;
            for (params, rr) in batch.into_iter().zip(bmr.resample_results()) {
                let score = rr.aggregate(self.measure.as_ref())?;
                debug!(
                    batch = batch_nr,
                    params = %params,
                    score,
                    "candidate evaluated"
                );
                archive.push(ArchiveEntry {
                    batch: batch_nr,
                    params,
                    score,
                    iters: rr.iters(),
                    errors: rr.iterations().iter().filter(|it| it.has_errors()).count(),
                });
            }
        }

        let best = archive.best().cloned().ok_or_else(|| {
            Error::Tuning(format!(
                "none of the {} evaluated configurations could be scored",
                archive.n_evals()
            ))
        })?;
        info!(
            evals = archive.n_evals(),
            best = %best.params,
            score = best.score,
            "tuning finished"
        );
        Ok(TuningResult {
            best_params: best.params,
            best_score: best.score,
            archive,
        })
    }
}

impl fmt::Debug for Tuner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tuner")
            .field("learner", &self.learner.key())
            .field("search_space", &self.search_space)
            .field("resampling", &self.resampling)
            .field("measure", &self.measure.id())
            .field("optimizer", &self.optimizer)
            .field("terminator", &self.terminator)
            .finish()
    }
}

/// Tune `learner` on `task` in one call
pub fn tune(
    task: &Task,
    learner: Arc<dyn Learner>,
    search_space: SearchSpace,
    resampling: PartitionSpec,
    measure: Arc<dyn Measure>,
    optimizer: Arc<dyn Optimizer>,
    terminator: Terminator,
) -> Result<TuningResult> {
    Tuner::new(learner, search_space, resampling, measure, optimizer, terminator)?.tune(task)
}

/// State of a model fitted by [`AutoTuner`]
#[derive(Debug)]
pub struct TunedModel {
    /// Base learner configured with the best parameters
    pub learner: Arc<dyn Learner>,

    /// Base model refit on every incoming training row
    pub model: Model,

    /// The tuning run that chose the parameters
    pub result: TuningResult,
}

/// A learner that tunes its base learner inside `train`
#[derive(Debug, Clone)]
pub struct AutoTuner {
    id: String,
    tuner: Tuner,
}

impl AutoTuner {
    /// Wrap a configured tuner; the learner id becomes `<base>.tuned`
    pub fn new(tuner: Tuner) -> Self {
        Self {
            id: format!("{}.tuned", tuner.learner().id()),
            tuner,
        }
    }

    /// The wrapped tuner
    pub fn tuner(&self) -> &Tuner {
        &self.tuner
    }

    /// Tuning details of a model fitted by an auto tuner
    pub fn tuned_model(model: &Model) -> Option<&TunedModel> {
        model.state::<TunedModel>()
    }
}

impl Learner for AutoTuner {
    fn id(&self) -> &str {
        &self.id
    }

    fn task_type(&self) -> TaskType {
        self.tuner.learner.task_type()
    }

    fn properties(&self) -> &[LearnerProperty] {
        self.tuner.learner.properties()
    }

    fn feature_types(&self) -> &[&'static str] {
        self.tuner.learner.feature_types()
    }

    fn predict_types(&self) -> &[PredictType] {
        self.tuner.learner.predict_types()
    }

    fn param_set(&self) -> &ParamSet {
        self.tuner.learner.param_set()
    }

    fn params(&self) -> &ParamValues {
        self.tuner.learner.params()
    }

    /// Fix parameters of the base learner; tuned values still override them
    fn with_params(&self, values: &ParamValues) -> ml_resample_core::Result<Arc<dyn Learner>> {
        let base = self.tuner.learner.with_params(values)?;
        Ok(Arc::new(Self {
            id: self.id.clone(),
            tuner: self.tuner.with_learner(base),
        }))
    }

    fn train(&self, task: &Task, rows: &[RowId]) -> ml_resample_core::Result<Model> {
        let inner_task = task.filter(rows)?;
        let result = self
            .tuner
            .tune(&inner_task)
            .map_err(|e| ml_resample_core::Error::fit(&self.id, e.to_string()))?;

        let learner = self.tuner.learner.with_params(&result.best_params)?;
        let model = learner.train(task, rows)?;
        let mut tuned = Model::new(
            &self.id,
            learner.params().clone(),
            rows,
            TunedModel {
                learner: Arc::clone(&learner),
                model: model.clone(),
                result,
            },
        );
        for warning in model.warnings() {
            tuned = tuned.with_warning(warning.clone());
        }
        Ok(tuned)
    }

    fn predict(
        &self,
        model: &Model,
        task: &Task,
        rows: &[RowId],
    ) -> ml_resample_core::Result<Prediction> {
        let tuned = model.expect_state::<TunedModel>(&self.id)?;
        tuned.learner.predict(&tuned.model, task, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{DesignPoints, GridSearch, RandomSearch};
    use ml_resample_core::measures::{Accuracy, ClassifError, LogLoss};
    use ml_resample_core::{
        DatasetBuilder, FeaturelessLearner, KnnLearner, ParamValue, RowId, TaskType,
    };
    use ml_resample_engine::{resample, ResamplingOptions};
    use std::time::Duration;

    fn blobs(n: usize) -> Task {
        let x: Vec<f64> = (0..n)
            .map(|i| {
                let offset = if i % 2 == 0 { 0.0 } else { 3.0 };
                offset + (i % 7) as f64 * 0.5
            })
            .collect();
        let y: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "a" } else { "b" }).collect();
        let backend = DatasetBuilder::new()
            .f64_column("x", &x)
            .label_column("y", &y)
            .build()
            .unwrap();
        Task::classification("blobs", backend, "y").unwrap()
    }

    fn knn() -> Arc<dyn Learner> {
        Arc::new(KnnLearner::new(TaskType::Classification))
    }

    fn grid_tuner() -> Tuner {
        Tuner::new(
            knn(),
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::cv(3).with_seed(5),
            Arc::new(ClassifError),
            Arc::new(GridSearch::new(3)),
            Terminator::None,
        )
        .unwrap()
    }

    #[test]
    fn test_grid_of_three_with_three_folds_runs_nine_iterations() {
        let task = blobs(30);
        let train: Vec<RowId> = task.row_ids()[..24].to_vec();
        let auto: Arc<dyn Learner> = Arc::new(AutoTuner::new(grid_tuner()));

        let model = auto.train(&task, &train).unwrap();
        assert_eq!(model.train_rows(), train.as_slice());

        let tuned = AutoTuner::tuned_model(&model).unwrap();
        let archive = &tuned.result.archive;
        assert_eq!(archive.n_evals(), 3);
        assert_eq!(archive.inner_iterations(), 9);

        let min = archive
            .entries()
            .iter()
            .map(|e| e.score)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(tuned.result.best_score, min);
        let first_min = archive.entries().iter().find(|e| e.score == min).unwrap();
        assert_eq!(tuned.result.best_params, first_min.params);

        // refit on every incoming row, not an inner training subset
        assert_eq!(tuned.model.train_rows(), train.as_slice());
        assert_eq!(tuned.learner.params().get("k"), first_min.params.get("k"));

        let pred = auto.predict(&model, &task, &task.row_ids()[24..]).unwrap();
        assert_eq!(pred.len(), 6);
    }

    #[test]
    fn test_nested_resampling_through_outer_engine() {
        let task = blobs(36);
        let auto: Arc<dyn Learner> = Arc::new(AutoTuner::new(grid_tuner()));
        let rr = resample(
            &task,
            &auto,
            PartitionSpec::cv(3).with_seed(1),
            ResamplingOptions::new().retain_models(true),
        )
        .unwrap();
        assert_eq!(rr.iters(), 3);
        assert!(rr.errors().is_empty());
        for it in rr.iterations() {
            let tuned = AutoTuner::tuned_model(it.model().unwrap()).unwrap();
            assert_eq!(tuned.result.archive.inner_iterations(), 9);
            assert_eq!(tuned.model.train_rows(), it.train_ids());
        }
        assert!(!rr.aggregate(&ClassifError).unwrap().is_nan());
    }

    #[test]
    fn test_unbounded_search_is_configuration_error() {
        let err = Tuner::new(
            knn(),
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::cv(3),
            Arc::new(ClassifError),
            Arc::new(RandomSearch::new(1)),
            Terminator::PerfReached(0.0),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_eval_budget_is_configuration_error() {
        let err = Tuner::new(
            knn(),
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::cv(3),
            Arc::new(ClassifError),
            Arc::new(GridSearch::new(3)),
            Terminator::Evals(0),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_run_time_budget_ends_endless_search() {
        let task = blobs(24);
        let started = Instant::now();
        let result = tune(
            &task,
            knn(),
            SearchSpace::new().int("k", 1, 9),
            PartitionSpec::holdout(0.75),
            Arc::new(ClassifError),
            Arc::new(RandomSearch::new(3)),
            Terminator::RunTime(Duration::from_millis(50)),
        )
        .unwrap();
        assert!(result.archive.n_evals() >= 1);
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!result.best_score.is_nan());
    }

    #[test]
    fn test_random_search_stops_at_eval_budget() {
        let task = blobs(24);
        let optimizer = RandomSearch::new(9).with_batch_size(2).unwrap();
        let result = tune(
            &task,
            knn(),
            SearchSpace::new().int("k", 1, 9),
            PartitionSpec::holdout(0.75),
            Arc::new(Accuracy),
            Arc::new(optimizer),
            Terminator::Any(vec![Terminator::PerfReached(1.1), Terminator::Evals(5)]),
        )
        .unwrap();
        assert_eq!(result.archive.n_evals(), 5);
        assert_eq!(result.archive.n_batches(), 3);
    }

    #[test]
    fn test_perf_reached_stops_early() {
        let task = blobs(24);
        let points = (1..=5)
            .map(|k| ParamValues::new().with("k", ParamValue::Int(k)))
            .collect();
        let result = tune(
            &task,
            knn(),
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::holdout(0.75),
            Arc::new(ClassifError),
            Arc::new(DesignPoints::new(points)),
            Terminator::PerfReached(1.0),
        )
        .unwrap();
        // any score reaches 1.0 when minimizing
        assert_eq!(result.archive.n_evals(), 1);
    }

    #[test]
    fn test_failing_candidates_do_not_win() {
        let task = blobs(12);
        // k above the inner training size fails every fold
        let result = tune(
            &task,
            knn(),
            SearchSpace::new().int("k", 2, 50),
            PartitionSpec::cv(3),
            Arc::new(ClassifError),
            Arc::new(GridSearch::new(2)),
            Terminator::None,
        )
        .unwrap();
        let failed = &result.archive.entries()[1];
        assert!(failed.score.is_nan());
        assert_eq!(failed.errors, 3);
        assert_eq!(result.best_params.get("k"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn test_search_space_must_fit_learner() {
        let featureless: Arc<dyn Learner> =
            Arc::new(FeaturelessLearner::new(TaskType::Classification));
        let err = Tuner::new(
            featureless,
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::cv(3),
            Arc::new(ClassifError),
            Arc::new(GridSearch::new(3)),
            Terminator::None,
        )
        .unwrap_err();
        assert!(err.is_configuration());

        let err = Tuner::new(
            knn(),
            SearchSpace::new().int("k", 1, 5),
            PartitionSpec::cv(3),
            Arc::new(LogLoss::default()),
            Arc::new(GridSearch::new(3)),
            Terminator::None,
        );
        assert!(err.is_ok());
    }
}
