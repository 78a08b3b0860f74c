//! Resampling execution and its result container

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ml_resample_core::{
    check_compatible, mean_of_scored, Average, ExecutionConfig, Learner, Measure, Model,
    Partitioning, PredictType, Prediction, Resampling, Task,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::iteration::{IterationError, IterationExecutor, IterationResult};
use crate::pool::WorkerPool;

/// Options for a resampling or benchmark run
#[derive(Clone, Default)]
pub struct ResamplingOptions {
    /// Execution settings
    pub config: ExecutionConfig,

    /// Measures scored per iteration as soon as it finishes
    pub measures: Vec<Arc<dyn Measure>>,

    /// Learner used when the primary learner fails an iteration
    pub fallback: Option<Arc<dyn Learner>>,

    /// Token checked before each unit is started
    pub cancel: Option<CancellationToken>,
}

impl ResamplingOptions {
    /// Default options: sequential, models discarded
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the execution settings
    #[must_use]
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep fitted models
    #[must_use]
    pub fn retain_models(mut self, retain: bool) -> Self {
        self.config.retain_models = retain;
        self
    }

    /// Run units on a worker pool
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Score these measures per iteration
    #[must_use]
    pub fn with_measures(mut self, measures: Vec<Arc<dyn Measure>>) -> Self {
        self.measures = measures;
        self
    }

    /// Fall back to `learner` when an iteration fails
    #[must_use]
    pub fn with_fallback(mut self, learner: Arc<dyn Learner>) -> Self {
        self.fallback = Some(learner);
        self
    }

    /// Observe `token` between units
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub(crate) fn executor(&self) -> IterationExecutor {
        IterationExecutor::new(self.config.clone())
            .with_measures(self.measures.clone())
            .with_fallback(self.fallback.clone())
    }
}

impl fmt::Debug for ResamplingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResamplingOptions")
            .field("config", &self.config)
            .field("measures", &self.measures)
            .field("fallback", &self.fallback.as_ref().map(|l| l.key()))
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Check that `measures` can score predictions of `learner` on `task`
pub fn check_measures(
    measures: &[Arc<dyn Measure>],
    task: &Task,
    learner: &dyn Learner,
) -> ml_resample_core::Result<()> {
    for measure in measures {
        check_measure(measure.as_ref(), task)?;
        if measure.predict_type() == PredictType::Prob
            && !learner.predict_types().contains(&PredictType::Prob)
        {
            return Err(ml_resample_core::Error::config(format!(
                "measure '{}' needs probabilities, which learner '{}' does not predict",
                measure.id(),
                learner.id()
            )));
        }
    }
    Ok(())
}

fn check_measure(measure: &dyn Measure, task: &Task) -> ml_resample_core::Result<()> {
    if measure.task_type() != task.task_type() {
        return Err(ml_resample_core::Error::config(format!(
            "measure '{}' ({}) cannot score task '{}' ({})",
            measure.id(),
            measure.task_type(),
            task.id(),
            task.task_type()
        )));
    }
    Ok(())
}

/// Runs every split of a partitioning through the iteration executor
#[derive(Debug)]
pub struct ResamplingEngine {
    options: ResamplingOptions,
    pool: WorkerPool,
}

impl ResamplingEngine {
    /// Engine for `options`; builds the worker pool when running in parallel
    pub fn new(options: ResamplingOptions) -> Result<Self> {
        let pool = WorkerPool::new(&options.config)?;
        Ok(Self { options, pool })
    }

    /// Engine that runs iterations in order, whatever `options` say
    pub(crate) fn sequential(options: ResamplingOptions) -> Self {
        Self {
            options,
            pool: WorkerPool::sequential(),
        }
    }

    /// Options this engine runs with
    pub fn options(&self) -> &ResamplingOptions {
        &self.options
    }

    /// Validate a run and materialize its splits
    ///
    /// Everything that can be detected without fitting is checked here, so
    /// that configuration errors abort before any unit starts.
    pub fn prepare(
        &self,
        task: &Task,
        learner: &dyn Learner,
        resampling: &Resampling,
    ) -> Result<Arc<Partitioning>> {
        check_compatible(learner, task)?;
        if let Some(fallback) = &self.options.fallback {
            check_compatible(fallback.as_ref(), task)?;
        }
        check_measures(&self.options.measures, task, learner)?;
        Ok(resampling.partitioning_for(task)?)
    }

    /// Resample `learner` on `task`
    pub fn execute(
        &self,
        task: &Task,
        learner: &Arc<dyn Learner>,
        resampling: &Resampling,
    ) -> Result<ResampleResult> {
        let partitioning = self.prepare(task, learner.as_ref(), resampling)?;
        Ok(self.run_prepared(task, learner, &partitioning))
    }

    pub(crate) fn run_prepared(
        &self,
        task: &Task,
        learner: &Arc<dyn Learner>,
        partitioning: &Arc<Partitioning>,
    ) -> ResampleResult {
        info!(
            task = task.id(),
            learner = learner.id(),
            resampling = partitioning.id(),
            iters = partitioning.iters(),
            workers = self.pool.workers(),
            "resampling started"
        );

        let executor = self.options.executor();
        let splits: Vec<usize> = (1..=partitioning.iters()).collect();
        let iterations = self.pool.map(&splits, |_, &split| {
            if self.options.is_cancelled() {
                debug!(split, "skipping cancelled iteration");
                return IterationResult::cancelled(partitioning, split);
            }
            executor.run(learner, task, partitioning, split)
        });

        let result = ResampleResult::new(task.clone(), Arc::clone(learner), iterations);
        info!(
            task = task.id(),
            learner = learner.id(),
            errors = result.errors().len(),
            "resampling finished"
        );
        result
    }
}

/// Resample `learner` on `task` with a one-off engine
pub fn resample(
    task: &Task,
    learner: &Arc<dyn Learner>,
    resampling: impl Into<Resampling>,
    options: ResamplingOptions,
) -> Result<ResampleResult> {
    ResamplingEngine::new(options)?.execute(task, learner, &resampling.into())
}

/// One row of a per-iteration score table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    /// 1-based benchmark row, 1 for a standalone resampling
    pub row: usize,

    /// 1-based iteration
    pub iteration: usize,

    /// Task id
    pub task_id: String,

    /// Learner id
    pub learner_id: String,

    /// Resampling id
    pub resampling_id: String,

    /// Scores by measure id; `NaN` for iterations without a prediction
    pub scores: BTreeMap<String, f64>,

    /// Number of errors recorded in the iteration
    pub errors: usize,
}

/// Results of all iterations of one learner on one task
///
/// Iterations are stored by logical position, never by completion order.
#[derive(Clone)]
pub struct ResampleResult {
    id: Uuid,
    task: Task,
    learner: Arc<dyn Learner>,
    iterations: Vec<IterationResult>,
}

impl ResampleResult {
    /// Assemble a result from iterations already in logical order
    pub fn new(task: Task, learner: Arc<dyn Learner>, mut iterations: Vec<IterationResult>) -> Self {
        for (i, iteration) in iterations.iter_mut().enumerate() {
            iteration.renumber(i + 1);
        }
        Self {
            id: Uuid::new_v4(),
            task,
            learner,
            iterations,
        }
    }

    /// Unique id of this result
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Task resampled on
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Learner resampled
    pub fn learner(&self) -> &Arc<dyn Learner> {
        &self.learner
    }

    /// Resampling id of the first iteration, `"empty"` without iterations
    pub fn resampling_id(&self) -> &'static str {
        self.iterations
            .first()
            .map_or("empty", |it| it.partitioning().id())
    }

    /// Number of iterations
    pub fn iters(&self) -> usize {
        self.iterations.len()
    }

    /// All iterations in logical order
    pub fn iterations(&self) -> &[IterationResult] {
        &self.iterations
    }

    /// Iteration `i`, 1-based
    pub fn iteration(&self, i: usize) -> Result<&IterationResult> {
        if i == 0 || i > self.iterations.len() {
            return Err(ml_resample_core::Error::IndexOutOfBounds {
                index: i,
                len: self.iterations.len(),
            }
            .into());
        }
        Ok(&self.iterations[i - 1])
    }

    /// Score of every iteration, in partition order
    ///
    /// Iterations without a prediction score `NaN`.
    pub fn performance(&self, measure: &dyn Measure) -> Result<Vec<f64>> {
        check_measure(measure, &self.task)?;
        Ok(self.iterations.iter().map(|it| it.score(measure)).collect())
    }

    /// Aggregate score over all iterations
    ///
    /// Macro-averaged measures take the mean over scored iterations,
    /// excluding `NaN`; micro-averaged measures score the pooled
    /// prediction. `NaN` when nothing could be scored.
    pub fn aggregate(&self, measure: &dyn Measure) -> Result<f64> {
        check_measure(measure, &self.task)?;
        match measure.average() {
            Average::Macro => Ok(mean_of_scored(&self.performance(measure)?)),
            Average::Micro => match self.prediction() {
                Some(pooled) => Ok(measure.score(&pooled).unwrap_or(f64::NAN)),
                None => Ok(f64::NAN),
            },
        }
    }

    /// Per-iteration score table for several measures
    pub fn score(&self, measures: &[Arc<dyn Measure>]) -> Result<Vec<ScoreRow>> {
        self.score_rows(1, measures)
    }

    pub(crate) fn score_rows(
        &self,
        row: usize,
        measures: &[Arc<dyn Measure>],
    ) -> Result<Vec<ScoreRow>> {
        for measure in measures {
            check_measure(measure.as_ref(), &self.task)?;
        }
        Ok(self
            .iterations
            .iter()
            .map(|it| ScoreRow {
                row,
                iteration: it.iteration(),
                task_id: self.task.id().to_string(),
                learner_id: self.learner.id().to_string(),
                resampling_id: it.partitioning().id().to_string(),
                scores: measures
                    .iter()
                    .map(|m| (m.id().to_string(), it.score(m.as_ref())))
                    .collect(),
                errors: it.errors().len(),
            })
            .collect())
    }

    /// Every recorded error with its 1-based iteration
    pub fn errors(&self) -> Vec<(usize, &IterationError)> {
        self.iterations
            .iter()
            .flat_map(|it| it.errors().iter().map(move |e| (it.iteration(), e)))
            .collect()
    }

    /// Every learner warning with its 1-based iteration
    pub fn warnings(&self) -> Vec<(usize, &str)> {
        self.iterations
            .iter()
            .flat_map(|it| it.warnings().iter().map(move |w| (it.iteration(), w.as_str())))
            .collect()
    }

    /// Fitted model per iteration; `None` unless models were retained
    pub fn models(&self) -> Vec<Option<&Model>> {
        self.iterations.iter().map(IterationResult::model).collect()
    }

    /// Prediction per iteration; `None` for failed iterations
    pub fn predictions(&self) -> Vec<Option<&Prediction>> {
        self.iterations.iter().map(IterationResult::prediction).collect()
    }

    /// All iteration predictions pooled into one; `None` if there are none
    pub fn prediction(&self) -> Option<Prediction> {
        let parts: Vec<&Prediction> = self.predictions().into_iter().flatten().collect();
        if parts.is_empty() {
            return None;
        }
        Prediction::concat(&parts).ok()
    }

    /// Concatenate the iterations of two results for the same task and
    /// learner configuration
    pub fn combine(&self, other: &ResampleResult) -> Result<ResampleResult> {
        if self.task.key() != other.task.key() {
            return Err(ml_resample_core::Error::IncompatibleResult(format!(
                "task '{}' differs from task '{}'",
                self.task.id(),
                other.task.id()
            ))
            .into());
        }
        if self.learner.key() != other.learner.key() {
            return Err(ml_resample_core::Error::IncompatibleResult(format!(
                "learner '{}' differs from learner '{}'",
                self.learner.key(),
                other.learner.key()
            ))
            .into());
        }
        let iterations = self
            .iterations
            .iter()
            .chain(&other.iterations)
            .cloned()
            .collect();
        Ok(ResampleResult::new(
            self.task.clone(),
            Arc::clone(&self.learner),
            iterations,
        ))
    }

    /// Result restricted to the given 1-based iterations, renumbered
    pub fn filter(&self, iterations: &[usize]) -> Result<ResampleResult> {
        let kept = iterations
            .iter()
            .map(|&i| self.iteration(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(ResampleResult::new(
            self.task.clone(),
            Arc::clone(&self.learner),
            kept,
        ))
    }
}

impl fmt::Debug for ResampleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResampleResult")
            .field("id", &self.id)
            .field("task", &self.task.id())
            .field("learner", &self.learner.key())
            .field("resampling", &self.resampling_id())
            .field("iters", &self.iters())
            .field("errors", &self.errors().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iteration::Stage;
    use crate::testing::{init_tracing, toy_task, FailingLearner, Failure};
    use ml_resample_core::measures::{Accuracy, ClassifError, LogLoss};
    use ml_resample_core::{
        Direction, FeaturelessLearner, KnnLearner, PartitionSpec, Result as CoreResult, RowId,
        TaskType,
    };
    use proptest::prelude::*;

    fn featureless() -> Arc<dyn Learner> {
        Arc::new(FeaturelessLearner::new(TaskType::Classification))
    }

    /// Returns fixed scores per iteration, in prediction order
    struct Scripted(Vec<f64>);

    impl Measure for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        fn task_type(&self) -> TaskType {
            TaskType::Classification
        }

        fn direction(&self) -> Direction {
            Direction::Minimize
        }

        fn score(&self, prediction: &Prediction) -> CoreResult<f64> {
            // the first test row identifies the fold
            let first = match &prediction.row_ids()[0] {
                RowId::Int(i) => usize::try_from(*i).unwrap(),
                RowId::Str(_) => unreachable!(),
            };
            Ok(self.0[first - 1])
        }
    }

    #[test]
    fn test_aggregate_is_mean_of_performance() {
        let task = toy_task(3);
        let id = RowId::Int;
        let spec = PartitionSpec::custom(
            vec![vec![id(2), id(3)], vec![id(1), id(3)], vec![id(1), id(2)]],
            vec![vec![id(1)], vec![id(2)], vec![id(3)]],
        );
        let rr = resample(&task, &featureless(), spec, ResamplingOptions::new()).unwrap();
        let measure = Scripted(vec![0.1, 0.2, 0.3]);
        let perf = rr.performance(&measure).unwrap();
        assert_eq!(perf, vec![0.1, 0.2, 0.3]);
        assert!((rr.aggregate(&measure).unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_one_failing_fold_does_not_void_the_others() {
        init_tracing();
        let task = toy_task(20);
        let partitioning = PartitionSpec::cv(5).with_seed(3).instantiate(&task).unwrap();
        let trigger = partitioning.test_set(4).unwrap()[0].clone();
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Train, trigger));

        let rr = resample(&task, &learner, partitioning, ResamplingOptions::new()).unwrap();
        assert_eq!(rr.iters(), 5);
        let errors = rr.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 4);
        assert_eq!(errors[0].1.stage, Stage::Train);
        assert_eq!(rr.predictions().iter().filter(|p| p.is_some()).count(), 4);

        let perf = rr.performance(&ClassifError).unwrap();
        assert!(perf[3].is_nan());
        let expected = (perf[0] + perf[1] + perf[2] + perf[4]) / 4.0;
        assert!((rr.aggregate(&ClassifError).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let task = toy_task(30);
        let learner: Arc<dyn Learner> = Arc::new(KnnLearner::new(TaskType::Classification));
        let spec = PartitionSpec::repeated_cv(3, 2).with_seed(11);

        let seq = resample(&task, &learner, spec.clone(), ResamplingOptions::new()).unwrap();
        let par = resample(
            &task,
            &learner,
            spec,
            ResamplingOptions::new().with_config(ExecutionConfig::parallel(4)),
        )
        .unwrap();

        assert_eq!(seq.iters(), par.iters());
        for (a, b) in seq.iterations().iter().zip(par.iterations()) {
            assert_eq!(a.test_ids(), b.test_ids());
            assert_eq!(a.prediction(), b.prediction());
        }
    }

    #[test]
    fn test_models_retained_only_on_request() {
        let task = toy_task(9);
        let dropped = resample(&task, &featureless(), PartitionSpec::cv(3), ResamplingOptions::new())
            .unwrap();
        assert!(dropped.models().iter().all(Option::is_none));

        let kept = resample(
            &task,
            &featureless(),
            PartitionSpec::cv(3),
            ResamplingOptions::new().retain_models(true),
        )
        .unwrap();
        for it in kept.iterations() {
            assert_eq!(it.model().unwrap().train_rows(), it.train_ids());
        }
    }

    #[test]
    fn test_combine_requires_same_learner() {
        let task = toy_task(9);
        let a = resample(&task, &featureless(), PartitionSpec::cv(3), ResamplingOptions::new())
            .unwrap();
        let b = resample(&task, &featureless(), PartitionSpec::holdout(0.5), ResamplingOptions::new())
            .unwrap();
        let combined = a.combine(&b).unwrap();
        assert_eq!(combined.iters(), 4);
        assert_eq!(combined.iteration(4).unwrap().split(), 1);

        let knn: Arc<dyn Learner> = Arc::new(KnnLearner::new(TaskType::Classification));
        let c = resample(&task, &knn, PartitionSpec::holdout(0.5), ResamplingOptions::new())
            .unwrap();
        let err = a.combine(&c).unwrap_err();
        assert!(err.is_incompatible());
    }

    #[test]
    fn test_incompatible_measure_fails_fast() {
        let task = toy_task(9);
        let learner: Arc<dyn Learner> =
            Arc::new(FailingLearner::new(Failure::Train, RowId::Int(1)));
        let options = ResamplingOptions::new().with_measures(vec![Arc::new(LogLoss::default())]);
        let err = resample(&task, &learner, PartitionSpec::cv(3), options).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_cancelled_run_skips_every_unit() {
        let task = toy_task(9);
        let token = CancellationToken::new();
        token.cancel();
        let rr = resample(
            &task,
            &featureless(),
            PartitionSpec::cv(3),
            ResamplingOptions::new().with_cancellation(token),
        )
        .unwrap();
        assert!(rr.iterations().iter().all(IterationResult::is_cancelled));
        assert!(rr.aggregate(&Accuracy).unwrap().is_nan());
    }

    /// Classification error scored once on the pooled prediction
    struct PooledError;

    impl Measure for PooledError {
        fn id(&self) -> &str {
            "classif.ce.micro"
        }

        fn task_type(&self) -> TaskType {
            TaskType::Classification
        }

        fn direction(&self) -> Direction {
            Direction::Minimize
        }

        fn average(&self) -> Average {
            Average::Micro
        }

        fn score(&self, prediction: &Prediction) -> CoreResult<f64> {
            ClassifError.score(prediction)
        }
    }

    #[test]
    fn test_micro_average_scores_pooled_prediction() {
        let task = toy_task(10);
        let learner: Arc<dyn Learner> = Arc::new(KnnLearner::new(TaskType::Classification));
        let rr = resample(
            &task,
            &learner,
            PartitionSpec::cv(3).with_seed(2),
            ResamplingOptions::new(),
        )
        .unwrap();
        let pooled = rr.prediction().unwrap();
        assert_eq!(pooled.len(), 10);
        let expected = ClassifError.score(&pooled).unwrap();
        assert!((rr.aggregate(&PooledError).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_micro_average_skips_failed_iterations() {
        let task = toy_task(12);
        let partitioning = PartitionSpec::cv(3).with_seed(8).instantiate(&task).unwrap();
        let trigger = partitioning.test_set(2).unwrap()[0].clone();
        let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Train, trigger));
        let rr = resample(&task, &learner, partitioning, ResamplingOptions::new()).unwrap();

        let pooled = rr.prediction().unwrap();
        assert_eq!(pooled.len(), 8);
        let expected = ClassifError.score(&pooled).unwrap();
        assert!((rr.aggregate(&PooledError).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cancellation_mid_run_keeps_finished_units() {
        let task = toy_task(15);
        let partitioning = PartitionSpec::cv(5).with_seed(4).instantiate(&task).unwrap();
        // training without this row happens in the second iteration only
        let trigger = partitioning.test_set(2).unwrap()[0].clone();
        let learner = FailingLearner::new(Failure::Cancel, trigger);
        let token = learner.token();
        let learner: Arc<dyn Learner> = Arc::new(learner);

        let rr = resample(
            &task,
            &learner,
            partitioning,
            ResamplingOptions::new().with_cancellation(token),
        )
        .unwrap();
        let cancelled: Vec<bool> =
            rr.iterations().iter().map(IterationResult::is_cancelled).collect();
        assert_eq!(cancelled, [false, false, true, true, true]);
        assert!(rr.iterations()[..2].iter().all(|it| it.prediction().is_some()));

        let perf = rr.performance(&ClassifError).unwrap();
        assert!(perf[2..].iter().all(|s| s.is_nan()));
        let expected = (perf[0] + perf[1]) / 2.0;
        assert!((rr.aggregate(&ClassifError).unwrap() - expected).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_macro_aggregate_is_mean_of_scored_performance(
            n in 8usize..30,
            folds in 2usize..6,
            seed in any::<u64>(),
            pick in any::<prop::sample::Index>(),
        ) {
            let task = toy_task(n);
            let partitioning =
                PartitionSpec::cv(folds).with_seed(seed).instantiate(&task).unwrap();
            let trigger = pick.get(task.row_ids()).clone();
            let learner: Arc<dyn Learner> = Arc::new(FailingLearner::new(Failure::Train, trigger));
            let rr = resample(&task, &learner, partitioning, ResamplingOptions::new()).unwrap();

            let perf = rr.performance(&ClassifError).unwrap();
            prop_assert_eq!(perf.iter().filter(|s| s.is_nan()).count(), 1);
            let aggregate = rr.aggregate(&ClassifError).unwrap();
            prop_assert!((aggregate - mean_of_scored(&perf)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pooled_prediction_and_filter() {
        let task = toy_task(10);
        let rr = resample(
            &task,
            &featureless(),
            PartitionSpec::cv(5).with_seed(1),
            ResamplingOptions::new(),
        )
        .unwrap();
        let pooled = rr.prediction().unwrap();
        assert_eq!(pooled.len(), 10);
        assert_eq!(rr.filter(&[2, 5]).unwrap().iters(), 2);
    }
}
