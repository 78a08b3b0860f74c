//! Benchmark designs: tasks × learners × resamplings

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ml_resample_core::{Learner, Measure, PartitionSpec, Partitioning, Resampling, Task};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::iteration::IterationError;
use crate::pool::WorkerPool;
use crate::resampling::{ResampleResult, ResamplingEngine, ResamplingOptions, ScoreRow};

/// One experiment of a benchmark design
#[derive(Clone)]
pub struct DesignRow {
    /// Task to resample on
    pub task: Task,

    /// Learner to resample
    pub learner: Arc<dyn Learner>,

    /// Splits to use; a bare spec is instantiated for this row alone
    pub resampling: Resampling,
}

impl DesignRow {
    /// New design row
    pub fn new(task: Task, learner: Arc<dyn Learner>, resampling: impl Into<Resampling>) -> Self {
        Self {
            task,
            learner,
            resampling: resampling.into(),
        }
    }
}

impl fmt::Debug for DesignRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesignRow")
            .field("task", &self.task.id())
            .field("learner", &self.learner.key())
            .field("resampling", &self.resampling.id())
            .field("instantiated", &self.resampling.is_instantiated())
            .finish()
    }
}

/// Full cross product of tasks, learners and partition specs
///
/// Each (task, spec) pair is instantiated exactly once and the resulting
/// partitioning is shared by every learner paired with it, so all learners
/// see identical splits. Rows are ordered task, then learner, then spec.
pub fn expand_grid(
    tasks: &[Task],
    learners: &[Arc<dyn Learner>],
    specs: &[PartitionSpec],
) -> Result<Vec<DesignRow>> {
    let instantiated = tasks
        .iter()
        .map(|task| {
            specs
                .iter()
                .map(|spec| -> Result<Arc<Partitioning>> {
                    Ok(Arc::new(spec.instantiate(task)?))
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut design = Vec::with_capacity(tasks.len() * learners.len() * specs.len());
    for (task, partitionings) in tasks.iter().zip(&instantiated) {
        for learner in learners {
            for partitioning in partitionings {
                design.push(DesignRow {
                    task: task.clone(),
                    learner: Arc::clone(learner),
                    resampling: Resampling::Instantiated(Arc::clone(partitioning)),
                });
            }
        }
    }
    debug!(
        rows = design.len(),
        partitionings = tasks.len() * specs.len(),
        "expanded benchmark grid"
    );
    Ok(design)
}

/// Runs every row of a design through the resampling engine
///
/// Rows are the unit of dispatch; iterations within a row run in order.
#[derive(Debug)]
pub struct BenchmarkEngine {
    rows: ResamplingEngine,
    pool: WorkerPool,
}

impl BenchmarkEngine {
    /// Engine for `options`; rows run in parallel when requested
    pub fn new(options: ResamplingOptions) -> Result<Self> {
        let pool = WorkerPool::new(&options.config)?;
        Ok(Self {
            rows: ResamplingEngine::sequential(options),
            pool,
        })
    }

    /// Execute a design
    ///
    /// All rows are validated and instantiated before the first one runs.
    /// A failing learner only shows up in its own row's error log.
    pub fn execute(&self, design: &[DesignRow]) -> Result<BenchmarkResult> {
        let prepared = design
            .iter()
            .map(|row| {
                self.rows
                    .prepare(&row.task, row.learner.as_ref(), &row.resampling)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            rows = design.len(),
            workers = self.pool.workers(),
            "benchmark started"
        );
        let results = self.pool.map(design, |i, row| {
            debug!(
                row = i + 1,
                task = row.task.id(),
                learner = row.learner.id(),
                "dispatching design row"
            );
            self.rows.run_prepared(&row.task, &row.learner, &prepared[i])
        });

        let result = BenchmarkResult::new(results);
        info!(
            rows = result.rows(),
            errors = result.errors().len(),
            "benchmark finished"
        );
        Ok(result)
    }
}

/// Run a design with a one-off engine
pub fn benchmark(design: &[DesignRow], options: ResamplingOptions) -> Result<BenchmarkResult> {
    BenchmarkEngine::new(options)?.execute(design)
}

/// Aggregated scores of one benchmark row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// 1-based benchmark row
    pub row: usize,

    /// Task id
    pub task_id: String,

    /// Learner id
    pub learner_id: String,

    /// Learner id with its configuration
    pub learner_key: String,

    /// Resampling id
    pub resampling_id: String,

    /// Number of iterations
    pub iters: usize,

    /// Number of iterations with at least one error
    pub errors: usize,

    /// Aggregated score by measure id
    pub scores: BTreeMap<String, f64>,
}

/// Table keyed by (task, learner, measure), one entry per benchmark row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    rows: Vec<AggregateRow>,
}

impl AggregateTable {
    /// All rows in design order
    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    /// Aggregated score of `measure` for the first row matching `task` and
    /// `learner` (matched against the learner id or its full key)
    pub fn get(&self, task: &str, learner: &str, measure: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.task_id == task && (r.learner_id == learner || r.learner_key == learner))
            .and_then(|r| r.scores.get(measure).copied())
    }

    /// Serialize the table as JSON; `NaN` scores become `null`
    pub fn to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self).map_err(ml_resample_core::Error::from)?;
        Ok(json)
    }
}

/// Results of a benchmark, one resample result per design row
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    id: Uuid,
    results: Vec<ResampleResult>,
}

impl BenchmarkResult {
    /// Collect resample results in design order
    pub fn new(results: Vec<ResampleResult>) -> Self {
        Self {
            id: Uuid::new_v4(),
            results,
        }
    }

    /// Unique id of this result
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of design rows
    pub fn rows(&self) -> usize {
        self.results.len()
    }

    /// All resample results in design order
    pub fn resample_results(&self) -> &[ResampleResult] {
        &self.results
    }

    /// Resample result of row `i`, 1-based
    pub fn resample_result(&self, i: usize) -> Result<&ResampleResult> {
        if i == 0 || i > self.results.len() {
            return Err(ml_resample_core::Error::IndexOutOfBounds {
                index: i,
                len: self.results.len(),
            }
            .into());
        }
        Ok(&self.results[i - 1])
    }

    /// Standalone copy of row `i`'s resample result, 1-based
    pub fn extract(&self, i: usize) -> Result<ResampleResult> {
        self.resample_result(i).cloned()
    }

    /// Benchmark restricted to the given 1-based rows
    pub fn filter(&self, rows: &[usize]) -> Result<BenchmarkResult> {
        let kept = rows
            .iter()
            .map(|&i| self.extract(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(BenchmarkResult::new(kept))
    }

    /// Aggregated score per row and measure
    pub fn aggregate(&self, measures: &[Arc<dyn Measure>]) -> Result<AggregateTable> {
        let rows = self
            .results
            .iter()
            .enumerate()
            .map(|(i, rr)| -> Result<AggregateRow> {
                let scores = measures
                    .iter()
                    .map(|m| rr.aggregate(m.as_ref()).map(|score| (m.id().to_string(), score)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(AggregateRow {
                    row: i + 1,
                    task_id: rr.task().id().to_string(),
                    learner_id: rr.learner().id().to_string(),
                    learner_key: rr.learner().key(),
                    resampling_id: rr.resampling_id().to_string(),
                    iters: rr.iters(),
                    errors: rr.iterations().iter().filter(|it| it.has_errors()).count(),
                    scores,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregateTable { rows })
    }

    /// Per-iteration scores of every row
    pub fn score(&self, measures: &[Arc<dyn Measure>]) -> Result<Vec<ScoreRow>> {
        let mut table = Vec::new();
        for (i, rr) in self.results.iter().enumerate() {
            table.extend(rr.score_rows(i + 1, measures)?);
        }
        Ok(table)
    }

    /// Every recorded error as (row, iteration, error), 1-based
    pub fn errors(&self) -> Vec<(usize, usize, &IterationError)> {
        self.results
            .iter()
            .enumerate()
            .flat_map(|(i, rr)| {
                rr.errors()
                    .into_iter()
                    .map(move |(iteration, e)| (i + 1, iteration, e))
            })
            .collect()
    }

    /// Append the rows of `other`
    pub fn combine(&self, other: &BenchmarkResult) -> BenchmarkResult {
        BenchmarkResult::new(
            self.results
                .iter()
                .chain(&other.results)
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_task, FailingLearner, Failure};
    use ml_resample_core::measures::{Accuracy, ClassifError};
    use ml_resample_core::{ExecutionConfig, FeaturelessLearner, KnnLearner, RowId, TaskType};

    fn learners() -> Vec<Arc<dyn Learner>> {
        vec![
            Arc::new(FeaturelessLearner::new(TaskType::Classification)),
            Arc::new(KnnLearner::new(TaskType::Classification)),
        ]
    }

    fn splits_of(row: &DesignRow) -> Arc<Partitioning> {
        match &row.resampling {
            Resampling::Instantiated(p) => Arc::clone(p),
            Resampling::Uninstantiated(_) => panic!("row was not instantiated"),
        }
    }

    #[test]
    fn test_expand_grid_shares_partitioning() {
        let task = toy_task(30);
        let design = expand_grid(&[task], &learners(), &[PartitionSpec::holdout(0.8)]).unwrap();
        assert_eq!(design.len(), 2);

        let a = splits_of(&design[0]);
        let b = splits_of(&design[1]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.train_set(1).unwrap(), b.train_set(1).unwrap());
        assert_eq!(a.test_set(1).unwrap(), b.test_set(1).unwrap());
    }

    #[test]
    fn test_expand_grid_order_and_size() {
        let tasks = vec![toy_task(20), toy_task(24)];
        let specs = vec![PartitionSpec::cv(3), PartitionSpec::holdout(0.5)];
        let design = expand_grid(&tasks, &learners(), &specs).unwrap();
        assert_eq!(design.len(), 8);
        assert_eq!(design[1].resampling.id(), "holdout");
        assert_eq!(design[2].learner.id(), "classif.kknn");
        assert_eq!(design[4].task.nrow(), 24);
    }

    #[test]
    fn test_failing_row_is_isolated() {
        let task = toy_task(20);
        let failing: Arc<dyn Learner> =
            Arc::new(FailingLearner::new(Failure::Train, RowId::Int(1)));
        let mut all = learners();
        all.push(failing);
        let design = expand_grid(&[task], &all, &[PartitionSpec::cv(4)]).unwrap();

        let bmr = benchmark(&design, ResamplingOptions::new()).unwrap();
        assert_eq!(bmr.rows(), 3);
        let errors = bmr.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 3);

        let measures: Vec<Arc<dyn Measure>> = vec![Arc::new(ClassifError), Arc::new(Accuracy)];
        let table = bmr.aggregate(&measures).unwrap();
        assert_eq!(table.rows()[2].errors, 1);
        let ce = table.get("toy", "classif.featureless", "classif.ce").unwrap();
        let acc = table.get("toy", "classif.featureless", "classif.acc").unwrap();
        assert!((ce + acc - 1.0).abs() < 1e-12);
        assert!(table.to_json().unwrap().contains("classif.kknn"));
    }

    #[test]
    fn test_parallel_rows_keep_design_order() {
        let task = toy_task(30);
        let design = expand_grid(&[task], &learners(), &[PartitionSpec::cv(3)]).unwrap();
        let bmr = benchmark(
            &design,
            ResamplingOptions::new().with_config(ExecutionConfig::parallel(2)),
        )
        .unwrap();
        let ids: Vec<&str> = bmr
            .resample_results()
            .iter()
            .map(|rr| rr.learner().id())
            .collect();
        assert_eq!(ids, ["classif.featureless", "classif.kknn"]);
    }

    #[test]
    fn test_invalid_row_aborts_before_running() {
        let task = toy_task(4);
        let design = vec![
            DesignRow::new(task.clone(), learners()[0].clone(), PartitionSpec::cv(2)),
            DesignRow::new(task, learners()[0].clone(), PartitionSpec::cv(10)),
        ];
        let err = benchmark(&design, ResamplingOptions::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_extract_filter_and_combine() {
        let task = toy_task(12);
        let design = expand_grid(&[task], &learners(), &[PartitionSpec::cv(3)]).unwrap();
        let bmr = benchmark(&design, ResamplingOptions::new()).unwrap();

        let rr = bmr.extract(2).unwrap();
        assert_eq!(rr.learner().id(), "classif.kknn");
        assert!(bmr.extract(3).is_err());

        let combined = bmr.combine(&bmr.filter(&[1]).unwrap());
        assert_eq!(combined.rows(), 3);
        let scores = combined.score(&[Arc::new(ClassifError) as Arc<dyn Measure>]).unwrap();
        assert_eq!(scores.len(), 9);
        assert_eq!(scores[8].row, 3);
    }
}
