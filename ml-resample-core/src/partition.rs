//! Partition generation: turning row ids into train/test splits
//!
//! A [`PartitionSpec`] describes a strategy; [`generate`] materializes it
//! into a [`Partitioning`] for one concrete row-id set. Generation is pure:
//! the same row ids, spec and seed always give the same splits.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::task::{Task, TaskType};
use crate::value::RowId;

/// Seed used when a spec does not carry one
pub const DEFAULT_SEED: u64 = 0x5eed_cafe;

/// Resampling strategy with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    /// One split, `ratio` of the rows go to train
    Holdout {
        /// Share of rows used for training, in `(0, 1)`
        ratio: f64,
    },

    /// k-fold cross-validation, optionally repeated
    CrossValidation {
        /// Number of folds, at least 2
        folds: usize,
        /// Number of independent repetitions, at least 1
        repeats: usize,
    },

    /// One fold per row
    LeaveOneOut,

    /// Train on a sample drawn with replacement, test on the rows never drawn
    Bootstrap {
        /// Number of splits, at least 1
        repeats: usize,
        /// Sample size as a share of the rows, in `(0, 1]`
        ratio: f64,
    },

    /// Repeated holdout
    Subsampling {
        /// Number of splits, at least 1
        repeats: usize,
        /// Share of rows used for training, in `(0, 1)`
        ratio: f64,
    },

    /// Caller-supplied splits
    Custom {
        /// Train rows per split
        train_sets: Vec<Vec<RowId>>,
        /// Test rows per split
        test_sets: Vec<Vec<RowId>>,
    },
}

/// An immutable resampling description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSpec {
    strategy: Strategy,
    seed: Option<u64>,
    stratify: bool,
}

impl PartitionSpec {
    /// Spec for an arbitrary strategy
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            seed: None,
            stratify: false,
        }
    }

    /// Holdout with `ratio` of the rows in train
    pub fn holdout(ratio: f64) -> Self {
        Self::new(Strategy::Holdout { ratio })
    }

    /// k-fold cross-validation
    pub fn cv(folds: usize) -> Self {
        Self::new(Strategy::CrossValidation { folds, repeats: 1 })
    }

    /// Repeated k-fold cross-validation
    pub fn repeated_cv(folds: usize, repeats: usize) -> Self {
        Self::new(Strategy::CrossValidation { folds, repeats })
    }

    /// Leave-one-out
    pub fn loo() -> Self {
        Self::new(Strategy::LeaveOneOut)
    }

    /// Bootstrap with full-size samples
    pub fn bootstrap(repeats: usize) -> Self {
        Self::new(Strategy::Bootstrap { repeats, ratio: 1.0 })
    }

    /// Repeated holdout
    pub fn subsampling(repeats: usize, ratio: f64) -> Self {
        Self::new(Strategy::Subsampling { repeats, ratio })
    }

    /// Explicit splits
    pub fn custom(train_sets: Vec<Vec<RowId>>, test_sets: Vec<Vec<RowId>>) -> Self {
        Self::new(Strategy::Custom {
            train_sets,
            test_sets,
        })
    }

    /// Copy of this spec with an explicit seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Copy of this spec with stratification by target switched on or off
    #[must_use]
    pub fn stratified(mut self, stratify: bool) -> Self {
        self.stratify = stratify;
        self
    }

    /// Strategy and parameters
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Explicit seed, if any
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Whether splits are stratified by target
    pub fn is_stratified(&self) -> bool {
        self.stratify
    }

    /// Short strategy name
    pub fn id(&self) -> &'static str {
        match self.strategy {
            Strategy::Holdout { .. } => "holdout",
            Strategy::CrossValidation { repeats: 1, .. } => "cv",
            Strategy::CrossValidation { .. } => "repeated_cv",
            Strategy::LeaveOneOut => "loo",
            Strategy::Bootstrap { .. } => "bootstrap",
            Strategy::Subsampling { .. } => "subsampling",
            Strategy::Custom { .. } => "custom",
        }
    }

    /// Number of splits this spec produces for `n` rows
    pub fn iters(&self, n: usize) -> usize {
        match &self.strategy {
            Strategy::Holdout { .. } => 1,
            Strategy::CrossValidation { folds, repeats } => folds * repeats,
            Strategy::LeaveOneOut => n,
            Strategy::Bootstrap { repeats, .. } | Strategy::Subsampling { repeats, .. } => *repeats,
            Strategy::Custom { train_sets, .. } => train_sets.len(),
        }
    }

    /// Check parameter domains and the minimum row count for `n` rows
    pub fn validate(&self, n: usize) -> Result<()> {
        match &self.strategy {
            Strategy::Holdout { ratio } => {
                check_open_ratio(*ratio)?;
                check_train_size(*ratio, n)?;
            }
            Strategy::Subsampling { repeats, ratio } => {
                check_repeats(*repeats)?;
                check_open_ratio(*ratio)?;
                check_train_size(*ratio, n)?;
            }
            Strategy::CrossValidation { folds, repeats } => {
                check_repeats(*repeats)?;
                if *folds < 2 {
                    return Err(Error::config(format!("folds must be >= 2, got {}", folds)));
                }
                if *folds > n {
                    return Err(Error::config(format!(
                        "{} folds need at least {} rows, got {}",
                        folds, folds, n
                    )));
                }
            }
            Strategy::LeaveOneOut => {
                if n < 2 {
                    return Err(Error::config(format!(
                        "leave-one-out needs at least 2 rows, got {}",
                        n
                    )));
                }
            }
            Strategy::Bootstrap { repeats, ratio } => {
                check_repeats(*repeats)?;
                if !(*ratio > 0.0 && *ratio <= 1.0) {
                    return Err(Error::config(format!(
                        "bootstrap ratio must lie in (0, 1], got {}",
                        ratio
                    )));
                }
                if n < 2 {
                    return Err(Error::config(format!(
                        "bootstrap needs at least 2 rows, got {}",
                        n
                    )));
                }
                if rounded_share(*ratio, n) == 0 {
                    return Err(Error::config(format!(
                        "bootstrap ratio {} draws no rows out of {}",
                        ratio, n
                    )));
                }
            }
            Strategy::Custom {
                train_sets,
                test_sets,
            } => {
                if train_sets.is_empty() || train_sets.len() != test_sets.len() {
                    return Err(Error::config(format!(
                        "custom resampling needs matching, non-empty train/test lists, got {} and {}",
                        train_sets.len(),
                        test_sets.len()
                    )));
                }
            }
        }
        if self.stratify && matches!(self.strategy, Strategy::LeaveOneOut | Strategy::Custom { .. }) {
            return Err(Error::config(format!(
                "stratification is not available for '{}'",
                self.id()
            )));
        }
        Ok(())
    }

    /// Materialize this spec for a task's active rows
    ///
    /// With stratification on, rows are grouped by target class and every
    /// group is spread over the splits in proportion.
    pub fn instantiate(&self, task: &Task) -> Result<Partitioning> {
        if self.stratify {
            if task.task_type() != TaskType::Classification {
                return Err(Error::config(format!(
                    "stratification needs a classification task, '{}' is {}",
                    task.id(),
                    task.task_type()
                )));
            }
            let strata = strata(task)?;
            let partitioning = generate_stratified(&strata, self)?;
            debug!(
                task = task.id(),
                spec = %self,
                strata = strata.len(),
                "instantiated stratified partitioning"
            );
            Ok(partitioning)
        } else {
            let partitioning = generate(task.row_ids(), self)?;
            debug!(
                task = task.id(),
                spec = %self,
                iters = partitioning.iters(),
                "instantiated partitioning"
            );
            Ok(partitioning)
        }
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            Strategy::Holdout { ratio } => write!(f, "holdout(ratio={})", ratio),
            Strategy::CrossValidation { folds, repeats: 1 } => write!(f, "cv(folds={})", folds),
            Strategy::CrossValidation { folds, repeats } => {
                write!(f, "repeated_cv(folds={}, repeats={})", folds, repeats)
            }
            Strategy::LeaveOneOut => write!(f, "loo"),
            Strategy::Bootstrap { repeats, ratio } => {
                write!(f, "bootstrap(repeats={}, ratio={})", repeats, ratio)
            }
            Strategy::Subsampling { repeats, ratio } => {
                write!(f, "subsampling(repeats={}, ratio={})", repeats, ratio)
            }
            Strategy::Custom { train_sets, .. } => write!(f, "custom(iters={})", train_sets.len()),
        }
    }
}

fn check_open_ratio(ratio: f64) -> Result<()> {
    if ratio > 0.0 && ratio < 1.0 {
        Ok(())
    } else {
        Err(Error::config(format!("ratio must lie in (0, 1), got {}", ratio)))
    }
}

fn check_repeats(repeats: usize) -> Result<()> {
    if repeats >= 1 {
        Ok(())
    } else {
        Err(Error::config("repeats must be >= 1"))
    }
}

fn check_train_size(ratio: f64, n: usize) -> Result<()> {
    let n_train = rounded_share(ratio, n);
    if n_train == 0 || n_train >= n {
        return Err(Error::config(format!(
            "ratio {} leaves an empty train or test set for {} rows",
            ratio, n
        )));
    }
    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn rounded_share(ratio: f64, n: usize) -> usize {
    (ratio * n as f64).round() as usize
}

/// One train/test pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Train rows; bootstrap samples may repeat ids
    pub train: Vec<RowId>,

    /// Test rows
    pub test: Vec<RowId>,
}

/// A materialized resampling: an ordered sequence of splits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partitioning {
    spec: PartitionSpec,
    splits: Vec<Split>,
}

impl Partitioning {
    /// Spec this partitioning was generated from
    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    /// Short strategy name
    pub fn id(&self) -> &'static str {
        self.spec.id()
    }

    /// Number of splits
    pub fn iters(&self) -> usize {
        self.splits.len()
    }

    /// All splits in order
    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    /// Train rows of split `i`, 1-based
    pub fn train_set(&self, i: usize) -> Result<&[RowId]> {
        Ok(&self.split(i)?.train)
    }

    /// Test rows of split `i`, 1-based
    pub fn test_set(&self, i: usize) -> Result<&[RowId]> {
        Ok(&self.split(i)?.test)
    }

    fn split(&self, i: usize) -> Result<&Split> {
        if i == 0 || i > self.splits.len() {
            return Err(Error::IndexOutOfBounds {
                index: i,
                len: self.splits.len(),
            });
        }
        Ok(&self.splits[i - 1])
    }

    /// Check that every referenced row is an active row of `task`
    ///
    /// Custom splits only need to exist in the backend.
    pub fn check_bound_to(&self, task: &Task) -> Result<()> {
        if let Strategy::Custom { .. } = self.spec.strategy {
            let backend = task.backend();
            for split in &self.splits {
                if let Some(id) = split
                    .train
                    .iter()
                    .chain(&split.test)
                    .find(|id| !backend.contains_row(id))
                {
                    return Err(Error::config(format!(
                        "custom split references unknown row {} of task '{}'",
                        id,
                        task.id()
                    )));
                }
            }
            return Ok(());
        }

        let active: HashSet<&RowId> = task.row_ids().iter().collect();
        for split in &self.splits {
            if let Some(id) = split.train.iter().chain(&split.test).find(|id| !active.contains(id)) {
                return Err(Error::config(format!(
                    "partitioning '{}' references row {} which is not an active row of task '{}'",
                    self.id(),
                    id,
                    task.id()
                )));
            }
        }
        Ok(())
    }

    /// Encode for reuse across runs
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::Serialization)
    }

    /// Decode a partitioning produced by [`Partitioning::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let partitioning: Self = bincode::deserialize(data).map_err(Error::Serialization)?;
        for split in &partitioning.splits {
            check_disjoint(split)?;
        }
        Ok(partitioning)
    }

    /// Write the encoded partitioning to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Read a partitioning written by [`Partitioning::save`]
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// A resampling that is either a bare spec or already materialized
///
/// Instantiation only goes one way; re-instantiating replaces the splits.
#[derive(Debug, Clone)]
pub enum Resampling {
    /// Not yet bound to any rows
    Uninstantiated(PartitionSpec),

    /// Bound to a row-id set and shareable between design rows
    Instantiated(Arc<Partitioning>),
}

impl Resampling {
    /// Spec of this resampling
    pub fn spec(&self) -> &PartitionSpec {
        match self {
            Resampling::Uninstantiated(spec) => spec,
            Resampling::Instantiated(p) => p.spec(),
        }
    }

    /// Short strategy name
    pub fn id(&self) -> &'static str {
        self.spec().id()
    }

    /// Whether splits are materialized
    pub fn is_instantiated(&self) -> bool {
        matches!(self, Resampling::Instantiated(_))
    }

    /// Materialized splits for `task`
    ///
    /// An instantiated resampling is checked against the task and shared;
    /// a spec is generated fresh.
    pub fn partitioning_for(&self, task: &Task) -> Result<Arc<Partitioning>> {
        let partitioning = match self {
            Resampling::Instantiated(p) => p.clone(),
            Resampling::Uninstantiated(spec) => Arc::new(spec.instantiate(task)?),
        };
        partitioning.check_bound_to(task)?;
        Ok(partitioning)
    }

    /// Replace this resampling with one instantiated on `task`
    pub fn instantiate(self, task: &Task) -> Result<Resampling> {
        let spec = self.spec().clone();
        Ok(Resampling::Instantiated(Arc::new(spec.instantiate(task)?)))
    }
}

impl From<PartitionSpec> for Resampling {
    fn from(spec: PartitionSpec) -> Self {
        Resampling::Uninstantiated(spec)
    }
}

impl From<Partitioning> for Resampling {
    fn from(partitioning: Partitioning) -> Self {
        Resampling::Instantiated(Arc::new(partitioning))
    }
}

/// Generate a partitioning over `row_ids`
pub fn generate(row_ids: &[RowId], spec: &PartitionSpec) -> Result<Partitioning> {
    generate_stratified(&[row_ids.to_vec()], spec)
}

/// Generate a partitioning where each stratum is split proportionally
///
/// Output row order inside every set follows the input order (strata in
/// order, rows in order within a stratum), never the shuffle order.
pub fn generate_stratified(strata: &[Vec<RowId>], spec: &PartitionSpec) -> Result<Partitioning> {
    let rows: Vec<RowId> = strata.iter().flatten().cloned().collect();
    let n = rows.len();
    spec.validate(n)?;
    check_unique(&rows)?;

    let mut rng = ChaCha8Rng::seed_from_u64(spec.seed.unwrap_or(DEFAULT_SEED));

    // positions into `rows`, grouped by stratum
    let mut offset = 0;
    let groups: Vec<Vec<usize>> = strata
        .iter()
        .map(|s| {
            let g = (offset..offset + s.len()).collect();
            offset += s.len();
            g
        })
        .collect();

    let index_splits: Vec<(Vec<usize>, Vec<usize>)> = match &spec.strategy {
        Strategy::Holdout { ratio } => vec![holdout(&groups, *ratio, &mut rng)],
        Strategy::Subsampling { repeats, ratio } => (0..*repeats)
            .map(|_| holdout(&groups, *ratio, &mut rng))
            .collect(),
        Strategy::CrossValidation { folds, repeats } => (0..*repeats)
            .flat_map(|_| cross_validation(&groups, *folds, n, &mut rng))
            .collect(),
        Strategy::LeaveOneOut => (0..n)
            .map(|i| ((0..n).filter(|&j| j != i).collect(), vec![i]))
            .collect(),
        Strategy::Bootstrap { repeats, ratio } => {
            if let Some(small) = groups
                .iter()
                .find(|g| !g.is_empty() && rounded_share(*ratio, g.len()) == 0)
            {
                return Err(Error::config(format!(
                    "bootstrap ratio {} draws no rows from a stratum of {}",
                    ratio,
                    small.len()
                )));
            }
            (0..*repeats)
                .map(|_| bootstrap(&groups, *ratio, n, &mut rng))
                .collect()
        }
        Strategy::Custom {
            train_sets,
            test_sets,
        } => {
            let splits = train_sets
                .iter()
                .zip(test_sets)
                .map(|(train, test)| {
                    let split = Split {
                        train: train.clone(),
                        test: test.clone(),
                    };
                    check_disjoint(&split).map(|()| split)
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Partitioning {
                spec: spec.clone(),
                splits,
            });
        }
    };

    if let Some(i) = index_splits
        .iter()
        .position(|(train, test)| train.is_empty() || test.is_empty())
    {
        let (train, test) = &index_splits[i];
        return Err(Error::config(format!(
            "{} split {} of {} rows has {} train and {} test rows; both sides must be non-empty",
            spec.id(),
            i + 1,
            n,
            train.len(),
            test.len()
        )));
    }

    let splits = index_splits
        .into_iter()
        .map(|(train, test)| Split {
            train: train.into_iter().map(|i| rows[i].clone()).collect(),
            test: test.into_iter().map(|i| rows[i].clone()).collect(),
        })
        .collect();

    Ok(Partitioning {
        spec: spec.clone(),
        splits,
    })
}

/// Train rows per stratum, summing to exactly `round(ratio * n)`
///
/// Every stratum gets the floor of its exact share; leftover rows go to
/// the strata with the largest remainders, earlier strata first on ties.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn stratum_shares(groups: &[Vec<usize>], ratio: f64) -> Vec<usize> {
    let n: usize = groups.iter().map(Vec::len).sum();
    let exact: Vec<f64> = groups.iter().map(|g| ratio * g.len() as f64).collect();
    let mut shares: Vec<usize> = exact
        .iter()
        .zip(groups)
        .map(|(e, g)| (e.floor() as usize).min(g.len()))
        .collect();

    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (exact[a] - exact[a].floor(), exact[b] - exact[b].floor());
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    let mut left = rounded_share(ratio, n).saturating_sub(shares.iter().sum());
    for i in order {
        if left == 0 {
            break;
        }
        if shares[i] < groups[i].len() {
            shares[i] += 1;
            left -= 1;
        }
    }
    shares
}

fn holdout(groups: &[Vec<usize>], ratio: f64, rng: &mut ChaCha8Rng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (group, n_train) in groups.iter().zip(stratum_shares(groups, ratio)) {
        let mut shuffled = group.clone();
        shuffled.shuffle(rng);
        train.extend_from_slice(&shuffled[..n_train]);
        test.extend_from_slice(&shuffled[n_train..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn cross_validation(
    groups: &[Vec<usize>],
    folds: usize,
    n: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<(Vec<usize>, Vec<usize>)> {
    // strata are laid out back to back and dealt round-robin, so every fold
    // gets its share of each stratum and fold sizes differ by at most one
    let mut fold_of = vec![0; n];
    let mut position = 0;
    for group in groups {
        let mut shuffled = group.clone();
        shuffled.shuffle(rng);
        for i in shuffled {
            fold_of[i] = position % folds;
            position += 1;
        }
    }

    (0..folds)
        .map(|k| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| fold_of[i] == k);
            (train, test)
        })
        .collect()
}

fn bootstrap(
    groups: &[Vec<usize>],
    ratio: f64,
    n: usize,
    rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<usize>) {
    let mut drawn = vec![false; n];
    let mut train = Vec::new();
    for group in groups {
        if group.is_empty() {
            continue;
        }
        for _ in 0..rounded_share(ratio, group.len()) {
            let i = group[rng.gen_range(0..group.len())];
            drawn[i] = true;
            train.push(i);
        }
    }
    train.sort_unstable();
    let test = (0..n).filter(|&i| !drawn[i]).collect();
    (train, test)
}

fn check_unique(rows: &[RowId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    match rows.iter().find(|id| !seen.insert(*id)) {
        Some(id) => Err(Error::config(format!("duplicate row id {}", id))),
        None => Ok(()),
    }
}

fn check_disjoint(split: &Split) -> Result<()> {
    let train: HashSet<&RowId> = split.train.iter().collect();
    match split.test.iter().find(|id| train.contains(id)) {
        Some(id) => Err(Error::config(format!(
            "row {} appears in both train and test set",
            id
        ))),
        None => Ok(()),
    }
}

/// Active rows of a classification task grouped by target class
///
/// Groups appear in order of the first row of each class.
pub fn strata(task: &Task) -> Result<Vec<Vec<RowId>>> {
    let truth = task.truth(task.row_ids())?;
    let mut labels: Vec<String> = Vec::new();
    let mut groups: Vec<Vec<RowId>> = Vec::new();
    for (id, value) in task.row_ids().iter().zip(truth) {
        let label = value.as_label().ok_or_else(|| {
            Error::config(format!("row {} has no class label to stratify on", id))
        })?;
        match labels.iter().position(|l| *l == label) {
            Some(i) => groups[i].push(id.clone()),
            None => {
                labels.push(label);
                groups.push(vec![id.clone()]);
            }
        }
    }
    Ok(groups)
}
