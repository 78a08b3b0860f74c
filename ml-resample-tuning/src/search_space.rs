//! Hyperparameter ranges explored by the optimizers

use std::collections::BTreeSet;

use ml_resample_core::{Error, ParamDef, ParamKind, ParamSet, ParamValue, ParamValues, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Ranges of the hyperparameters being tuned
///
/// Each range must lie inside the domain the learner declares for that
/// parameter; [`SearchSpace::validate`] checks this before tuning starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    params: Vec<ParamDef>,
    log_scale: BTreeSet<String>,
}

impl SearchSpace {
    /// Empty search space
    pub fn new() -> Self {
        Self::default()
    }

    /// Integer range `[lower, upper]`
    #[must_use]
    pub fn int(mut self, id: &str, lower: i64, upper: i64) -> Self {
        self.params.push(ParamDef::int(id, lower, upper));
        self
    }

    /// Float range `[lower, upper]`
    #[must_use]
    pub fn float(mut self, id: &str, lower: f64, upper: f64) -> Self {
        self.params.push(ParamDef::float(id, lower, upper));
        self
    }

    /// Float range explored on a log scale; `lower` must be positive
    #[must_use]
    pub fn log_float(mut self, id: &str, lower: f64, upper: f64) -> Self {
        self.log_scale.insert(id.to_string());
        self.float(id, lower, upper)
    }

    /// Boolean flag
    #[must_use]
    pub fn bool(mut self, id: &str) -> Self {
        self.params.push(ParamDef::bool(id));
        self
    }

    /// Subset of categorical levels
    #[must_use]
    pub fn categorical(mut self, id: &str, levels: &[&str]) -> Self {
        self.params.push(ParamDef::categorical(id, levels));
        self
    }

    /// Ranges in declaration order
    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    /// Number of tuned parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether nothing is tuned
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Whether every range has finitely many values
    pub fn is_finite(&self) -> bool {
        !self
            .params
            .iter()
            .any(|p| matches!(p.kind, ParamKind::Float { .. }))
    }

    /// Check the ranges against the learner's declared parameters
    pub fn validate(&self, base: &ParamSet) -> Result<()> {
        if self.params.is_empty() {
            return Err(Error::config("search space is empty"));
        }
        let mut seen = BTreeSet::new();
        for range in &self.params {
            if !seen.insert(range.id.as_str()) {
                return Err(Error::config(format!(
                    "parameter '{}' appears twice in the search space",
                    range.id
                )));
            }
            let declared = base.get(&range.id).ok_or_else(|| {
                Error::config(format!("learner has no parameter '{}'", range.id))
            })?;
            check_range(range, declared, self.log_scale.contains(&range.id))?;
        }
        Ok(())
    }

    /// Cartesian grid with `resolution` points per numeric range
    ///
    /// Booleans and categoricals contribute all their values. The first
    /// parameter varies slowest.
    pub fn grid(&self, resolution: usize) -> Result<Vec<ParamValues>> {
        if resolution == 0 {
            return Err(Error::config("grid resolution must be at least 1"));
        }
        let mut grid = vec![ParamValues::new()];
        for range in &self.params {
            let axis = axis(range, self.log_scale.contains(&range.id), resolution);
            grid = grid
                .iter()
                .flat_map(|point| axis.iter().map(|v| point.clone().with(&range.id, v.clone())))
                .collect();
        }
        Ok(grid)
    }

    /// Draw one configuration uniformly from the ranges
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValues {
        self.params
            .iter()
            .map(|range| {
                let value = match &range.kind {
                    ParamKind::Int { lower, upper } => {
                        ParamValue::Int(rng.gen_range(*lower..=*upper))
                    }
                    ParamKind::Float { lower, upper } if self.log_scale.contains(&range.id) => {
                        ParamValue::Float(rng.gen_range(lower.ln()..=upper.ln()).exp())
                    }
                    ParamKind::Float { lower, upper } => {
                        ParamValue::Float(rng.gen_range(*lower..=*upper))
                    }
                    ParamKind::Bool => ParamValue::Bool(rng.gen_bool(0.5)),
                    ParamKind::Categorical(levels) => {
                        ParamValue::Str(levels[rng.gen_range(0..levels.len())].clone())
                    }
                };
                (range.id.clone(), value)
            })
            .collect()
    }
}

fn check_range(range: &ParamDef, declared: &ParamDef, log: bool) -> Result<()> {
    let inside = match (&range.kind, &declared.kind) {
        (ParamKind::Int { lower, upper }, ParamKind::Int { lower: lo, upper: hi }) => {
            lower <= upper && lo <= lower && upper <= hi
        }
        (ParamKind::Float { lower, upper }, ParamKind::Float { lower: lo, upper: hi }) => {
            lower <= upper && lo <= lower && upper <= hi && (!log || *lower > 0.0)
        }
        (ParamKind::Bool, ParamKind::Bool) => true,
        (ParamKind::Categorical(levels), ParamKind::Categorical(declared_levels)) => {
            !levels.is_empty() && levels.iter().all(|l| declared_levels.contains(l))
        }
        _ => false,
    };
    if inside {
        Ok(())
    } else {
        Err(Error::config(format!(
            "range {:?} for '{}' is not inside the declared domain {:?}",
            range.kind, range.id, declared.kind
        )))
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
fn axis(range: &ParamDef, log: bool, resolution: usize) -> Vec<ParamValue> {
    let steps = (resolution.max(2) - 1) as f64;
    match &range.kind {
        ParamKind::Int { lower, upper } => {
            if resolution == 1 {
                return vec![ParamValue::Int(*lower)];
            }
            let span = (upper - lower) as f64;
            let mut values: Vec<i64> = (0..resolution)
                .map(|i| lower + (span * i as f64 / steps).round() as i64)
                .collect();
            values.dedup();
            values.into_iter().map(ParamValue::Int).collect()
        }
        ParamKind::Float { lower, upper } => {
            if resolution == 1 {
                return vec![ParamValue::Float(*lower)];
            }
            let (lo, hi) = if log {
                (lower.ln(), upper.ln())
            } else {
                (*lower, *upper)
            };
            (0..resolution)
                .map(|i| {
                    let x = lo + (hi - lo) * i as f64 / steps;
                    ParamValue::Float(if log { x.exp() } else { x })
                })
                .collect()
        }
        ParamKind::Bool => vec![ParamValue::Bool(false), ParamValue::Bool(true)],
        ParamKind::Categorical(levels) => levels.iter().cloned().map(ParamValue::Str).collect(),
    }
}
