//! Stopping rules for tuning

use std::time::{Duration, Instant};

use ml_resample_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::archive::Archive;

/// When to stop proposing candidates
///
/// Checked between batches; a batch that already started always finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Never stop; only valid with an optimizer whose proposals run out
    None,

    /// Stop after this many evaluated configurations
    Evals(usize),

    /// Stop once this much time has passed since tuning started
    RunTime(Duration),

    /// Stop once the best score reaches this target
    PerfReached(f64),

    /// Stop as soon as any of the rules does
    Any(Vec<Terminator>),
}

impl Terminator {
    /// Whether this rule is guaranteed to trigger eventually
    pub fn is_bounding(&self) -> bool {
        match self {
            Terminator::Evals(_) | Terminator::RunTime(_) => true,
            Terminator::None | Terminator::PerfReached(_) => false,
            Terminator::Any(rules) => rules.iter().any(Terminator::is_bounding),
        }
    }

    /// Reject rules that stop before anything could be evaluated
    pub fn validate(&self) -> Result<()> {
        match self {
            Terminator::Evals(0) => {
                Err(Error::config("an evaluation budget of 0 allows no candidate"))
            }
            Terminator::Any(rules) => rules.iter().try_for_each(Terminator::validate),
            _ => Ok(()),
        }
    }

    /// Whether tuning should stop now
    pub fn is_terminated(&self, archive: &Archive, started: Instant) -> bool {
        match self {
            Terminator::None => false,
            Terminator::Evals(n) => archive.n_evals() >= *n,
            Terminator::RunTime(budget) => started.elapsed() >= *budget,
            Terminator::PerfReached(target) => archive
                .best()
                .is_some_and(|b| archive.direction().reaches(b.score, *target)),
            Terminator::Any(rules) => rules.iter().any(|r| r.is_terminated(archive, started)),
        }
    }

    /// Evaluations still allowed by the tightest evaluation budget
    pub fn remaining_evals(&self, evaluated: usize) -> Option<usize> {
        match self {
            Terminator::Evals(n) => Some(n.saturating_sub(evaluated)),
            Terminator::Any(rules) => rules
                .iter()
                .filter_map(|r| r.remaining_evals(evaluated))
                .min(),
            _ => None,
        }
    }
}
