//! Strategies that propose hyperparameter configurations

use std::fmt;

use ml_resample_core::{Error, ParamValues, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::search_space::SearchSpace;

/// Stream of proposed configurations, in evaluation order
pub type Proposals = Box<dyn Iterator<Item = ParamValues> + Send>;

/// Proposes candidate configurations in batches
pub trait Optimizer: Send + Sync + fmt::Debug {
    /// Optimizer id
    fn id(&self) -> &str;

    /// Number of candidates evaluated together
    fn batch_size(&self) -> usize;

    /// Whether the proposal stream ends on its own
    fn is_bounded(&self) -> bool;

    /// Start a fresh proposal stream over `space`
    fn propose(&self, space: &SearchSpace) -> Result<Proposals>;
}

fn check_batch_size(batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(Error::config("batch size must be at least 1"));
    }
    Ok(batch_size)
}

/// Exhaustive grid in deterministic order
#[derive(Debug, Clone)]
pub struct GridSearch {
    resolution: usize,
    batch_size: usize,
}

impl GridSearch {
    /// Grid with `resolution` points per numeric range, one batch for the
    /// whole grid
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            batch_size: usize::MAX,
        }
    }

    /// Evaluate `batch_size` grid points per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        self.batch_size = check_batch_size(batch_size)?;
        Ok(self)
    }
}

impl Optimizer for GridSearch {
    fn id(&self) -> &str {
        "grid_search"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_bounded(&self) -> bool {
        true
    }

    fn propose(&self, space: &SearchSpace) -> Result<Proposals> {
        Ok(Box::new(space.grid(self.resolution)?.into_iter()))
    }
}

/// Uniform random draws from a seeded stream; never ends on its own
#[derive(Debug, Clone)]
pub struct RandomSearch {
    seed: u64,
    batch_size: usize,
}

impl RandomSearch {
    /// Random search seeded with `seed`, one candidate per batch
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            batch_size: 1,
        }
    }

    /// Evaluate `batch_size` draws per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        self.batch_size = check_batch_size(batch_size)?;
        Ok(self)
    }
}

impl Optimizer for RandomSearch {
    fn id(&self) -> &str {
        "random_search"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_bounded(&self) -> bool {
        false
    }

    fn propose(&self, space: &SearchSpace) -> Result<Proposals> {
        let space = space.clone();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(Box::new(std::iter::from_fn(move || Some(space.sample(&mut rng)))))
    }
}

/// Caller-supplied configurations evaluated in the given order
#[derive(Debug, Clone)]
pub struct DesignPoints {
    points: Vec<ParamValues>,
    batch_size: usize,
}

impl DesignPoints {
    /// Evaluate `points` one at a time
    pub fn new(points: Vec<ParamValues>) -> Self {
        Self {
            points,
            batch_size: 1,
        }
    }

    /// Evaluate `batch_size` points per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        self.batch_size = check_batch_size(batch_size)?;
        Ok(self)
    }
}

impl Optimizer for DesignPoints {
    fn id(&self) -> &str {
        "design_points"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_bounded(&self) -> bool {
        true
    }

    fn propose(&self, space: &SearchSpace) -> Result<Proposals> {
        // every point must set exactly the tuned parameters, inside their ranges
        let ranges = ml_resample_core::ParamSet::new(space.params().to_vec());
        for point in &self.points {
            ranges.validate(point)?;
            if point.len() != space.len() {
                return Err(Error::config(format!(
                    "design point {} does not set every tuned parameter",
                    point
                )));
            }
        }
        Ok(Box::new(self.points.clone().into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_resample_core::ParamValue;

    fn space() -> SearchSpace {
        SearchSpace::new().int("k", 1, 9).bool("scale")
    }

    #[test]
    fn test_grid_search_proposes_whole_grid() {
        let proposals: Vec<ParamValues> = GridSearch::new(3).propose(&space()).unwrap().collect();
        assert_eq!(proposals.len(), 6);
        assert!(GridSearch::new(3).is_bounded());
    }

    #[test]
    fn test_random_search_is_reproducible() {
        let draw = |seed| -> Vec<ParamValues> {
            RandomSearch::new(seed)
                .propose(&space())
                .unwrap()
                .take(5)
                .collect()
        };
        let (a, b, c) = (draw(42), draw(42), draw(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!RandomSearch::new(42).is_bounded());
    }

    #[test]
    fn test_design_points_keep_order_and_are_checked() {
        let p = |k| {
            ParamValues::new()
                .with("k", ParamValue::Int(k))
                .with("scale", ParamValue::Bool(true))
        };
        let ks: Vec<i64> = DesignPoints::new(vec![p(5), p(2), p(8)])
            .propose(&space())
            .unwrap()
            .map(|v| v.get("k").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(ks, [5, 2, 8]);

        assert!(DesignPoints::new(vec![p(20)]).propose(&space()).is_err());
        let partial = ParamValues::new().with("k", ParamValue::Int(3));
        assert!(DesignPoints::new(vec![partial]).propose(&space()).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(RandomSearch::new(1).with_batch_size(0).unwrap_err().is_configuration());
    }
}
