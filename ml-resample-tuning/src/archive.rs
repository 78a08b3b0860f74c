//! Record of every evaluated configuration

use ml_resample_core::{Direction, ParamValues};
use serde::{Deserialize, Serialize};

/// One evaluated configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// 1-based batch the configuration was evaluated in
    pub batch: usize,

    /// The configuration
    pub params: ParamValues,

    /// Aggregated score over the inner resampling; `NaN` if unscored
    pub score: f64,

    /// Inner iterations run
    pub iters: usize,

    /// Inner iterations that recorded an error
    pub errors: usize,
}

/// Evaluated configurations in evaluation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    measure: String,
    direction: Direction,
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Empty archive for scores of `measure`
    pub fn new(measure: &str, direction: Direction) -> Self {
        Self {
            measure: measure.to_string(),
            direction,
            entries: Vec::new(),
        }
    }

    /// Id of the measure the scores belong to
    pub fn measure(&self) -> &str {
        &self.measure
    }

    /// Optimization direction of the scores
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Append an evaluated configuration
    pub fn push(&mut self, entry: ArchiveEntry) {
        self.entries.push(entry);
    }

    /// All entries in evaluation order
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Number of evaluated configurations
    pub fn n_evals(&self) -> usize {
        self.entries.len()
    }

    /// Number of batches evaluated so far
    pub fn n_batches(&self) -> usize {
        self.entries.last().map_or(0, |e| e.batch)
    }

    /// Inner iterations run across all configurations
    pub fn inner_iterations(&self) -> usize {
        self.entries.iter().map(|e| e.iters).sum()
    }

    /// Best scored entry; ties go to the one evaluated first
    pub fn best(&self) -> Option<&ArchiveEntry> {
        let mut best: Option<&ArchiveEntry> = None;
        for entry in &self.entries {
            if entry.score.is_nan() {
                continue;
            }
            match best {
                Some(b) if !self.direction.improves(entry.score, b.score) => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    /// Serialize the archive as JSON; `NaN` scores become `null`
    pub fn to_json(&self) -> ml_resample_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_resample_core::ParamValue;

    fn entry(k: i64, score: f64) -> ArchiveEntry {
        ArchiveEntry {
            batch: 1,
            params: ParamValues::new().with("k", ParamValue::Int(k)),
            score,
            iters: 3,
            errors: 0,
        }
    }

    #[test]
    fn test_best_minimizes_with_first_found_tie_break() {
        let mut archive = Archive::new("classif.ce", Direction::Minimize);
        archive.push(entry(1, 0.3));
        archive.push(entry(3, 0.1));
        archive.push(entry(5, 0.1));
        archive.push(entry(7, f64::NAN));
        let best = archive.best().unwrap();
        assert_eq!(best.params.get("k"), Some(&ParamValue::Int(3)));
        assert_eq!(archive.inner_iterations(), 12);
    }

    #[test]
    fn test_best_maximizes() {
        let mut archive = Archive::new("classif.acc", Direction::Maximize);
        archive.push(entry(1, 0.6));
        archive.push(entry(3, 0.9));
        assert_eq!(archive.best().unwrap().score, 0.9);
    }

    #[test]
    fn test_all_unscored_has_no_best() {
        let mut archive = Archive::new("classif.ce", Direction::Minimize);
        archive.push(entry(1, f64::NAN));
        assert!(archive.best().is_none());
        assert!(archive.to_json().unwrap().contains("null"));
    }
}
