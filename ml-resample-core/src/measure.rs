//! Measure adapter trait and reference measures

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::prediction::{PredictType, Prediction};
use crate::task::TaskType;

/// Whether lower or higher scores are better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Lower is better
    Minimize,

    /// Higher is better
    Maximize,
}

impl Direction {
    /// Whether `candidate` strictly improves on `incumbent`
    ///
    /// `NaN` never improves on anything, and anything finite improves on
    /// `NaN`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        if candidate.is_nan() {
            return false;
        }
        if incumbent.is_nan() {
            return true;
        }
        match self {
            Direction::Minimize => candidate < incumbent,
            Direction::Maximize => candidate > incumbent,
        }
    }

    /// Whether `score` reaches `target`
    pub fn reaches(self, score: f64, target: f64) -> bool {
        match self {
            Direction::Minimize => score <= target,
            Direction::Maximize => score >= target,
        }
    }
}

/// How iteration scores are combined into one number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Average {
    /// Arithmetic mean of per-iteration scores
    Macro,

    /// Score of all iteration predictions pooled together
    Micro,
}

/// A scoring function over predictions
pub trait Measure: Send + Sync {
    /// Measure id, e.g. `classif.ce`
    fn id(&self) -> &str;

    /// Task type this measure scores
    fn task_type(&self) -> TaskType;

    /// Optimization direction
    fn direction(&self) -> Direction;

    /// Predict type the measure reads
    fn predict_type(&self) -> PredictType {
        PredictType::Response
    }

    /// Aggregation across resampling iterations
    fn average(&self) -> Average {
        Average::Macro
    }

    /// Score a prediction against its ground truth
    fn score(&self, prediction: &Prediction) -> Result<f64>;
}

impl fmt::Debug for dyn Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measure({})", self.id())
    }
}

/// Arithmetic mean of the non-`NaN` scores; `NaN` if none remain
///
/// Iterations without a score are excluded, never counted as zero.
#[allow(clippy::cast_precision_loss)]
pub fn mean_of_scored(scores: &[f64]) -> f64 {
    let scored: Vec<f64> = scores.iter().copied().filter(|s| !s.is_nan()).collect();
    if scored.is_empty() {
        return f64::NAN;
    }
    scored.iter().sum::<f64>() / scored.len() as f64
}

fn check_prediction(measure: &dyn Measure, prediction: &Prediction) -> Result<()> {
    if prediction.task_type() != measure.task_type() {
        return Err(Error::Measure(format!(
            "measure '{}' scores {} predictions, got {}",
            measure.id(),
            measure.task_type(),
            prediction.task_type()
        )));
    }
    if measure.predict_type() == PredictType::Prob && prediction.prob().is_none() {
        return Err(Error::Measure(format!(
            "measure '{}' requires probability predictions",
            measure.id()
        )));
    }
    Ok(())
}

fn label_pairs(measure: &dyn Measure, prediction: &Prediction) -> Result<Vec<(String, String)>> {
    check_prediction(measure, prediction)?;
    prediction
        .truth()
        .iter()
        .zip(prediction.response())
        .map(|(t, r)| match (t.as_label(), r.as_label()) {
            (Some(t), Some(r)) => Ok((t, r)),
            _ => Err(Error::Measure(format!(
                "measure '{}' got a non-label value",
                measure.id()
            ))),
        })
        .collect()
}

fn numeric_pairs(measure: &dyn Measure, prediction: &Prediction) -> Result<Vec<(f64, f64)>> {
    check_prediction(measure, prediction)?;
    prediction
        .truth()
        .iter()
        .zip(prediction.response())
        .map(|(t, r)| match (t.as_f64(), r.as_f64()) {
            (Some(t), Some(r)) => Ok((t, r)),
            _ => Err(Error::Measure(format!(
                "measure '{}' got a non-numeric value",
                measure.id()
            ))),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Classification error: share of misclassified rows
#[derive(Debug, Clone, Default)]
pub struct ClassifError;

impl Measure for ClassifError {
    fn id(&self) -> &str {
        "classif.ce"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Classification
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        let pairs = label_pairs(self, prediction)?;
        Ok(mean(pairs.iter().map(|(t, r)| if t == r { 0.0 } else { 1.0 })))
    }
}

/// Accuracy: share of correctly classified rows
#[derive(Debug, Clone, Default)]
pub struct Accuracy;

impl Measure for Accuracy {
    fn id(&self) -> &str {
        "classif.acc"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Classification
    }

    fn direction(&self) -> Direction {
        Direction::Maximize
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        let pairs = label_pairs(self, prediction)?;
        Ok(mean(pairs.iter().map(|(t, r)| if t == r { 1.0 } else { 0.0 })))
    }
}

/// Log loss of the probability assigned to the true class
#[derive(Debug, Clone)]
pub struct LogLoss {
    eps: f64,
}

impl Default for LogLoss {
    fn default() -> Self {
        Self { eps: 1e-15 }
    }
}

impl Measure for LogLoss {
    fn id(&self) -> &str {
        "classif.logloss"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Classification
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn predict_type(&self) -> PredictType {
        PredictType::Prob
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        check_prediction(self, prediction)?;
        let prob = prediction
            .prob()
            .ok_or_else(|| Error::Measure("missing probabilities".into()))?;
        let losses = prediction
            .truth()
            .iter()
            .zip(prob.rows())
            .map(|(t, row)| {
                let label = t
                    .as_label()
                    .ok_or_else(|| Error::Measure("non-label truth value".into()))?;
                let index = prob
                    .classes()
                    .iter()
                    .position(|c| *c == label)
                    .ok_or_else(|| Error::Measure(format!("class '{}' has no probability", label)))?;
                Ok(-row[index].clamp(self.eps, 1.0 - self.eps).ln())
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(mean(losses.into_iter()))
    }
}

/// Mean squared error
#[derive(Debug, Clone, Default)]
pub struct Mse;

impl Measure for Mse {
    fn id(&self) -> &str {
        "regr.mse"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Regression
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        let pairs = numeric_pairs(self, prediction)?;
        Ok(mean(pairs.iter().map(|(t, r)| (t - r).powi(2))))
    }
}

/// Root mean squared error
#[derive(Debug, Clone, Default)]
pub struct Rmse;

impl Measure for Rmse {
    fn id(&self) -> &str {
        "regr.rmse"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Regression
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        let pairs = numeric_pairs(self, prediction)?;
        Ok(mean(pairs.iter().map(|(t, r)| (t - r).powi(2))).sqrt())
    }
}

/// Mean absolute error
#[derive(Debug, Clone, Default)]
pub struct Mae;

impl Measure for Mae {
    fn id(&self) -> &str {
        "regr.mae"
    }

    fn task_type(&self) -> TaskType {
        TaskType::Regression
    }

    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn score(&self, prediction: &Prediction) -> Result<f64> {
        let pairs = numeric_pairs(self, prediction)?;
        Ok(mean(pairs.iter().map(|(t, r)| (t - r).abs())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::ProbMatrix;
    use crate::value::{RowId, Value};
    use test_case::test_case;

    fn labels() -> Prediction {
        Prediction::classification(
            vec![RowId::Int(1), RowId::Int(2), RowId::Int(3), RowId::Int(4)],
            vec!["a".into(), "a".into(), "b".into(), "b".into()],
            vec!["a".into(), "b".into(), "b".into(), "b".into()],
            Some(
                ProbMatrix::new(
                    vec!["a".into(), "b".into()],
                    vec![vec![0.8, 0.2], vec![0.4, 0.6], vec![0.1, 0.9], vec![0.5, 0.5]],
                )
                .unwrap(),
            ),
        )
        .unwrap()
    }

    fn numbers() -> Prediction {
        Prediction::regression(
            vec![RowId::Int(1), RowId::Int(2)],
            vec![Value::Float(1.0), Value::Float(3.0)],
            &[2.0, 1.0],
        )
        .unwrap()
    }

    #[test_case(&ClassifError, 0.25 ; "ce")]
    #[test_case(&Accuracy, 0.75 ; "acc")]
    fn test_label_measures(measure: &dyn Measure, expected: f64) {
        let score = measure.score(&labels()).unwrap();
        assert!((score - expected).abs() < 1e-12);
    }

    #[test_case(&Mse, 2.5 ; "mse")]
    #[test_case(&Mae, 1.5 ; "mae")]
    #[test_case(&Rmse, 2.5f64.sqrt() ; "rmse")]
    fn test_numeric_measures(measure: &dyn Measure, expected: f64) {
        let score = measure.score(&numbers()).unwrap();
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_logloss_reads_true_class_probability() {
        let expected = -(0.8f64.ln() + 0.4f64.ln() + 0.9f64.ln() + 0.5f64.ln()) / 4.0;
        let score = LogLoss::default().score(&labels()).unwrap();
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_type_mismatch_is_a_measure_error() {
        assert!(matches!(Mse.score(&labels()), Err(Error::Measure(_))));
        assert!(matches!(ClassifError.score(&numbers()), Err(Error::Measure(_))));
    }

    #[test]
    fn test_direction_improves_handles_nan() {
        assert!(Direction::Minimize.improves(0.1, 0.2));
        assert!(!Direction::Minimize.improves(0.2, 0.2));
        assert!(Direction::Maximize.improves(0.3, f64::NAN));
        assert!(!Direction::Maximize.improves(f64::NAN, 0.3));
    }

    #[test]
    fn test_mean_of_scored_excludes_missing() {
        assert!((mean_of_scored(&[0.1, 0.2, 0.3]) - 0.2).abs() < 1e-12);
        assert!((mean_of_scored(&[0.1, f64::NAN, 0.3]) - 0.2).abs() < 1e-12);
        assert!(mean_of_scored(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_mean_of_scored_matches_plain_mean() {
        fn prop(values: Vec<u8>) -> bool {
            let scores: Vec<f64> = values.iter().map(|v| f64::from(*v) / 255.0).collect();
            if scores.is_empty() {
                return mean_of_scored(&scores).is_nan();
            }
            let plain = scores.iter().sum::<f64>() / scores.len() as f64;
            (mean_of_scored(&scores) - plain).abs() < 1e-9
        }
        quickcheck::quickcheck(prop as fn(Vec<u8>) -> bool);
    }
}
