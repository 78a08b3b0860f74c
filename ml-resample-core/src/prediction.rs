//! Prediction records produced by learners

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{Task, TaskType};
use crate::value::{RowId, Value};

/// What a learner can predict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictType {
    /// Point prediction (label or number)
    Response,

    /// Per-class probabilities
    Prob,
}

/// Class probabilities, one row per prediction and one column per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbMatrix {
    classes: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl ProbMatrix {
    /// Create a probability matrix; every row must have one entry per class
    pub fn new(classes: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(row) = values.iter().find(|r| r.len() != classes.len()) {
            return Err(Error::InvalidArgument(format!(
                "probability row has {} entries for {} classes",
                row.len(),
                classes.len()
            )));
        }
        Ok(Self { classes, values })
    }

    /// Class labels, in column order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Probability rows
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Probability of `class` for every row
    pub fn class_column(&self, class: &str) -> Option<Vec<f64>> {
        let index = self.classes.iter().position(|c| c == class)?;
        Some(self.values.iter().map(|r| r[index]).collect())
    }
}

/// Predictions for a set of test rows
///
/// Immutable once produced; relabelling through [`Prediction::set_threshold`]
/// returns a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    task_type: TaskType,
    row_ids: Vec<RowId>,
    truth: Vec<Value>,
    response: Vec<Value>,
    prob: Option<ProbMatrix>,
}

impl Prediction {
    /// Classification prediction
    pub fn classification(
        row_ids: Vec<RowId>,
        truth: Vec<Value>,
        response: Vec<Value>,
        prob: Option<ProbMatrix>,
    ) -> Result<Self> {
        Self::new(TaskType::Classification, row_ids, truth, response, prob)
    }

    /// Regression prediction
    pub fn regression(row_ids: Vec<RowId>, truth: Vec<Value>, response: &[f64]) -> Result<Self> {
        let response = response.iter().copied().map(Value::Float).collect();
        Self::new(TaskType::Regression, row_ids, truth, response, None)
    }

    fn new(
        task_type: TaskType,
        row_ids: Vec<RowId>,
        truth: Vec<Value>,
        response: Vec<Value>,
        prob: Option<ProbMatrix>,
    ) -> Result<Self> {
        let n = row_ids.len();
        if truth.len() != n || response.len() != n {
            return Err(Error::InvalidArgument(format!(
                "prediction for {} rows got {} truth and {} response values",
                n,
                truth.len(),
                response.len()
            )));
        }
        if let Some(p) = &prob {
            if task_type != TaskType::Classification || p.rows().len() != n {
                return Err(Error::InvalidArgument(
                    "probabilities require a classification prediction with one row per id".into(),
                ));
            }
        }
        Ok(Self {
            task_type,
            row_ids,
            truth,
            response,
            prob,
        })
    }

    /// Task type this prediction belongs to
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Test row ids
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Ground truth values
    pub fn truth(&self) -> &[Value] {
        &self.truth
    }

    /// Predicted values
    pub fn response(&self) -> &[Value] {
        &self.response
    }

    /// Class probabilities, if predicted
    pub fn prob(&self) -> Option<&ProbMatrix> {
        self.prob.as_ref()
    }

    /// Predict types present in this record
    pub fn predict_types(&self) -> Vec<PredictType> {
        let mut types = vec![PredictType::Response];
        if self.prob.is_some() {
            types.push(PredictType::Prob);
        }
        types
    }

    /// Number of predicted rows
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    /// Whether nothing was predicted
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Pool several predictions into one record
    ///
    /// Probabilities survive only when every part carries them over the
    /// same classes.
    pub fn concat(parts: &[&Prediction]) -> Result<Prediction> {
        let first = parts
            .first()
            .ok_or_else(|| Error::InvalidArgument("nothing to concatenate".into()))?;
        if parts.iter().any(|p| p.task_type != first.task_type) {
            return Err(Error::InvalidArgument(
                "cannot concatenate predictions of different task types".into(),
            ));
        }

        let mut row_ids = Vec::new();
        let mut truth = Vec::new();
        let mut response = Vec::new();
        for p in parts {
            row_ids.extend(p.row_ids.iter().cloned());
            truth.extend(p.truth.iter().cloned());
            response.extend(p.response.iter().cloned());
        }

        let prob = match &first.prob {
            Some(head)
                if parts
                    .iter()
                    .all(|p| p.prob.as_ref().is_some_and(|m| m.classes == head.classes)) =>
            {
                let values = parts
                    .iter()
                    .filter_map(|p| p.prob.as_ref())
                    .flat_map(|m| m.values.iter().cloned())
                    .collect();
                Some(ProbMatrix::new(head.classes.clone(), values)?)
            }
            _ => None,
        };

        Self::new(first.task_type, row_ids, truth, response, prob)
    }

    /// Relabel a binary probability prediction with a cutoff
    ///
    /// A row is labelled `positive` when its positive-class probability is
    /// at least `threshold`, otherwise it gets the other class.
    pub fn set_threshold(&self, threshold: f64, positive: &str) -> Result<Prediction> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::config(format!(
                "threshold must lie in [0, 1], got {}",
                threshold
            )));
        }
        let prob = self.prob.as_ref().ok_or_else(|| {
            Error::InvalidArgument("thresholding requires probability predictions".into())
        })?;
        if prob.classes.len() != 2 {
            return Err(Error::InvalidArgument(format!(
                "thresholding needs exactly two classes, got {}",
                prob.classes.len()
            )));
        }
        let negative = prob
            .classes
            .iter()
            .find(|c| *c != positive)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown class '{}'", positive)))?;
        let pos_prob = prob
            .class_column(positive)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown class '{}'", positive)))?;

        let response = pos_prob
            .iter()
            .map(|p| {
                if *p >= threshold {
                    Value::from(positive)
                } else {
                    Value::from(negative.as_str())
                }
            })
            .collect();

        Ok(Prediction {
            response,
            ..self.clone()
        })
    }

    /// Relabel with a cutoff on the positive class of `task`
    pub fn set_threshold_for(&self, task: &Task, threshold: f64) -> Result<Prediction> {
        let positive = task.positive()?.ok_or_else(|| {
            Error::config(format!(
                "task '{}' is not binary and has no positive class",
                task.id()
            ))
        })?;
        self.set_threshold(threshold, &positive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary() -> Prediction {
        let classes = vec!["yes".to_string(), "no".to_string()];
        let prob = ProbMatrix::new(
            classes,
            vec![vec![0.9, 0.1], vec![0.4, 0.6], vec![0.55, 0.45]],
        )
        .unwrap();
        Prediction::classification(
            vec![RowId::Int(1), RowId::Int(2), RowId::Int(3)],
            vec!["yes".into(), "no".into(), "no".into()],
            vec!["yes".into(), "no".into(), "yes".into()],
            Some(prob),
        )
        .unwrap()
    }

    #[test]
    fn test_set_threshold_relabels() {
        let pred = binary();
        let strict = pred.set_threshold(0.6, "yes").unwrap();
        assert_eq!(
            strict.response(),
            &[Value::from("yes"), Value::from("no"), Value::from("no")]
        );
        // original record untouched
        assert_eq!(pred.response()[2], Value::from("yes"));

        let lenient = pred.set_threshold(0.3, "yes").unwrap();
        assert!(lenient.response().iter().all(|v| *v == Value::from("yes")));
    }

    #[test]
    fn test_set_threshold_rejects_bad_input() {
        let pred = binary();
        assert!(pred.set_threshold(1.5, "yes").unwrap_err().is_configuration());
        assert!(pred.set_threshold(0.5, "maybe").is_err());

        let regr = Prediction::regression(vec![RowId::Int(1)], vec![Value::Float(1.0)], &[2.0])
            .unwrap();
        assert!(regr.set_threshold(0.5, "yes").is_err());
    }

    #[test]
    fn test_threshold_follows_task_positive_class() {
        let backend = crate::dataset::DatasetBuilder::new()
            .f64_column("x", &[1.0, 2.0, 3.0])
            .label_column("y", &["yes", "no", "no"])
            .build()
            .unwrap();
        let task = Task::classification("binary", backend, "y").unwrap();
        let pred = binary();

        // first class is positive unless the task says otherwise
        let default = pred.set_threshold_for(&task, 0.6).unwrap();
        assert_eq!(default.response(), pred.set_threshold(0.6, "yes").unwrap().response());

        let flipped = task.with_positive("no").unwrap();
        let relabelled = pred.set_threshold_for(&flipped, 0.5).unwrap();
        assert_eq!(
            relabelled.response(),
            &[Value::from("yes"), Value::from("no"), Value::from("yes")]
        );
        assert!(task.with_positive("maybe").unwrap_err().is_configuration());
    }

    #[test]
    fn test_concat_pools_rows_and_probabilities() {
        let a = binary();
        let b = binary();
        let pooled = Prediction::concat(&[&a, &b]).unwrap();
        assert_eq!(pooled.len(), 6);
        assert_eq!(pooled.prob().unwrap().rows().len(), 6);
        assert_eq!(pooled.predict_types(), vec![PredictType::Response, PredictType::Prob]);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = Prediction::regression(vec![RowId::Int(1)], vec![], &[1.0]);
        assert!(err.is_err());
    }
}
