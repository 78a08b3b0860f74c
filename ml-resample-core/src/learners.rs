//! Reference learners
//!
//! Small, dependency-free algorithms used as baselines and for exercising
//! the engines. They are not meant to be competitive.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::learner::{Learner, LearnerProperty, Model};
use crate::params::{ParamDef, ParamSet, ParamValue, ParamValues};
use crate::prediction::{PredictType, Prediction, ProbMatrix};
use crate::task::{Task, TaskType};
use crate::value::{RowId, Value};

const ALL_FEATURE_TYPES: &[&str] = &["logical", "integer", "numeric", "character", "factor"];
const NUMERIC_FEATURE_TYPES: &[&str] = &["integer", "numeric"];
const CLASSIF_PROPERTIES: &[LearnerProperty] = &[
    LearnerProperty::Missings,
    LearnerProperty::Twoclass,
    LearnerProperty::Multiclass,
];
const CLASSIF_PREDICT_TYPES: &[PredictType] = &[PredictType::Response, PredictType::Prob];

fn labels(learner: &str, values: &[Value]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| {
            v.as_label()
                .ok_or_else(|| Error::fit(learner, format!("target value {} is not a label", v)))
        })
        .collect()
}

fn numbers(learner: &str, values: &[Value]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| Error::fit(learner, format!("target value {} is not numeric", v)))
        })
        .collect()
}

/// Index of the largest count; ties go to the earliest class
fn argmax(counts: &[f64]) -> usize {
    let mut best = 0;
    for (i, c) in counts.iter().enumerate() {
        if *c > counts[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug)]
enum FeaturelessState {
    Classif { classes: Vec<String>, freq: Vec<f64> },
    Regr { center: f64 },
}

/// Ignores all features: predicts the majority class or the target mean
#[derive(Debug, Clone)]
pub struct FeaturelessLearner {
    id: String,
    task_type: TaskType,
    param_set: ParamSet,
    params: ParamValues,
}

impl FeaturelessLearner {
    /// Featureless learner for `task_type`
    pub fn new(task_type: TaskType) -> Self {
        let param_set = match task_type {
            TaskType::Classification => ParamSet::default(),
            TaskType::Regression => ParamSet::new(vec![
                ParamDef::bool("robust").with_default(ParamValue::Bool(false))
            ]),
        };
        Self {
            id: format!("{}.featureless", task_type),
            task_type,
            params: param_set.defaults(),
            param_set,
        }
    }
}

impl Learner for FeaturelessLearner {
    fn id(&self) -> &str {
        &self.id
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn properties(&self) -> &[LearnerProperty] {
        match self.task_type {
            TaskType::Classification => CLASSIF_PROPERTIES,
            TaskType::Regression => &[LearnerProperty::Missings],
        }
    }

    fn feature_types(&self) -> &[&'static str] {
        ALL_FEATURE_TYPES
    }

    fn predict_types(&self) -> &[PredictType] {
        match self.task_type {
            TaskType::Classification => CLASSIF_PREDICT_TYPES,
            TaskType::Regression => &[PredictType::Response],
        }
    }

    fn param_set(&self) -> &ParamSet {
        &self.param_set
    }

    fn params(&self) -> &ParamValues {
        &self.params
    }

    fn with_params(&self, values: &ParamValues) -> Result<Arc<dyn Learner>> {
        self.param_set.validate(values)?;
        Ok(Arc::new(Self {
            params: self.params.merged(values),
            ..self.clone()
        }))
    }

    #[allow(clippy::cast_precision_loss)]
    fn train(&self, task: &Task, rows: &[RowId]) -> Result<Model> {
        if rows.is_empty() {
            return Err(Error::fit(&self.id, "no training rows"));
        }
        let truth = task.truth(rows)?;
        let state = match self.task_type {
            TaskType::Classification => {
                let classes = task.class_names()?;
                let mut freq = vec![0.0; classes.len()];
                for label in labels(&self.id, &truth)? {
                    if let Some(i) = classes.iter().position(|c| *c == label) {
                        freq[i] += 1.0;
                    }
                }
                let total = rows.len() as f64;
                freq.iter_mut().for_each(|f| *f /= total);
                FeaturelessState::Classif { classes, freq }
            }
            TaskType::Regression => {
                let mut y = numbers(&self.id, &truth)?;
                let robust = self
                    .params
                    .get("robust")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(false);
                let center = if robust {
                    y.sort_by(f64::total_cmp);
                    let mid = y.len() / 2;
                    if y.len() % 2 == 0 {
                        (y[mid - 1] + y[mid]) / 2.0
                    } else {
                        y[mid]
                    }
                } else {
                    y.iter().sum::<f64>() / y.len() as f64
                };
                FeaturelessState::Regr { center }
            }
        };
        Ok(Model::new(&self.id, self.params.clone(), rows, state))
    }

    fn predict(&self, model: &Model, task: &Task, rows: &[RowId]) -> Result<Prediction> {
        let state = model.expect_state::<FeaturelessState>(&self.id)?;
        let truth = task.truth(rows)?;
        match state {
            FeaturelessState::Classif { classes, freq } => {
                let label = Value::from(classes[argmax(freq)].as_str());
                let prob = ProbMatrix::new(classes.clone(), vec![freq.clone(); rows.len()])?;
                Prediction::classification(
                    rows.to_vec(),
                    truth,
                    vec![label; rows.len()],
                    Some(prob),
                )
            }
            FeaturelessState::Regr { center } => {
                Prediction::regression(rows.to_vec(), truth, &vec![*center; rows.len()])
            }
        }
    }
}

#[derive(Debug)]
struct KnnState {
    x: Vec<Vec<f64>>,
    y: Vec<Value>,
    classes: Vec<String>,
}

/// k nearest neighbours over numeric features
///
/// Hyperparameters: `k` (1..=1000, default 7) and `distance`
/// (`euclidean` or `manhattan`).
#[derive(Debug, Clone)]
pub struct KnnLearner {
    id: String,
    task_type: TaskType,
    param_set: ParamSet,
    params: ParamValues,
}

impl KnnLearner {
    /// kNN learner for `task_type`
    pub fn new(task_type: TaskType) -> Self {
        let param_set = ParamSet::new(vec![
            ParamDef::int("k", 1, 1000).with_default(ParamValue::Int(7)),
            ParamDef::categorical("distance", &["euclidean", "manhattan"])
                .with_default(ParamValue::Str("euclidean".into())),
        ]);
        Self {
            id: format!("{}.kknn", task_type),
            task_type,
            params: param_set.defaults(),
            param_set,
        }
    }

    fn k(&self) -> usize {
        self.params
            .get("k")
            .and_then(ParamValue::as_i64)
            .and_then(|k| usize::try_from(k).ok())
            .unwrap_or(7)
    }

    fn manhattan(&self) -> bool {
        self.params.get("distance").and_then(ParamValue::as_str) == Some("manhattan")
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        if self.manhattan() {
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
        } else {
            a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
        }
    }
}

impl Learner for KnnLearner {
    fn id(&self) -> &str {
        &self.id
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn properties(&self) -> &[LearnerProperty] {
        match self.task_type {
            TaskType::Classification => &CLASSIF_PROPERTIES[1..],
            TaskType::Regression => &[],
        }
    }

    fn feature_types(&self) -> &[&'static str] {
        NUMERIC_FEATURE_TYPES
    }

    fn predict_types(&self) -> &[PredictType] {
        match self.task_type {
            TaskType::Classification => CLASSIF_PREDICT_TYPES,
            TaskType::Regression => &[PredictType::Response],
        }
    }

    fn param_set(&self) -> &ParamSet {
        &self.param_set
    }

    fn params(&self) -> &ParamValues {
        &self.params
    }

    fn with_params(&self, values: &ParamValues) -> Result<Arc<dyn Learner>> {
        self.param_set.validate(values)?;
        Ok(Arc::new(Self {
            params: self.params.merged(values),
            ..self.clone()
        }))
    }

    fn train(&self, task: &Task, rows: &[RowId]) -> Result<Model> {
        let k = self.k();
        if k > rows.len() {
            return Err(Error::fit(
                &self.id,
                format!("k = {} exceeds the {} training rows", k, rows.len()),
            ));
        }
        let x = task
            .features(rows)?
            .to_f64_rows()
            .map_err(|e| Error::fit(&self.id, e.to_string()))?;
        let y = task.truth(rows)?;
        let classes = match self.task_type {
            TaskType::Classification => task.class_names()?,
            TaskType::Regression => Vec::new(),
        };
        Ok(Model::new(
            &self.id,
            self.params.clone(),
            rows,
            KnnState { x, y, classes },
        ))
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, model: &Model, task: &Task, rows: &[RowId]) -> Result<Prediction> {
        let state = model.expect_state::<KnnState>(&self.id)?;
        let k = model
            .params()
            .get("k")
            .and_then(ParamValue::as_i64)
            .and_then(|k| usize::try_from(k).ok())
            .unwrap_or_else(|| self.k());
        let queries = task
            .features(rows)?
            .to_f64_rows()
            .map_err(|e| Error::predict(&self.id, e.to_string()))?;
        let truth = task.truth(rows)?;

        let neighbours: Vec<Vec<usize>> = queries
            .iter()
            .map(|q| {
                let mut order: Vec<(f64, usize)> = state
                    .x
                    .iter()
                    .enumerate()
                    .map(|(i, x)| (self.distance(q, x), i))
                    .collect();
                order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                order.into_iter().take(k).map(|(_, i)| i).collect()
            })
            .collect();

        match self.task_type {
            TaskType::Classification => {
                let train_labels = labels(&self.id, &state.y)?;
                let mut response = Vec::with_capacity(rows.len());
                let mut prob = Vec::with_capacity(rows.len());
                for nn in &neighbours {
                    let mut counts = vec![0.0; state.classes.len()];
                    for &i in nn {
                        if let Some(c) = state.classes.iter().position(|c| *c == train_labels[i]) {
                            counts[c] += 1.0;
                        }
                    }
                    response.push(Value::from(state.classes[argmax(&counts)].as_str()));
                    prob.push(counts.iter().map(|c| c / nn.len() as f64).collect());
                }
                let prob = ProbMatrix::new(state.classes.clone(), prob)?;
                Prediction::classification(rows.to_vec(), truth, response, Some(prob))
            }
            TaskType::Regression => {
                let train_y = numbers(&self.id, &state.y)?;
                let response: Vec<f64> = neighbours
                    .iter()
                    .map(|nn| nn.iter().map(|&i| train_y[i]).sum::<f64>() / nn.len() as f64)
                    .collect();
                Prediction::regression(rows.to_vec(), truth, &response)
            }
        }
    }
}
