//! Learner adapter trait and fitted model artifacts

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::{ParamSet, ParamValues};
use crate::prediction::{PredictType, Prediction};
use crate::task::{Task, TaskType};
use crate::value::RowId;

/// Optional capabilities a learner may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearnerProperty {
    /// Can fit on data with missing values
    Missings,

    /// Reports feature importance
    Importance,

    /// Handles more than two classes
    Multiclass,

    /// Handles exactly two classes
    Twoclass,
}

/// A fitted model
///
/// The learner-specific state is opaque to the engine; learners downcast
/// it back with [`Model::state`].
#[derive(Clone)]
pub struct Model {
    learner_id: String,
    params: ParamValues,
    train_rows: Vec<RowId>,
    warnings: Vec<String>,
    state: Arc<dyn Any + Send + Sync>,
}

impl Model {
    /// Wrap learner state fitted on `train_rows` with configuration `params`
    pub fn new<S: Any + Send + Sync>(
        learner_id: &str,
        params: ParamValues,
        train_rows: &[RowId],
        state: S,
    ) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            params,
            train_rows: train_rows.to_vec(),
            warnings: Vec::new(),
            state: Arc::new(state),
        }
    }

    /// Attach a warning raised while fitting
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Id of the learner that produced this model
    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    /// Configuration the model was fitted with
    pub fn params(&self) -> &ParamValues {
        &self.params
    }

    /// Rows the model was fitted on
    pub fn train_rows(&self) -> &[RowId] {
        &self.train_rows
    }

    /// Warnings raised while fitting
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Downcast the learner state
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }

    /// Downcast the learner state or fail with a predict error
    pub fn expect_state<S: Any>(&self, learner: &str) -> Result<&S> {
        self.state::<S>().ok_or_else(|| {
            Error::predict(
                learner,
                format!("model was produced by '{}'", self.learner_id),
            )
        })
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("learner_id", &self.learner_id)
            .field("params", &self.params)
            .field("train_rows", &self.train_rows.len())
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

/// An algorithm that fits models and predicts with them
///
/// Implementations are immutable configuration snapshots: `train` and
/// `predict` take `&self`, and a changed configuration is a new learner
/// obtained from [`Learner::with_params`].
pub trait Learner: Send + Sync {
    /// Learner id, e.g. `classif.kknn`
    fn id(&self) -> &str;

    /// Task type this learner handles
    fn task_type(&self) -> TaskType;

    /// Declared capabilities
    fn properties(&self) -> &[LearnerProperty] {
        &[]
    }

    /// Feature types accepted, by [`crate::schema::DataType::kind`] name
    fn feature_types(&self) -> &[&'static str];

    /// Predict types supported
    fn predict_types(&self) -> &[PredictType] {
        &[PredictType::Response]
    }

    /// Hyperparameter schema
    fn param_set(&self) -> &ParamSet;

    /// Current configuration
    fn params(&self) -> &ParamValues;

    /// New snapshot with `values` overlaid on the current configuration
    fn with_params(&self, values: &ParamValues) -> Result<Arc<dyn Learner>>;

    /// Fit a model on the given task rows
    fn train(&self, task: &Task, rows: &[RowId]) -> Result<Model>;

    /// Predict the given task rows with a fitted model
    fn predict(&self, model: &Model, task: &Task, rows: &[RowId]) -> Result<Prediction>;

    /// Identity of this learner configuration, used to decide whether
    /// resample results can be combined
    fn key(&self) -> String {
        format!("{}[{}]", self.id(), self.params())
    }
}

impl fmt::Debug for dyn Learner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Learner({})", self.key())
    }
}

/// Check that a learner can be applied to a task before any work starts
pub fn check_compatible(learner: &dyn Learner, task: &Task) -> Result<()> {
    if learner.task_type() != task.task_type() {
        return Err(Error::config(format!(
            "learner '{}' ({}) cannot handle task '{}' ({})",
            learner.id(),
            learner.task_type(),
            task.id(),
            task.task_type()
        )));
    }

    let accepted = learner.feature_types();
    for (name, data_type) in task.feature_types() {
        if !accepted.contains(&data_type.kind()) {
            return Err(Error::config(format!(
                "learner '{}' does not support feature '{}' of type {}",
                learner.id(),
                name,
                data_type
            )));
        }
    }

    if task.task_type() == TaskType::Classification {
        let classes = task.class_names()?.len();
        let props = learner.properties();
        if classes > 2 && !props.contains(&LearnerProperty::Multiclass) {
            return Err(Error::config(format!(
                "learner '{}' does not support {} classes",
                learner.id(),
                classes
            )));
        }
        if classes == 2 && !props.contains(&LearnerProperty::Twoclass) {
            return Err(Error::config(format!(
                "learner '{}' does not support binary tasks",
                learner.id()
            )));
        }
    }
    Ok(())
}
