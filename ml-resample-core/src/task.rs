//! Tasks: a dataset bound to a target/feature role assignment

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, TableView};
use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::value::{RowId, Value};

/// Kind of supervised problem a task describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Discrete target
    Classification,

    /// Continuous target
    Regression,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Classification => write!(f, "classif"),
            TaskType::Regression => write!(f, "regr"),
        }
    }
}

/// Role of a column within a task; every column has exactly one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRole {
    /// Input to the learner
    Feature,

    /// Value to predict
    Target,

    /// Human-readable row label, never used for fitting
    Label,

    /// Not used at all
    Ignore,
}

/// A dataset plus role assignments
///
/// Cloning a task never copies the backend; role changes produce a new
/// snapshot that shares the same storage.
#[derive(Clone)]
pub struct Task {
    id: String,
    task_type: TaskType,
    backend: Arc<dyn Dataset>,
    col_roles: BTreeMap<String, ColumnRole>,
    rows: Arc<Vec<RowId>>,
    validation: Arc<Vec<RowId>>,
    positive: Option<String>,
}

impl Task {
    /// Classification task predicting `target`
    pub fn classification(id: &str, backend: Arc<dyn Dataset>, target: &str) -> Result<Self> {
        Self::new(id, TaskType::Classification, backend, target)
    }

    /// Regression task predicting `target`
    pub fn regression(id: &str, backend: Arc<dyn Dataset>, target: &str) -> Result<Self> {
        Self::new(id, TaskType::Regression, backend, target)
    }

    /// Create a task; every column other than `target` becomes a feature
    pub fn new(
        id: &str,
        task_type: TaskType,
        backend: Arc<dyn Dataset>,
        target: &str,
    ) -> Result<Self> {
        let schema = backend.schema();
        let target_type = schema.field_by_name(target)?.data_type().clone();
        match task_type {
            TaskType::Classification if !target_type.is_discrete() => {
                return Err(Error::config(format!(
                    "classification target '{}' must be discrete, got {}",
                    target, target_type
                )))
            }
            TaskType::Regression if !target_type.is_numeric() => {
                return Err(Error::config(format!(
                    "regression target '{}' must be numeric, got {}",
                    target, target_type
                )))
            }
            _ => {}
        }

        let col_roles = schema
            .fields()
            .iter()
            .map(|f| {
                let role = if f.name() == target {
                    ColumnRole::Target
                } else {
                    ColumnRole::Feature
                };
                (f.name().to_string(), role)
            })
            .collect();

        Ok(Self {
            id: id.to_string(),
            task_type,
            rows: Arc::new(backend.row_ids().to_vec()),
            backend,
            col_roles,
            validation: Arc::new(Vec::new()),
            positive: None,
        })
    }

    /// Task id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Task type
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Shared backend
    pub fn backend(&self) -> &Arc<dyn Dataset> {
        &self.backend
    }

    /// Rows available for resampling, in backend order
    pub fn row_ids(&self) -> &[RowId] {
        &self.rows
    }

    /// Rows held out for validation; never part of a generated partition
    pub fn validation_ids(&self) -> &[RowId] {
        &self.validation
    }

    /// Number of rows available for resampling
    pub fn nrow(&self) -> usize {
        self.rows.len()
    }

    /// Role of a column
    pub fn col_role(&self, col: &str) -> Option<ColumnRole> {
        self.col_roles.get(col).copied()
    }

    /// Name of the target column
    pub fn target_name(&self) -> &str {
        self.cols_with_role(ColumnRole::Target)
            .next()
            .unwrap_or_default()
    }

    /// Names of the feature columns in schema order
    pub fn feature_names(&self) -> Vec<&str> {
        let schema = self.backend.schema();
        let features: HashSet<&str> = self.cols_with_role(ColumnRole::Feature).collect();
        schema
            .fields()
            .iter()
            .filter_map(|f| features.get(f.name()).copied())
            .collect()
    }

    /// Feature names with their data types
    pub fn feature_types(&self) -> Vec<(String, DataType)> {
        let schema = self.backend.schema();
        self.feature_names()
            .into_iter()
            .filter_map(|name| {
                schema
                    .field_by_name(name)
                    .ok()
                    .map(|f| (name.to_string(), f.data_type().clone()))
            })
            .collect()
    }

    fn cols_with_role(&self, role: ColumnRole) -> impl Iterator<Item = &str> {
        self.col_roles
            .iter()
            .filter(move |(_, r)| **r == role)
            .map(|(name, _)| name.as_str())
    }

    /// Class labels of a classification target
    ///
    /// Declared categorical levels win; otherwise labels are collected in
    /// order of first appearance over all rows.
    pub fn class_names(&self) -> Result<Vec<String>> {
        if self.task_type != TaskType::Classification {
            return Err(Error::InvalidArgument(format!(
                "task '{}' is not a classification task",
                self.id
            )));
        }
        let schema = self.backend.schema();
        if let DataType::Categorical(levels) = schema.field_by_name(self.target_name())?.data_type()
        {
            return Ok(levels.clone());
        }

        let mut classes: Vec<String> = Vec::new();
        for v in self.truth(self.backend.row_ids())? {
            if let Some(label) = v.as_label() {
                if !classes.contains(&label) {
                    classes.push(label);
                }
            }
        }
        Ok(classes)
    }

    /// Positive class for binary classification
    pub fn positive(&self) -> Result<Option<String>> {
        let classes = self.class_names()?;
        if classes.len() != 2 {
            return Ok(None);
        }
        Ok(Some(self.positive.clone().unwrap_or_else(|| classes[0].clone())))
    }

    /// Return a snapshot with a different positive class
    pub fn with_positive(&self, class: &str) -> Result<Self> {
        let classes = self.class_names()?;
        if classes.len() != 2 || !classes.iter().any(|c| c == class) {
            return Err(Error::config(format!(
                "'{}' is not a class of binary task '{}'",
                class, self.id
            )));
        }
        let mut task = self.clone();
        task.positive = Some(class.to_string());
        Ok(task)
    }

    /// Return a snapshot with `col` assigned to `role`
    ///
    /// Assigning `Target` demotes the previous target to a feature, so a
    /// task always has exactly one target.
    pub fn with_col_role(&self, col: &str, role: ColumnRole) -> Result<Self> {
        if !self.col_roles.contains_key(col) {
            return Err(Error::config(format!("unknown column '{}'", col)));
        }
        let mut task = self.clone();
        if role == ColumnRole::Target {
            let previous = task.target_name().to_string();
            task.col_roles.insert(previous, ColumnRole::Feature);
        } else if task.col_roles.get(col) == Some(&ColumnRole::Target) {
            return Err(Error::config(format!(
                "column '{}' is the target; assign another target first",
                col
            )));
        }
        task.col_roles.insert(col.to_string(), role);
        if role == ColumnRole::Target {
            // re-run the target type check
            Task::new(&task.id, task.task_type, task.backend.clone(), col)?;
        }
        Ok(task)
    }

    /// Return a snapshot restricted to `rows`
    ///
    /// Duplicate ids are collapsed, keeping the first occurrence.
    pub fn filter(&self, rows: &[RowId]) -> Result<Self> {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut kept = Vec::with_capacity(rows.len());
        for id in rows {
            if !self.backend.contains_row(id) {
                return Err(Error::InvalidArgument(format!("Unknown row id: {}", id)));
            }
            if seen.insert(id) {
                kept.push(id.clone());
            }
        }
        let mut task = self.clone();
        task.rows = Arc::new(kept);
        Ok(task)
    }

    /// Return a snapshot with `rows` moved from use to validation
    pub fn with_validation(&self, rows: &[RowId]) -> Result<Self> {
        let moved: HashSet<&RowId> = rows.iter().collect();
        if let Some(missing) = rows.iter().find(|id| !self.rows.contains(id)) {
            return Err(Error::config(format!(
                "validation row {} is not an active row of task '{}'",
                missing, self.id
            )));
        }
        let mut task = self.clone();
        task.rows = Arc::new(
            self.rows
                .iter()
                .filter(|id| !moved.contains(id))
                .cloned()
                .collect(),
        );
        let mut validation = self.validation.as_ref().clone();
        validation.extend(rows.iter().cloned());
        task.validation = Arc::new(validation);
        Ok(task)
    }

    /// Project arbitrary rows and columns
    pub fn data(&self, rows: &[RowId], cols: &[&str]) -> Result<TableView> {
        self.backend.project(rows, cols)
    }

    /// Feature columns of the given rows
    pub fn features(&self, rows: &[RowId]) -> Result<TableView> {
        self.data(rows, &self.feature_names())
    }

    /// Target values of the given rows
    pub fn truth(&self, rows: &[RowId]) -> Result<Vec<Value>> {
        let target = self.target_name();
        Ok(self.data(rows, &[target])?.column(target)?.to_vec())
    }

    /// Identity of this task snapshot
    ///
    /// Two snapshots share a key when they agree on id, type, roles and
    /// active rows.
    pub fn key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.task_type.hash(&mut hasher);
        self.col_roles.hash(&mut hasher);
        self.rows.hash(&mut hasher);
        self.positive.hash(&mut hasher);
        format!("{}#{:016x}", self.id, hasher.finish())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("target", &self.target_name())
            .field("features", &self.feature_names())
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}
