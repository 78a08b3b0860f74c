//! Row identifiers and cell values

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a single row in a dataset
///
/// Row ids are assigned once by the backend and never change afterwards.
/// Partitionings refer to rows exclusively through these ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RowId {
    /// Integer row id
    Int(i64),

    /// String row id
    Str(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(id) => write!(f, "{}", id),
            RowId::Str(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Int(id)
    }
}

impl From<usize> for RowId {
    fn from(id: usize) -> Self {
        RowId::Int(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Str(id.to_string())
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId::Str(id)
    }
}

/// Build integer row ids `1..=n`
pub fn seq_row_ids(n: usize) -> Vec<RowId> {
    (1..=n).map(RowId::from).collect()
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean flag
    Bool(bool),

    /// Integer value
    Int(i64),

    /// Floating point value
    Float(f64),

    /// String or categorical label
    Str(String),

    /// Missing value
    Missing,
}

impl Value {
    /// Numeric view of this value, if it has one
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Str(_) | Value::Missing => None,
        }
    }

    /// Label view of this value, used for classification targets
    pub fn as_label(&self) -> Option<String> {
        match self {
            Value::Str(v) => Some(v.clone()),
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(_) | Value::Missing => None,
        }
    }

    /// Whether this value is missing
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::Missing => write!(f, "NA"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
