//! Hyperparameter schemas and configuration snapshots

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Integer value
    Int(i64),

    /// Floating point value
    Float(f64),

    /// Boolean flag
    Bool(bool),

    /// Categorical level
    Str(String),
}

impl ParamValue {
    /// Integer view of this value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of this value; integers are widened
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view of this value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of this value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// An immutable hyperparameter configuration, sorted by parameter id
///
/// Each execution unit receives its own copy; nothing mutates a
/// configuration after it has been handed to a learner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamValues(BTreeMap<String, ParamValue>);

impl ParamValues {
    /// Empty configuration
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Return a copy with `id` set to `value`
    #[must_use]
    pub fn with(mut self, id: &str, value: ParamValue) -> Self {
        self.0.insert(id.to_string(), value);
        self
    }

    /// Look up a value
    pub fn get(&self, id: &str) -> Option<&ParamValue> {
        self.0.get(id)
    }

    /// Iterate values in id order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Number of set values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no value is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of this configuration
    #[must_use]
    pub fn merged(&self, other: &ParamValues) -> Self {
        let mut merged = self.0.clone();
        for (id, value) in &other.0 {
            merged.insert(id.clone(), value.clone());
        }
        Self(merged)
    }
}

impl fmt::Display for ParamValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromIterator<(String, ParamValue)> for ParamValues {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Domain of a single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Integer in `[lower, upper]`
    Int {
        /// Inclusive lower bound
        lower: i64,
        /// Inclusive upper bound
        upper: i64,
    },

    /// Float in `[lower, upper]`
    Float {
        /// Inclusive lower bound
        lower: f64,
        /// Inclusive upper bound
        upper: f64,
    },

    /// Boolean flag
    Bool,

    /// One of a fixed set of levels
    Categorical(Vec<String>),
}

/// Declaration of a single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    /// Parameter id
    pub id: String,

    /// Parameter domain
    pub kind: ParamKind,

    /// Value used when the configuration does not set one
    pub default: Option<ParamValue>,
}

impl ParamDef {
    /// Integer parameter
    pub fn int(id: &str, lower: i64, upper: i64) -> Self {
        Self {
            id: id.to_string(),
            kind: ParamKind::Int { lower, upper },
            default: None,
        }
    }

    /// Float parameter
    pub fn float(id: &str, lower: f64, upper: f64) -> Self {
        Self {
            id: id.to_string(),
            kind: ParamKind::Float { lower, upper },
            default: None,
        }
    }

    /// Boolean parameter
    pub fn bool(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ParamKind::Bool,
            default: None,
        }
    }

    /// Categorical parameter
    pub fn categorical(id: &str, levels: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: ParamKind::Categorical(levels.iter().map(ToString::to_string).collect()),
            default: None,
        }
    }

    /// Set the default value
    #[must_use]
    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Check a value against this parameter's domain
    pub fn check(&self, value: &ParamValue) -> Result<()> {
        let ok = match (&self.kind, value) {
            (ParamKind::Int { lower, upper }, ParamValue::Int(v)) => lower <= v && v <= upper,
            (ParamKind::Float { lower, upper }, v) => v
                .as_f64()
                .is_some_and(|v| v.is_finite() && *lower <= v && v <= *upper),
            (ParamKind::Bool, ParamValue::Bool(_)) => true,
            (ParamKind::Categorical(levels), ParamValue::Str(v)) => levels.contains(v),
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(Error::config(format!(
                "value {} is not feasible for parameter '{}' ({:?})",
                value, self.id, self.kind
            )))
        }
    }
}

/// The set of hyperparameters a learner declares
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    params: Vec<ParamDef>,
}

impl ParamSet {
    /// Create a parameter set
    pub fn new(params: Vec<ParamDef>) -> Self {
        Self { params }
    }

    /// Declared parameters
    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    /// Look up a declaration by id
    pub fn get(&self, id: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.id == id)
    }

    /// Defaults of all parameters that declare one
    pub fn defaults(&self) -> ParamValues {
        self.params
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.id.clone(), d)))
            .collect()
    }

    /// Validate a configuration against the declared bounds
    pub fn validate(&self, values: &ParamValues) -> Result<()> {
        for (id, value) in values.iter() {
            let def = self
                .get(id)
                .ok_or_else(|| Error::config(format!("unknown parameter '{}'", id)))?;
            def.check(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knn_params() -> ParamSet {
        ParamSet::new(vec![
            ParamDef::int("k", 1, 50).with_default(ParamValue::Int(7)),
            ParamDef::categorical("distance", &["euclidean", "manhattan"]),
        ])
    }

    #[test]
    fn test_validate_accepts_feasible_values() {
        let ps = knn_params();
        let values = ParamValues::new()
            .with("k", ParamValue::Int(3))
            .with("distance", ParamValue::Str("manhattan".into()));
        assert!(ps.validate(&values).is_ok());
        assert_eq!(ps.defaults().get("k"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_and_unknown() {
        let ps = knn_params();
        let too_big = ParamValues::new().with("k", ParamValue::Int(51));
        assert!(ps.validate(&too_big).unwrap_err().is_configuration());

        let unknown = ParamValues::new().with("depth", ParamValue::Int(2));
        assert!(ps.validate(&unknown).is_err());

        let wrong_type = ParamValues::new().with("k", ParamValue::Float(2.0));
        assert!(ps.validate(&wrong_type).is_err());
    }

    #[test]
    fn test_merged_overrides_and_displays_sorted() {
        let base = ParamValues::new().with("k", ParamValue::Int(1));
        let over = ParamValues::new()
            .with("k", ParamValue::Int(5))
            .with("a", ParamValue::Bool(true));
        let merged = base.merged(&over);
        assert_eq!(merged.get("k"), Some(&ParamValue::Int(5)));
        assert_eq!(merged.to_string(), "a=true,k=5");
    }
}
