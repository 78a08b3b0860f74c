//! Schema definition for tabular task data

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Data type for column values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean flag
    Boolean,

    /// 64-bit signed integer
    Int64,

    /// 64-bit floating point
    Float64,

    /// UTF-8 encoded string
    String,

    /// Categorical with a fixed set of levels
    Categorical(Vec<String>),
}

impl DataType {
    /// Check if this type is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    /// Check if values of this type can serve as class labels
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            DataType::Boolean | DataType::String | DataType::Categorical(_)
        )
    }

    /// Short name used when comparing learner capabilities
    pub fn kind(&self) -> &'static str {
        match self {
            DataType::Boolean => "logical",
            DataType::Int64 => "integer",
            DataType::Float64 => "numeric",
            DataType::String => "character",
            DataType::Categorical(_) => "factor",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "Boolean"),
            DataType::Int64 => write!(f, "Int64"),
            DataType::Float64 => write!(f, "Float64"),
            DataType::String => write!(f, "String"),
            DataType::Categorical(levels) => write!(f, "Categorical({})", levels.join(", ")),
        }
    }
}

/// A field in a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Name of the field
    pub name: String,

    /// Data type of the field
    pub data_type: DataType,

    /// Whether this field can contain missing values
    pub nullable: bool,
}

impl Field {
    /// Create a new field
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable,
        }
    }

    /// Get the name of this field
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the data type of this field
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}: {} (nullable)", self.name, self.data_type)
        } else {
            write!(f, "{}: {} (non-nullable)", self.name, self.data_type)
        }
    }
}

/// A schema describing a dataset's columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Fields in this schema
    fields: Vec<Field>,

    /// Field indices by name for faster lookup
    field_indices: HashMap<String, usize>,
}

impl Schema {
    /// Create a new schema with the given fields
    pub fn new(fields: Vec<Field>) -> Self {
        let mut field_indices = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            field_indices.insert(field.name.clone(), i);
        }

        Self {
            fields,
            field_indices,
        }
    }

    /// Get all fields in this schema
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Get a field by index
    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// Get a field by name
    pub fn field_by_name(&self, name: &str) -> Result<&Field> {
        let index = self.index_of(name)?;
        Ok(&self.fields[index])
    }

    /// Get the index of a field by name
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.field_indices
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("Field not found: {}", name)))
    }

    /// Whether a field with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.field_indices.contains_key(name)
    }

    /// Get the number of fields in this schema
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if this schema is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Create a projection of this schema with only the specified field names
    pub fn project_by_names(&self, names: &[&str]) -> Result<Self> {
        let fields = names
            .iter()
            .map(|&name| self.field_by_name(name).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(fields))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schema: {} fields", self.fields.len())?;
        for field in &self.fields {
            writeln!(f, "  {}", field)?;
        }
        Ok(())
    }
}
