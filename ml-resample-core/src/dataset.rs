//! Dataset trait and an in-memory backend

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};
use crate::value::{seq_row_ids, RowId, Value};

/// A read-only collection of rows and columns
///
/// Row ids are fixed when the dataset is built. Everything downstream
/// (tasks, partitionings, predictions) addresses rows through them.
pub trait Dataset: Send + Sync {
    /// Get the schema of this dataset
    fn schema(&self) -> Arc<Schema>;

    /// Get the number of rows in this dataset
    fn row_count(&self) -> usize;

    /// Ordered, unique row ids
    fn row_ids(&self) -> &[RowId];

    /// Whether a row id is present
    fn contains_row(&self, id: &RowId) -> bool;

    /// Project the given rows and columns into a tabular view
    ///
    /// Rows are returned in the requested order; a row id may appear
    /// more than once (bootstrap samples do this).
    fn project(&self, rows: &[RowId], cols: &[&str]) -> Result<TableView>;
}

/// A materialized projection of a dataset
#[derive(Debug, Clone)]
pub struct TableView {
    schema: Arc<Schema>,
    row_ids: Vec<RowId>,
    columns: Vec<Vec<Value>>,
}

impl TableView {
    /// Schema of the projected columns
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Row ids of the view, in projection order
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    /// Number of columns
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Values of a column by name
    pub fn column(&self, name: &str) -> Result<&[Value]> {
        let index = self.schema.index_of(name)?;
        Ok(&self.columns[index])
    }

    /// Numeric values of a column; missing or non-numeric cells are rejected
    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    Error::TypeMismatch(format!("column '{}' holds non-numeric value {}", name, v))
                })
            })
            .collect()
    }

    /// Row-major numeric matrix over all columns of the view
    pub fn to_f64_rows(&self) -> Result<Vec<Vec<f64>>> {
        let columns = self
            .schema
            .fields()
            .iter()
            .map(|f| self.f64_column(f.name()))
            .collect::<Result<Vec<_>>>()?;

        Ok((0..self.num_rows())
            .map(|row| columns.iter().map(|c| c[row]).collect())
            .collect())
    }
}

/// A builder for in-memory datasets
pub struct DatasetBuilder {
    fields: Vec<Field>,
    columns: Vec<Vec<Value>>,
    row_ids: Option<Vec<RowId>>,
}

impl DatasetBuilder {
    /// Create a new dataset builder
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            columns: Vec::new(),
            row_ids: None,
        }
    }

    /// Add a column
    pub fn column(mut self, field: Field, values: Vec<Value>) -> Self {
        self.fields.push(field);
        self.columns.push(values);
        self
    }

    /// Add a non-nullable numeric column
    pub fn f64_column(self, name: &str, values: &[f64]) -> Self {
        let values = values.iter().copied().map(Value::Float).collect();
        self.column(Field::new(name, DataType::Float64, false), values)
    }

    /// Add a non-nullable categorical column, levels in order of appearance
    pub fn label_column(self, name: &str, values: &[&str]) -> Self {
        let mut levels: Vec<String> = Vec::new();
        for v in values {
            if !levels.iter().any(|l| l == v) {
                levels.push((*v).to_string());
            }
        }
        let values = values.iter().map(|v| Value::from(*v)).collect();
        self.column(Field::new(name, DataType::Categorical(levels), false), values)
    }

    /// Use explicit row ids instead of `1..=n`
    pub fn row_ids(mut self, ids: Vec<RowId>) -> Self {
        self.row_ids = Some(ids);
        self
    }

    /// Build the dataset
    pub fn build(self) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(self.build_in_memory()?))
    }

    /// Build the concrete in-memory dataset
    pub fn build_in_memory(self) -> Result<InMemoryDataset> {
        if self.fields.is_empty() {
            return Err(Error::InvalidArgument(
                "At least one column is required to build a dataset".into(),
            ));
        }

        let n = self.columns[0].len();
        for (field, values) in self.fields.iter().zip(&self.columns) {
            if values.len() != n {
                return Err(Error::InvalidArgument(format!(
                    "Column '{}' has {} values, expected {}",
                    field.name,
                    values.len(),
                    n
                )));
            }
            check_column(field, values)?;
        }

        let row_ids = self.row_ids.unwrap_or_else(|| seq_row_ids(n));
        if row_ids.len() != n {
            return Err(Error::InvalidArgument(format!(
                "Got {} row ids for {} rows",
                row_ids.len(),
                n
            )));
        }

        let mut row_index = HashMap::with_capacity(n);
        for (i, id) in row_ids.iter().enumerate() {
            if row_index.insert(id.clone(), i).is_some() {
                return Err(Error::InvalidArgument(format!("Duplicate row id: {}", id)));
            }
        }

        let mut names = HashSet::with_capacity(self.fields.len());
        if !self.fields.iter().all(|f| names.insert(f.name.as_str())) {
            return Err(Error::InvalidArgument("Duplicate column names".into()));
        }
        let schema = Arc::new(Schema::new(self.fields));

        Ok(InMemoryDataset {
            schema,
            row_ids,
            row_index,
            columns: Arc::new(self.columns),
        })
    }
}

impl Default for DatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_column(field: &Field, values: &[Value]) -> Result<()> {
    for v in values {
        let ok = match (&field.data_type, v) {
            (_, Value::Missing) => field.nullable,
            (DataType::Boolean, Value::Bool(_))
            | (DataType::Int64, Value::Int(_))
            | (DataType::Float64, Value::Float(_) | Value::Int(_))
            | (DataType::String, Value::Str(_)) => true,
            (DataType::Categorical(levels), Value::Str(s)) => levels.contains(s),
            _ => false,
        };
        if !ok {
            return Err(Error::TypeMismatch(format!(
                "value {} does not fit field {}",
                v, field
            )));
        }
    }
    Ok(())
}

/// An in-memory dataset with column-major storage
#[derive(Clone)]
pub struct InMemoryDataset {
    schema: Arc<Schema>,
    row_ids: Vec<RowId>,
    row_index: HashMap<RowId, usize>,
    columns: Arc<Vec<Vec<Value>>>,
}

impl Dataset for InMemoryDataset {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    fn contains_row(&self, id: &RowId) -> bool {
        self.row_index.contains_key(id)
    }

    fn project(&self, rows: &[RowId], cols: &[&str]) -> Result<TableView> {
        let col_indices = cols
            .iter()
            .map(|name| self.schema.index_of(name))
            .collect::<Result<Vec<_>>>()?;

        let row_indices = rows
            .iter()
            .map(|id| {
                self.row_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| Error::InvalidArgument(format!("Unknown row id: {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;

        let columns = col_indices
            .iter()
            .map(|&c| row_indices.iter().map(|&r| self.columns[c][r].clone()).collect())
            .collect();

        Ok(TableView {
            schema: Arc::new(self.schema.project_by_names(cols)?),
            row_ids: rows.to_vec(),
            columns,
        })
    }
}
