// inkstage-core/src/domain/batch.rs

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Null, or a float NaN coming out of a lossy source.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric coercion: numbers pass through, text is parsed, everything else fails.
    pub fn as_f64(&self) -> Option<f64> {
        let n = match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s.trim().parse::<f64>().ok()?,
            Value::Null | Value::Date(_) => return None,
        };
        n.is_finite().then_some(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Ordered rows sharing one column schema.
///
/// The schema is checked once at construction, so every row is guaranteed
/// to carry exactly one value per column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DomainError> {
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(DomainError::InvalidBatch(format!(
                "duplicate column '{}'",
                dup
            )));
        }

        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(DomainError::InvalidBatch(format!(
                "row {} has {} values, expected {}",
                idx + 1,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Tail of the batch starting at the 0-based `offset` (used to resume after a partial load).
    pub fn slice_from(&self, offset: usize) -> RecordBatch {
        RecordBatch {
            columns: self.columns.clone(),
            rows: self.rows.iter().skip(offset).cloned().collect(),
        }
    }

    /// Rows re-ordered to match `columns`, ready to bind as positional parameters.
    pub fn project(&self, columns: &[String]) -> Result<Vec<Vec<Value>>, DomainError> {
        let indices = columns
            .iter()
            .map(|c| {
                self.column_index(c).ok_or_else(|| {
                    DomainError::SchemaError(format!("batch has no column '{}'", c))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }
}
