//! Row-oriented feature table
//!
//! Every pipeline stage reads and writes a [`FeatureFrame`]: an ordered list of
//! named columns over rows of dynamically typed cells. A column that is absent
//! is structurally different from a column whose cell is null, and the
//! derivation rules depend on that difference.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell; booleans read as 0/1, text is not numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Identifier-style rendering: integral numbers lose their fraction
    pub fn to_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.is_nan() => write!(f, "NaN"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Ordered, named columns over rows of [`Value`] cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl FeatureFrame {
    /// Create an empty frame with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a frame from columns and rows, checking row widths
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, PipelineError> {
        let mut frame = Self::new(columns);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Build a frame from JSON objects; the columns are the union of keys in
    /// first-seen order, and keys missing from a row become null cells
    pub fn from_json_rows(
        objects: &[serde_json::Map<String, serde_json::Value>],
    ) -> Result<Self, PipelineError> {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for object in objects {
            for key in object.keys() {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(objects.len());
        for (row_num, object) in objects.iter().enumerate() {
            let mut row = vec![Value::Null; columns.len()];
            for (key, value) in object {
                let cell = match value {
                    serde_json::Value::Null => Value::Null,
                    serde_json::Value::Bool(b) => Value::Bool(*b),
                    serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
                    serde_json::Value::String(s) => Value::Text(s.clone()),
                    _ => {
                        return Err(PipelineError::ParseError(format!(
                            "row {}: field {key} is not a scalar",
                            row_num + 1
                        )))
                    }
                };
                row[index[key]] = cell;
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of a column that must be present
    pub fn require_column(&self, name: &str) -> Result<usize, PipelineError> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    /// Cell by row and column name; `None` when the column is absent
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        &self.rows[row][column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: Value) {
        self.rows[row][column] = value;
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), PipelineError> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::ParseError(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Return the index of `name`, appending it filled with `fill` if absent
    pub fn ensure_column(&mut self, name: &str, fill: Value) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        self.columns.len() - 1
    }

    /// Set a whole column, replacing it in place or appending it
    pub fn put_column(&mut self, name: &str, values: Vec<Value>) -> Result<usize, PipelineError> {
        if values.len() != self.rows.len() {
            return Err(PipelineError::ParseError(format!(
                "column {name} has {} values, frame has {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        let idx = self.ensure_column(name, Value::Null);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        Ok(idx)
    }

    /// Cells of one column; `None` when the column is absent
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Drop the named columns, ignoring names that are absent
    pub fn drop_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.iter().any(|n| n.as_ref() == c))
            .collect();
        self.retain_by_mask(&keep);
    }

    /// Keep only the columns whose name satisfies `predicate`
    pub fn retain_columns<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        let keep: Vec<bool> = self.columns.iter().map(|c| predicate(c)).collect();
        self.retain_by_mask(&keep);
    }

    fn retain_by_mask(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }

    /// Keep only the rows satisfying `predicate`
    pub fn retain_rows<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|row| predicate(row));
    }

    /// Frame with exactly `columns` in that order; absent ones are filled
    pub fn reindex<S: AsRef<str>>(&self, columns: &[S], fill: Value) -> FeatureFrame {
        let sources: Vec<Option<usize>> = columns
            .iter()
            .map(|c| self.column_index(c.as_ref()))
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|src| match src {
                        Some(i) => row[*i].clone(),
                        None => fill.clone(),
                    })
                    .collect()
            })
            .collect();
        FeatureFrame {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows,
        }
    }

    /// Apply `f` to every cell of one column
    pub fn map_column<F>(&mut self, column: usize, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        for row in &mut self.rows {
            row[column] = f(&row[column]);
        }
    }

    /// Comma-separated column list, for diagnostics
    pub fn column_list(&self) -> String {
        self.columns.join(", ")
    }

    /// Compact rendering of the first `max_rows` rows, for diagnostics
    pub fn preview(&self, max_rows: usize) -> String {
        let rendered: Vec<String> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                let cells: Vec<String> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| format!("{c}={v}"))
                    .collect();
                format!("{{{}}}", cells.join(", "))
            })
            .collect();
        format!("[{}]", rendered.join(", "))
    }
}
