use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::common::error::{MapperError, Result};

pub type Row = BTreeMap<String, Value>;

/// Records that have a fixed tabular shape.
pub trait TableRecord {
    const COLUMNS: &'static [&'static str];
}

/// An ordered set of rows sharing one declared set of columns.
///
/// Every row holds a value for every declared column; cells that were not
/// supplied are stored as `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut declared: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if !declared.contains(&column) {
                declared.push(column);
            }
        }
        Self { columns: declared, rows: Vec::new() }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Append a column to the declared set, back-filling existing rows with nulls.
    pub fn add_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if self.has_column(&column) {
            return;
        }
        for row in &mut self.rows {
            row.insert(column.clone(), Value::Null);
        }
        self.columns.push(column);
    }

    pub fn push_row(&mut self, mut row: Row) -> Result<()> {
        if let Some(unknown) = row.keys().find(|k| !self.has_column(k)) {
            return Err(MapperError::data(format!(
                "row has column '{}' which is not declared (columns: {})",
                unknown,
                self.columns.join(", ")
            )));
        }
        for column in &self.columns {
            row.entry(column.clone()).or_insert(Value::Null);
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.retain(f);
    }

    /// Values of one column in row order.
    pub fn column_values<'a>(&'a self, column: &str) -> Result<Vec<&'a Value>> {
        if !self.has_column(column) {
            return Err(MapperError::data(format!(
                "column '{}' not present (columns: {})",
                column,
                self.columns.join(", ")
            )));
        }
        Ok(self.rows.iter().map(|row| row.get(column).unwrap_or(&Value::Null)).collect())
    }

    pub fn from_records<T>(records: &[T]) -> Result<Self>
    where
        T: TableRecord + Serialize,
    {
        let mut table = Table::new(T::COLUMNS.iter().copied());
        for record in records {
            match serde_json::to_value(record)? {
                Value::Object(map) => table.push_row(map.into_iter().collect())?,
                other => {
                    return Err(MapperError::data(format!("record serialized to a non-object value: {}", other)));
                }
            }
        }
        Ok(table)
    }

    /// Decode every row into `T`. Null cells are treated as absent fields.
    pub fn to_records<T>(&self) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let object: Map<String, Value> = row
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                serde_json::from_value(Value::Object(object))
                    .map_err(|e| MapperError::data(format!("row {} could not be decoded: {}", index, e)))
            })
            .collect()
    }

    /// Total number of rows across a set of tables.
    pub fn total_rows<'a, I>(tables: I) -> usize
    where
        I: IntoIterator<Item = &'a Table>,
    {
        tables.into_iter().map(Table::len).sum()
    }
}

/// Render a scalar cell as text. Null and empty strings yield `None`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
