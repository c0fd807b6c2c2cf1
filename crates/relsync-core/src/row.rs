//! Raw row representation at the storage boundary.

use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so all rows from the same query share the same column
/// information.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Check if a column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from the storage collaborator.
///
/// Rows provide both index-based and name-based access to column values.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    ///
    /// For multiple rows from the same result set, prefer `with_columns` to
    /// share the column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of columns in this row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name. `None` if the column does not exist.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a value by column name, failing if the column is missing.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.value(name)
            .ok_or_else(|| Error::Custom(format!("column '{}' not present in row", name)))
    }

    /// Decode a non-null integer column.
    pub fn named_i64(&self, name: &str) -> Result<i64> {
        let value = self.require(name)?;
        value
            .as_i64()
            .ok_or_else(|| Error::type_mismatch("BIGINT", value.type_name(), name))
    }

    /// Decode a nullable integer column. Missing columns decode as `None`.
    pub fn named_opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::type_mismatch("BIGINT", value.type_name(), name)),
        }
    }

    /// Decode a non-null text column.
    pub fn named_text(&self, name: &str) -> Result<String> {
        let value = self.require(name)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::type_mismatch("TEXT", value.type_name(), name))
    }

    /// Decode a nullable text column. Missing columns decode as `None`.
    pub fn named_opt_text(&self, name: &str) -> Result<Option<String>> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| Error::type_mismatch("TEXT", value.type_name(), name)),
        }
    }

    /// Decode a non-null boolean column.
    pub fn named_bool(&self, name: &str) -> Result<bool> {
        let value = self.require(name)?;
        value
            .as_bool()
            .ok_or_else(|| Error::type_mismatch("BOOLEAN", value.type_name(), name))
    }

    /// Decode a nullable double column. Missing columns decode as `None`.
    pub fn named_opt_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| Error::type_mismatch("DOUBLE", value.type_name(), name)),
        }
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "age".to_string()],
            vec![
                Value::BigInt(1),
                Value::Text("Ada".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_named_access() {
        let row = sample_row();
        assert_eq!(row.named_i64("id").unwrap(), 1);
        assert_eq!(row.named_text("name").unwrap(), "Ada");
        assert_eq!(row.named_opt_i64("age").unwrap(), None);
    }

    #[test]
    fn test_missing_column_is_error_for_require() {
        let row = sample_row();
        assert!(row.require("missing").is_err());
        // but optional decodes treat it as NULL
        assert_eq!(row.named_opt_text("missing").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_reports_column() {
        let row = sample_row();
        let err = row.named_i64("name").unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_shared_column_info() {
        let row = sample_row();
        let columns = row.column_info();
        let second = Row::with_columns(
            columns,
            vec![
                Value::BigInt(2),
                Value::Text("Grace".to_string()),
                Value::Int(36),
            ],
        );
        assert_eq!(second.named_text("name").unwrap(), "Grace");
        assert_eq!(second.named_opt_i64("age").unwrap(), Some(36));
    }
}
