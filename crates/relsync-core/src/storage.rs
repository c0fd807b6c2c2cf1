//! Storage collaborator boundary.
//!
//! The engine never renders SQL. It hands the storage collaborator structured
//! descriptions of reads and writes (tables, columns, values), and the
//! collaborator is responsible for dialect rendering and execution. All calls
//! block: the engine is single-threaded and synchronous, and the whole flush
//! is expected to run inside one transaction managed by the caller.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::collections::HashMap;

/// Blocking row-storage collaborator.
pub trait Storage {
    /// Fetch the row identified by `key`, if present.
    fn fetch_by_key(&mut self, table: &str, key_column: &str, key: &Value) -> Result<Option<Row>>;

    /// Fetch every row matching all `(column, value)` filters.
    fn fetch_matching(&mut self, table: &str, filters: &[(&str, Value)]) -> Result<Vec<Row>>;

    /// Insert a row. `key_column` names the primary key column within
    /// `columns`; when its value is NULL the storage assigns a key and
    /// returns it.
    fn insert(
        &mut self,
        table: &str,
        key_column: &str,
        columns: &[&'static str],
        values: &[Value],
    ) -> Result<Option<Value>>;

    /// Update the row identified by `key` with the given assignments.
    /// Returns the number of affected rows.
    fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &Value,
        assignments: &[(&'static str, Value)],
    ) -> Result<u64>;

    /// Delete the row identified by `key`. Returns the number of affected
    /// rows.
    fn delete(&mut self, table: &str, key_column: &str, key: &Value) -> Result<u64>;
}

/// In-memory reference backend.
///
/// Tables are created on first touch. Integer keys are generated per table
/// when an inserted row leaves its key column NULL. Intended for tests and
/// for composing the engine without a database.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: HashMap<String, MemoryTable>,
}

#[derive(Debug, Default)]
struct MemoryTable {
    /// Rows as ordered `(column, value)` pairs.
    rows: Vec<Vec<(String, Value)>>,
    next_key: i64,
}

fn stored_value<'a>(row: &'a [(String, Value)], column: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value)
}

fn to_row(stored: &[(String, Value)]) -> Row {
    let (columns, values): (Vec<String>, Vec<Value>) = stored.iter().cloned().unzip();
    Row::new(columns, values)
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Snapshot of all rows in `table`, for assertions.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|t| t.rows.iter().map(|r| to_row(r)).collect())
            .unwrap_or_default()
    }
}

impl Storage for MemoryStorage {
    fn fetch_by_key(&mut self, table: &str, key_column: &str, key: &Value) -> Result<Option<Row>> {
        let Some(data) = self.tables.get(table) else {
            return Ok(None);
        };
        Ok(data
            .rows
            .iter()
            .find(|row| stored_value(row, key_column) == Some(key))
            .map(|row| to_row(row)))
    }

    fn fetch_matching(&mut self, table: &str, filters: &[(&str, Value)]) -> Result<Vec<Row>> {
        let Some(data) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(data
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(column, value)| stored_value(row, column) == Some(value))
            })
            .map(|row| to_row(row))
            .collect())
    }

    fn insert(
        &mut self,
        table: &str,
        key_column: &str,
        columns: &[&'static str],
        values: &[Value],
    ) -> Result<Option<Value>> {
        if columns.len() != values.len() {
            return Err(Error::storage(format!(
                "column/value arity mismatch inserting into '{}': {} columns, {} values",
                table,
                columns.len(),
                values.len()
            )));
        }

        let mut stored: Vec<(String, Value)> = columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect();

        let data = self.tables.entry(table.to_string()).or_default();

        // Explicitly provided integer keys advance the generator so generated
        // keys never collide with them.
        if let Some(n) = stored_value(&stored, key_column).and_then(Value::as_i64) {
            data.next_key = data.next_key.max(n);
        }

        let mut generated = None;
        let needs_key = stored_value(&stored, key_column).is_none_or(Value::is_null);
        if needs_key {
            data.next_key += 1;
            let key = Value::BigInt(data.next_key);
            match stored.iter_mut().find(|(name, _)| name == key_column) {
                Some(slot) => slot.1 = key.clone(),
                None => stored.push((key_column.to_string(), key.clone())),
            }
            generated = Some(key);
        }

        tracing::trace!(table, generated = generated.is_some(), "stored row");
        data.rows.push(stored);
        Ok(generated)
    }

    fn update(
        &mut self,
        table: &str,
        key_column: &str,
        key: &Value,
        assignments: &[(&'static str, Value)],
    ) -> Result<u64> {
        let Some(data) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in &mut data.rows {
            if stored_value(row, key_column) != Some(key) {
                continue;
            }
            for (column, value) in assignments {
                match row.iter_mut().find(|(name, _)| name == column) {
                    Some(slot) => slot.1 = value.clone(),
                    None => row.push(((*column).to_string(), value.clone())),
                }
            }
            affected += 1;
        }
        Ok(affected)
    }

    fn delete(&mut self, table: &str, key_column: &str, key: &Value) -> Result<u64> {
        let Some(data) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = data.rows.len();
        data.rows
            .retain(|row| stored_value(row, key_column) != Some(key));
        Ok((before - data.rows.len()) as u64)
    }
}
