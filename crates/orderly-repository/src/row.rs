//! Result rows returned by the query executor.

use orderly_core::{OrderlyError, OrderlyResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row: column name to value, in select-list order.
pub type Row = serde_json::Map<String, Value>;

/// Rows produced by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Returned rows.
    pub rows: Vec<Row>,
    /// Rows inserted, updated or deleted by the statement.
    pub rows_affected: u64,
}

impl RowSet {
    /// Creates a row set from rows; `rows_affected` is the row count.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self { rows, rows_affected }
    }

    /// Row set for a statement that returned no rows.
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    /// Number of returned rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Decodes every row into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> OrderlyResult<Vec<T>> {
        self.rows.iter().map(decode_row).collect()
    }

    /// Decodes the first row into `T`, if there is one.
    pub fn decode_first<T: DeserializeOwned>(&self) -> OrderlyResult<Option<T>> {
        self.rows.first().map(decode_row).transpose()
    }

    /// Decodes the first column of the first row, if there is one.
    pub fn scalar<T: DeserializeOwned>(&self) -> OrderlyResult<Option<T>> {
        self.rows
            .first()
            .and_then(|row| row.values().next())
            .map(|value| serde_json::from_value(value.clone()).map_err(OrderlyError::from))
            .transpose()
    }
}

fn decode_row<T: DeserializeOwned>(row: &Row) -> OrderlyResult<T> {
    serde_json::from_value(Value::Object(row.clone()))
        .map_err(|e| OrderlyError::Serialization(format!("Failed to decode row: {}", e)))
}

/// Builds a row from `(column, value)` pairs.
#[must_use]
pub fn row<I, K>(columns: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    columns.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
