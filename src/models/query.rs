//! Query-related data models.
//!
//! This module defines the commands sent to a connection and the normalized
//! result shape that comes back from it.

use crate::models::Value;
use serde::{Deserialize, Serialize};

/// A statement ready to run on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// SQL text executed as-is.
    Raw { sql: String },
    /// SQL text with positional parameters bound by the driver.
    Prepared { sql: String, params: Vec<Value> },
}

impl Command {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw { sql: sql.into() }
    }

    pub fn prepared(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Prepared {
            sql: sql.into(),
            params,
        }
    }

    /// The SQL text of this command.
    pub fn sql(&self) -> &str {
        match self {
            Self::Raw { sql } | Self::Prepared { sql, .. } => sql,
        }
    }
}

/// Column names and cells of a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub column_names: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            column_names,
            data: Vec::new(),
        }
    }

    /// Get the number of rows.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalized outcome of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub status_message: String,
    pub rows_affected: u64,
    /// Present only when the statement produced a result set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<RowSet>,
}

impl QueryResult {
    /// Create a result for statements without a result set.
    pub fn write_result(status_message: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            status_message: status_message.into(),
            rows_affected,
            rows: None,
        }
    }

    /// Create a result carrying a result set.
    pub fn with_rows(status_message: impl Into<String>, rows_affected: u64, rows: RowSet) -> Self {
        Self {
            status_message: status_message.into(),
            rows_affected,
            rows: Some(rows),
        }
    }

    /// Get the number of rows in the result set.
    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map(RowSet::len).unwrap_or(0)
    }
}

/// Build the status message for a finished statement.
///
/// Drivers do not report command tags uniformly, so the tag is the leading
/// keyword of the statement followed by the row count.
pub fn status_message(sql: &str, count: u64) -> String {
    match sql.split_whitespace().next() {
        Some(word) => {
            let tag: String = word
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase();
            if tag.is_empty() {
                "OK".to_string()
            } else {
                format!("{} {}", tag, count)
            }
        }
        None => "OK".to_string(),
    }
}
