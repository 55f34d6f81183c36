//! Reply data models.
//!
//! Wire form: `{"status": "ok", "rows": 1, "message": "INSERT 1", ...}` or
//! `{"status": "error", "message": "..."}`.

use crate::models::{QueryResult, SessionHandle, Value};
use serde::{Deserialize, Serialize};

/// Reply produced for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok(Outcome),
    Error(Failure),
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Get the success payload, if any.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::Ok(outcome) => Some(outcome),
            Self::Error(_) => None,
        }
    }

    /// Get the failure payload, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Ok(_) => None,
            Self::Error(failure) => Some(failure),
        }
    }
}

impl From<Outcome> for Reply {
    fn from(outcome: Outcome) -> Self {
        Reply::Ok(outcome)
    }
}

/// Success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub message: String,
    #[serde(rename = "rows")]
    pub rows_affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Vec<Value>>>,
    /// Handle to address further commands to the same session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<SessionHandle>,
    /// Per-statement replies of a batch transaction, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<Outcome>>,
}

impl Outcome {
    /// Create an outcome carrying only a status message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach a session continuation handle.
    pub fn with_continuation(mut self, handle: SessionHandle) -> Self {
        self.continuation = Some(handle);
        self
    }
}

impl From<QueryResult> for Outcome {
    fn from(result: QueryResult) -> Self {
        let (fields, results) = match result.rows {
            Some(rows) => (Some(rows.column_names), Some(rows.data)),
            None => (None, None),
        };
        Self {
            message: result.status_message,
            rows_affected: result.rows_affected,
            fields,
            results,
            continuation: None,
            statements: None,
        }
    }
}

/// Failure payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
