//! Error types for the database gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every failure a request can hit is normalized into [`DbError`] before it leaves the
//! core, and from there into an error [`Reply`](crate::models::Reply). Backend-specific
//! error types never cross that boundary; only their message text and SQLSTATE do.

use crate::models::{Failure, Reply};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid request: {message}")]
    InvalidInput { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Session error: {message} (session: {session})")]
    Session { message: String, session: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid input (request validation) error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_closed() -> Self {
        Self::PoolClosed
    }

    /// Create a session protocol error.
    pub fn session(message: impl Into<String>, session: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
            session: session.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Stable machine-readable code reported in error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_request",
            Self::Database { .. } => "database",
            Self::Connection { .. } => "connection",
            Self::PoolClosed => "pool_closed",
            Self::Session { .. } => "session",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }

    /// Message text sent to clients.
    ///
    /// Database errors carry the backend's own message verbatim; everything else
    /// uses the display form.
    pub fn client_message(&self) -> String {
        match self {
            Self::Database { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 0),
            sqlx::Error::PoolClosed => DbError::pool_closed(),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build the details object attached to error replies.
fn failure_details(err: &DbError) -> Option<serde_json::Value> {
    match err {
        DbError::Database {
            sql_state,
            suggestion,
            ..
        } => Some(serde_json::json!({
            "sql_state": sql_state,
            "suggestion": suggestion,
        })),
        DbError::Session { session, .. } => Some(serde_json::json!({ "session": session })),
        other => other
            .suggestion()
            .map(|s| serde_json::json!({ "suggestion": s })),
    }
}

/// Convert DbError into an error reply.
impl From<DbError> for Reply {
    fn from(err: DbError) -> Self {
        Reply::Error(Failure {
            message: err.client_message(),
            code: Some(err.code().to_string()),
            details: failure_details(&err),
        })
    }
}
