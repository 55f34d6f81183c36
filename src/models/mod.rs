//! Data models for the database gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod reply;
pub mod request;
pub mod value;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use query::{Command, QueryResult, RowSet, status_message};
pub use reply::{Failure, Outcome, Reply};
pub use request::{
    Action, BeginDescriptor, InsertDescriptor, PreparedDescriptor, RawDescriptor, Request,
    SelectDescriptor, SessionHandle, TransactionDescriptor,
};
pub use value::Value;
