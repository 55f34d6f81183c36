//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Driver capability traits and the sqlx-backed driver
//! - The bounded connection pool
//! - Transaction sessions with idle watchdogs
//! - Row normalization and parameter binding
//! - Database dispatch macros for reducing code duplication

pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod session;
pub mod types;

pub use driver::{Connection, Connector};
pub use executor::{DbConnection, SqlxConnector};
pub use pool::{ConnectionLease, ConnectionPool, PoolConfig};
pub use session::{SessionConfig, SessionMetadata, SessionRegistry};
