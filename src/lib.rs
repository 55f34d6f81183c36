//! Database access gateway.
//!
//! Executes structured requests (`select`, `insert`, `raw`, `prepared`,
//! batch `transaction`s and multi-request sessions) against PostgreSQL,
//! MySQL or SQLite over a bounded, fair connection pool.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod sql;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use gateway::Router;
