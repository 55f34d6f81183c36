//! Driver capability traits.
//!
//! The pool, sessions and router only ever talk to a backend through these two
//! traits. [`SqlxConnector`](crate::db::SqlxConnector) is the production
//! implementation; tests use an in-memory connector.

use crate::error::DbResult;
use crate::models::{Command, QueryResult, Value};
use std::future::Future;

/// Opens new backend connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Open one connection.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}

/// One open backend connection.
///
/// Methods take `&mut self`, so a connection runs at most one statement at a time.
pub trait Connection: Send + 'static {
    /// Run SQL text as-is, without parameters.
    fn execute_query(&mut self, sql: &str) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Run SQL text with positional parameters bound by the driver.
    fn execute_prepared(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Check that the connection is still usable.
    fn ping(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close the connection gracefully.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a [`Command`].
    fn execute(&mut self, command: &Command) -> impl Future<Output = DbResult<QueryResult>> + Send {
        async move {
            match command {
                Command::Raw { sql } => self.execute_query(sql).await,
                Command::Prepared { sql, params } => self.execute_prepared(sql, params).await,
            }
        }
    }

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send {
        async move { self.execute_query("BEGIN").await.map(|_| ()) }
    }

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send {
        async move { self.execute_query("COMMIT").await.map(|_| ()) }
    }

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send {
        async move { self.execute_query("ROLLBACK").await.map(|_| ()) }
    }
}
