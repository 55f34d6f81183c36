//! Request router.
//!
//! The router owns the connection pool and the session registry. Every request
//! resolves to one of three paths: a single statement on a pooled connection,
//! an atomic batch on a pooled connection, or a command addressed to an open
//! session. Validation happens before a connection is leased, so malformed
//! requests never touch the pool.

use crate::db::{Connector, ConnectionPool, SessionConfig, SessionRegistry};
use crate::error::{DbError, DbResult};
use crate::gateway::batch::{resolve_batch, run_batch};
use crate::gateway::statement::resolve_statement;
use crate::models::{Action, BeginDescriptor, Outcome, Reply, Request, SessionHandle};
use futures_util::FutureExt;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Dispatches requests to the pool, a batch or a session.
pub struct Router<C: Connector> {
    pool: ConnectionPool<C>,
    sessions: SessionRegistry<C::Connection>,
}

impl<C: Connector> Router<C> {
    pub fn new(pool: ConnectionPool<C>, session_config: SessionConfig) -> Self {
        Self {
            pool,
            sessions: SessionRegistry::new(session_config),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionRegistry<C::Connection> {
        &self.sessions
    }

    /// Handle one request. Failures become error replies.
    pub async fn handle(&self, request: Request) -> Reply {
        let action = request.action;
        let session = request.session.clone();
        let start = Instant::now();

        let result = self.dispatch(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                debug!(
                    action = %action,
                    session = session.as_ref().map(SessionHandle::as_str),
                    rows = outcome.rows_affected,
                    elapsed_ms,
                    "Request completed"
                );
                Reply::Ok(outcome)
            }
            Err(e) => {
                debug!(
                    action = %action,
                    session = session.as_ref().map(SessionHandle::as_str),
                    code = e.code(),
                    error = %e,
                    elapsed_ms,
                    "Request failed"
                );
                e.into()
            }
        }
    }

    /// Decode a JSON request and handle it.
    pub async fn handle_json(&self, value: JsonValue) -> Reply {
        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => DbError::invalid_input(e.to_string()).into(),
        }
    }

    /// Roll back open sessions, then close the pool.
    pub async fn close(&self) {
        let rolled_back = self.sessions.close_all().await;
        self.pool.close().await;
        info!(sessions = rolled_back, "Router closed");
    }

    async fn dispatch(&self, request: Request) -> DbResult<Outcome> {
        match &request.session {
            Some(handle) => self.dispatch_in_session(handle, &request).await,
            None => self.dispatch_pooled(&request).await,
        }
    }

    async fn dispatch_pooled(&self, request: &Request) -> DbResult<Outcome> {
        match request.action {
            Action::Select | Action::Insert | Action::Raw | Action::Prepared => {
                let command = resolve_statement(request)?;
                self.pool
                    .with_connection(move |lease| {
                        async move { lease.execute(&command).await.map(Outcome::from) }.boxed()
                    })
                    .await
            }
            Action::Transaction => {
                let commands = resolve_batch(request)?;
                let lease = self.pool.acquire().await?;
                run_batch(lease, &commands).await
            }
            Action::Begin => {
                let begin: BeginDescriptor = request.descriptor()?;
                let timeout = begin.timeout_secs.map(Duration::from_secs);
                self.sessions.begin(&self.pool, timeout).await
            }
            Action::Commit | Action::Rollback => Err(DbError::invalid_input(format!(
                "'{}' is only valid on an open session; pass its 'session' handle",
                request.action
            ))),
        }
    }

    async fn dispatch_in_session(
        &self,
        handle: &SessionHandle,
        request: &Request,
    ) -> DbResult<Outcome> {
        match request.action {
            Action::Select | Action::Insert | Action::Raw | Action::Prepared => {
                let command = resolve_statement(request)?;
                self.sessions.execute(handle, &command).await
            }
            Action::Commit => self.sessions.commit(handle).await,
            Action::Rollback => self.sessions.rollback(handle).await,
            Action::Begin | Action::Transaction => Err(DbError::invalid_input(format!(
                "'{}' cannot be used inside session {}",
                request.action, handle
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use crate::db::driver::mock::MockConnector;
    use crate::models::Value;
    use serde_json::json;

    fn router(connector: &MockConnector, max_size: usize) -> Router<MockConnector> {
        Router::new(
            ConnectionPool::new(connector.clone(), PoolConfig::new(max_size)),
            SessionConfig::default(),
        )
    }

    fn failure_code(reply: &Reply) -> Option<&str> {
        reply.failure().and_then(|f| f.code.as_deref())
    }

    #[tokio::test]
    async fn test_select_runs_on_pooled_connection() {
        let connector = MockConnector::new();
        let router = router(&connector, 2);

        let reply = router
            .handle(Request::new(Action::Select).with_param("table", "users"))
            .await;

        let outcome = reply.outcome().unwrap();
        assert_eq!(outcome.fields, Some(vec!["connection".to_string()]));
        assert_eq!(outcome.results, Some(vec![vec![Value::Int(1)]]));
        assert_eq!(connector.statements(), vec!["SELECT * FROM users"]);
        assert_eq!(router.pool().leased(), 0);
        assert_eq!(router.pool().idle(), 1);
    }

    #[tokio::test]
    async fn test_invalid_insert_never_touches_pool() {
        let connector = MockConnector::new();
        let router = router(&connector, 1);

        let reply = router
            .handle(
                Request::new(Action::Insert)
                    .with_param("table", "t")
                    .with_param("fields", json!(["a", "b"]))
                    .with_param("values", json!([[1, 2], [3]])),
            )
            .await;

        assert_eq!(failure_code(&reply), Some("invalid_request"));
        assert!(reply.failure().unwrap().message.contains("row 1"));
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let connector = MockConnector::new();
        let router = router(&connector, 1);

        let reply = router
            .handle_json(json!({"action": "drop_everything", "table": "t"}))
            .await;

        assert_eq!(failure_code(&reply), Some("invalid_request"));
        assert!(
            reply
                .failure()
                .unwrap()
                .message
                .contains("Unknown action 'drop_everything'")
        );
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_driver_error_releases_connection() {
        let connector = MockConnector::new();
        connector.fail_on("missing_table");
        let router = router(&connector, 1);

        let reply = router
            .handle(Request::new(Action::Raw).with_param("command", "SELECT * FROM missing_table"))
            .await;

        let failure = reply.failure().unwrap();
        assert_eq!(failure.code.as_deref(), Some("database"));
        assert!(failure.message.starts_with("mock failure"));
        assert_eq!(router.pool().leased(), 0);

        let reply = router
            .handle(Request::new(Action::Raw).with_param("command", "SELECT 1"))
            .await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn test_prepared_forwards_values() {
        let connector = MockConnector::new();
        let router = router(&connector, 1);

        let reply = router
            .handle_json(json!({
                "action": "prepared",
                "statement": "UPDATE t SET name = $1 WHERE id = $2",
                "values": ["O'Brien", 7]
            }))
            .await;

        assert!(reply.is_ok());
        assert_eq!(
            connector.statements(),
            vec!["UPDATE t SET name = $1 WHERE id = $2 [O'Brien, 7]"]
        );
    }

    #[tokio::test]
    async fn test_batch_failure_rolls_back() {
        let connector = MockConnector::new();
        connector.fail_on("SET age");
        let router = router(&connector, 1);

        let reply = router
            .handle_json(json!({
                "action": "transaction",
                "statements": [
                    {"action": "insert", "table": "t", "fields": ["name"], "values": [["X"]]},
                    {"action": "raw", "command": "UPDATE t SET age = 6"}
                ]
            }))
            .await;

        assert_eq!(failure_code(&reply), Some("database"));
        assert_eq!(
            connector.statements(),
            vec![
                "BEGIN",
                "INSERT INTO t (\"name\") VALUES ('X')",
                "UPDATE t SET age = 6",
                "ROLLBACK"
            ]
        );
        assert_eq!(router.pool().leased(), 0);
    }

    #[tokio::test]
    async fn test_batch_commit_failure_discards_connection() {
        let connector = MockConnector::new();
        connector.fail_on("COMMIT");
        let router = router(&connector, 1);

        let reply = router
            .handle_json(json!({
                "action": "transaction",
                "statements": [{"action": "raw", "command": "DELETE FROM t"}]
            }))
            .await;

        assert_eq!(failure_code(&reply), Some("database"));
        assert_eq!(router.pool().size(), 0);
        assert_eq!(router.pool().idle(), 0);
        assert_eq!(connector.closed(), 1);

        let reply = router
            .handle(Request::new(Action::Raw).with_param("command", "SELECT 1"))
            .await;
        assert!(reply.is_ok());
        assert_eq!(connector.opened(), 2);
    }

    #[tokio::test]
    async fn test_batch_success_reports_each_statement() {
        let connector = MockConnector::new();
        let router = router(&connector, 1);

        let reply = router
            .handle_json(json!({
                "action": "transaction",
                "statements": [
                    {"action": "raw", "command": "DELETE FROM t"},
                    {"action": "select", "table": "t"}
                ]
            }))
            .await;

        let outcome = reply.outcome().unwrap();
        assert_eq!(outcome.message, "COMMIT");
        let statements = outcome.statements.as_ref().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].fields.is_some());
    }

    #[tokio::test]
    async fn test_session_flow() {
        let connector = MockConnector::new();
        let router = router(&connector, 2);

        let begin = router.handle(Request::new(Action::Begin)).await;
        let handle = begin.outcome().unwrap().continuation.clone().unwrap();
        assert_eq!(router.pool().leased(), 1);

        let reply = router
            .handle(
                Request::new(Action::Raw)
                    .with_param("command", "INSERT INTO t VALUES (1)")
                    .in_session(handle.clone()),
            )
            .await;
        assert_eq!(reply.outcome().unwrap().continuation, Some(handle.clone()));

        let reply = router
            .handle(Request::new(Action::Rollback).in_session(handle.clone()))
            .await;
        assert_eq!(reply.outcome().unwrap().message, "ROLLBACK");
        assert_eq!(router.pool().leased(), 0);

        assert_eq!(
            connector.statements(),
            vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
        );

        let reply = router
            .handle(Request::new(Action::Commit).in_session(handle))
            .await;
        assert_eq!(failure_code(&reply), Some("session"));
    }

    #[tokio::test]
    async fn test_nested_begin_rejected_in_session() {
        let connector = MockConnector::new();
        let router = router(&connector, 2);

        let begin = router.handle(Request::new(Action::Begin)).await;
        let handle = begin.outcome().unwrap().continuation.clone().unwrap();

        for action in [Action::Begin, Action::Transaction] {
            let reply = router
                .handle(Request::new(action).in_session(handle.clone()))
                .await;
            assert_eq!(failure_code(&reply), Some("invalid_request"));
        }
        assert_eq!(router.sessions().count().await, 1);
    }

    #[tokio::test]
    async fn test_commit_without_session_rejected() {
        let connector = MockConnector::new();
        let router = router(&connector, 1);

        let reply = router.handle(Request::new(Action::Commit)).await;
        assert_eq!(failure_code(&reply), Some("invalid_request"));
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_close_rolls_back_sessions_and_rejects_requests() {
        let connector = MockConnector::new();
        let router = router(&connector, 2);

        router.handle(Request::new(Action::Begin)).await;
        router.close().await;

        assert_eq!(router.sessions().count().await, 0);
        assert_eq!(connector.statements(), vec!["BEGIN", "ROLLBACK"]);

        let reply = router
            .handle(Request::new(Action::Raw).with_param("command", "SELECT 1"))
            .await;
        assert_eq!(failure_code(&reply), Some("pool_closed"));
    }
}
