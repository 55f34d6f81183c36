//! Shared setup for integration tests against temporary SQLite files.

#![allow(dead_code)]

use db_gateway::Router;
use db_gateway::config::PoolOptions;
use db_gateway::db::{ConnectionPool, PoolConfig, SessionConfig, SqlxConnector};
use db_gateway::models::{ConnectionConfig, Reply};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tempfile::TempDir;

/// A router over an existing database, e.g. one named by `TEST_MYSQL_URL`.
pub fn router_for(url: &str, max_connections: u32) -> Router<SqlxConnector> {
    let config = ConnectionConfig::new(
        url,
        PoolOptions {
            max_connections: Some(max_connections),
            ..PoolOptions::default()
        },
    )
    .unwrap();
    let connector = SqlxConnector::new(&config).unwrap();
    Router::new(
        ConnectionPool::new(connector, PoolConfig::from(&config)),
        SessionConfig::default(),
    )
}

/// Send a request to `router` and return its wire form.
pub async fn send_to(router: &Router<SqlxConnector>, request: JsonValue) -> JsonValue {
    serde_json::to_value(router.handle_json(request).await).unwrap()
}

/// A router over a fresh SQLite database. The file lives as long as this value.
pub struct TestDb {
    pub router: Router<SqlxConnector>,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new(max_connections: u32) -> Self {
        Self::with_session_timeout(max_connections, Duration::from_secs(60)).await
    }

    pub async fn with_session_timeout(max_connections: u32, timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("gateway.db").display());
        let config = ConnectionConfig::new(
            url,
            PoolOptions {
                max_connections: Some(max_connections),
                ..PoolOptions::default()
            },
        )
        .unwrap();

        let connector = SqlxConnector::new(&config).unwrap();
        let pool = ConnectionPool::new(connector, PoolConfig::from(&config));
        let router = Router::new(
            pool,
            SessionConfig {
                default_timeout: timeout,
                max_timeout: Duration::from_secs(300),
            },
        );

        let db = Self { router, _dir: dir };
        db.ok(json!({
            "action": "raw",
            "command": "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT)"
        }))
        .await;
        db
    }

    /// Send a request and return its wire form.
    pub async fn send(&self, request: JsonValue) -> JsonValue {
        let reply: Reply = self.router.handle_json(request).await;
        serde_json::to_value(reply).unwrap()
    }

    /// Send a request that must succeed.
    pub async fn ok(&self, request: JsonValue) -> JsonValue {
        let reply = self.send(request.clone()).await;
        assert_eq!(reply["status"], "ok", "{request} -> {reply}");
        reply
    }

    /// Send a request that must fail, returning its error code.
    pub async fn err(&self, request: JsonValue) -> String {
        let reply = self.send(request.clone()).await;
        assert_eq!(reply["status"], "error", "{request} -> {reply}");
        reply["code"].as_str().unwrap_or_default().to_string()
    }

    pub async fn user_count(&self) -> i64 {
        let reply = self
            .ok(json!({"action": "raw", "command": "SELECT COUNT(*) AS n FROM users"}))
            .await;
        reply["results"][0][0].as_i64().unwrap()
    }
}
