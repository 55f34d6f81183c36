//! Stdio JSON-lines transport.
//!
//! Every input line is one flat JSON request object, optionally carrying an
//! `id` that is echoed on its reply:
//!
//! ```text
//! {"id": 1, "action": "select", "table": "users"}
//! {"id": 1, "status": "ok", "message": "SELECT 2", "rows": 2, ...}
//! ```
//!
//! Lines without a `session` are handled on their own task, so replies may
//! come back out of order. Lines addressed to a session are queued on a lane
//! for that handle and run one at a time in arrival order. A lane stops
//! taking work once its session ends.

use crate::db::Connector;
use crate::error::{DbError, DbResult};
use crate::gateway::Router;
use crate::models::Reply;
use crate::transport::Transport;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Stdio transport implementation.
pub struct StdioTransport<C: Connector> {
    router: Arc<Router<C>>,
}

impl<C: Connector> StdioTransport<C> {
    pub fn new(router: Arc<Router<C>>) -> Self {
        Self { router }
    }
}

impl<C: Connector> Transport for StdioTransport<C> {
    async fn run(&self) -> DbResult<()> {
        info!("Starting gateway with stdio transport");

        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();

        let (result, shutdown_requested) = tokio::select! {
            result = serve(Arc::clone(&self.router), stdin, stdout) => {
                info!("Input closed");
                (result, false)
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                (Ok(()), true)
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Rolling back open sessions and closing the pool");
        self.router.close().await;

        if shutdown_requested {
            // A pending stdin read cannot be interrupted, so the runtime would
            // never finish shutting down on its own.
            info!("Exiting process");
            std::process::exit(0);
        }

        result
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Serve JSON-lines requests from `reader`, writing one reply line per request
/// to `writer`.
///
/// Returns once the input is exhausted and every in-flight request has
/// replied.
pub async fn serve<C, R, W>(router: Arc<Router<C>>, reader: R, writer: W) -> DbResult<()>
where
    C: Connector,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<JsonValue>();
    let writer_task = tokio::spawn(write_replies(writer, rx));

    let mut in_flight = JoinSet::new();
    let mut lanes: HashMap<String, mpsc::UnboundedSender<Job>> = HashMap::new();
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| DbError::internal(format!("Failed to read request: {}", e)))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let (id, request) = match parse_line(&line) {
            Ok(job) => job,
            Err(e) => {
                let reply: Reply = e.into();
                send_reply(&tx, render(None, &reply));
                continue;
            }
        };

        match session_of(&request) {
            Some(handle) => {
                let rejected = match lanes.get(&handle) {
                    Some(lane) => lane.send((id, request)).err().map(|e| e.0),
                    None => Some((id, request)),
                };
                if let Some(job) = rejected {
                    lanes.retain(|_, lane| !lane.is_closed());
                    let (lane_tx, lane_rx) = mpsc::unbounded_channel();
                    if lane_tx.send(job).is_ok() {
                        in_flight.spawn(run_lane(Arc::clone(&router), lane_rx, tx.clone()));
                        lanes.insert(handle, lane_tx);
                    }
                }
            }
            None => {
                let router = Arc::clone(&router);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let reply = router.handle_json(request).await;
                    send_reply(&tx, render(id, &reply));
                });
            }
        }

        while in_flight.try_join_next().is_some() {}
    }

    drop(lanes);
    while in_flight.join_next().await.is_some() {}
    drop(tx);

    writer_task
        .await
        .map_err(|e| DbError::internal(format!("Reply writer failed: {}", e)))?
        .map_err(|e| DbError::internal(format!("Failed to write reply: {}", e)))
}

async fn write_replies<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonValue>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        let mut line = reply.to_string();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// A request line split into its echoed `id` and the request body.
type Job = (Option<JsonValue>, JsonValue);

/// Run the queued requests of one session in order.
///
/// The queue is closed after a commit or rollback, or once the session is
/// reported gone. Requests already queued still get their replies.
async fn run_lane<C: Connector>(
    router: Arc<Router<C>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    replies: mpsc::UnboundedSender<JsonValue>,
) {
    while let Some((id, request)) = jobs.recv().await {
        let ends = ends_session(&request);
        let reply = router.handle_json(request).await;
        let gone = ends || reply.failure().and_then(|f| f.code.as_deref()) == Some("session");
        send_reply(&replies, render(id, &reply));
        if gone {
            jobs.close();
        }
    }
}

fn send_reply(replies: &mpsc::UnboundedSender<JsonValue>, reply: JsonValue) {
    if replies.send(reply).is_err() {
        debug!("Reply dropped; writer is gone");
    }
}

fn parse_line(line: &str) -> DbResult<Job> {
    match serde_json::from_str::<JsonValue>(line) {
        Ok(JsonValue::Object(mut object)) => {
            let id = object.remove("id");
            Ok((id, JsonValue::Object(object)))
        }
        Ok(_) => Err(DbError::invalid_input("Request must be a JSON object")),
        Err(e) => Err(DbError::invalid_input(format!("Malformed JSON: {}", e))),
    }
}

fn session_of(request: &JsonValue) -> Option<String> {
    request
        .get("session")
        .and_then(JsonValue::as_str)
        .map(str::to_owned)
}

fn ends_session(request: &JsonValue) -> bool {
    matches!(
        request.get("action").and_then(JsonValue::as_str),
        Some("commit" | "rollback")
    )
}

fn render(id: Option<JsonValue>, reply: &Reply) -> JsonValue {
    let mut value = serde_json::to_value(reply).unwrap_or_else(|e| {
        serde_json::json!({
            "status": "error",
            "message": format!("Failed to encode reply: {}", e),
            "code": "internal",
        })
    });
    if let (Some(id), JsonValue::Object(object)) = (id, &mut value) {
        object.insert("id".to_string(), id);
    }
    value
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::mock::MockConnector;
    use crate::db::{ConnectionPool, PoolConfig, SessionConfig};
    use crate::models::{Action, Request};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    fn router(connector: &MockConnector) -> Arc<Router<MockConnector>> {
        Arc::new(Router::new(
            ConnectionPool::new(connector.clone(), PoolConfig::new(2)),
            SessionConfig::default(),
        ))
    }

    async fn run_lines(router: Arc<Router<MockConnector>>, input: &str) -> Vec<JsonValue> {
        let (writer, mut output) = tokio::io::duplex(64 * 1024);
        serve(router, input.as_bytes(), writer).await.unwrap();

        let mut text = String::new();
        output.read_to_string(&mut text).await.unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_replies_echo_request_ids() {
        let connector = MockConnector::new();
        let input = concat!(
            r#"{"id": 1, "action": "select", "table": "users"}"#,
            "\n",
            "\n",
            r#"{"id": "b", "action": "raw", "command": "DELETE FROM users"}"#,
            "\n",
        );

        let replies = run_lines(router(&connector), input).await;
        assert_eq!(replies.len(), 2);

        let by_id: HashMap<String, &JsonValue> = replies
            .iter()
            .map(|reply| (reply["id"].to_string(), reply))
            .collect();
        assert_eq!(by_id["1"]["status"], "ok");
        assert_eq!(by_id["1"]["fields"], json!(["connection"]));
        assert_eq!(by_id["\"b\""]["message"], "DELETE 1");
    }

    #[tokio::test]
    async fn test_malformed_lines_get_error_replies() {
        let connector = MockConnector::new();
        let input = "not json\n[1, 2]\n{\"id\": 7, \"table\": \"t\"}\n";

        let replies = run_lines(router(&connector), input).await;
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|r| r["status"] == "error"));
        assert!(replies.iter().all(|r| r["code"] == "invalid_request"));

        let missing_action = replies.iter().find(|r| r["id"] == 7).unwrap();
        assert!(
            missing_action["message"]
                .as_str()
                .unwrap()
                .contains("action")
        );
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_requests_finish_before_serve_returns() {
        let connector = MockConnector::new();
        let router = router(&connector);
        let input: String = (0..20)
            .map(|i| format!("{{\"id\": {}, \"action\": \"raw\", \"command\": \"SELECT {}\"}}\n", i, i))
            .collect();

        let replies = run_lines(Arc::clone(&router), &input).await;
        assert_eq!(replies.len(), 20);
        assert_eq!(router.pool().leased(), 0);
        assert!(connector.opened() <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_lines_run_in_arrival_order() {
        let connector = MockConnector::new();
        let router = router(&connector);

        let begin = router.handle(Request::new(Action::Begin)).await;
        let handle = begin.outcome().unwrap().continuation.clone().unwrap();

        let mut input = String::new();
        for i in 0..200 {
            input.push_str(&format!(
                "{}\n",
                json!({
                    "id": i,
                    "session": handle.as_str(),
                    "action": "raw",
                    "command": format!("INSERT INTO t VALUES ({})", i),
                })
            ));
            if i % 20 == 0 {
                input.push_str(&format!("{}\n", json!({"action": "raw", "command": "SELECT 1"})));
            }
        }
        input.push_str(&format!(
            "{}\n",
            json!({"id": "end", "session": handle.as_str(), "action": "commit"})
        ));

        let replies = run_lines(Arc::clone(&router), &input).await;
        assert_eq!(replies.len(), 211);
        assert!(replies.iter().all(|r| r["status"] == "ok"));

        let session_statements: Vec<String> = connector
            .statements()
            .into_iter()
            .filter(|sql| sql != "SELECT 1")
            .collect();
        let mut expected = vec!["BEGIN".to_string()];
        expected.extend((0..200).map(|i| format!("INSERT INTO t VALUES ({})", i)));
        expected.push("COMMIT".to_string());
        assert_eq!(session_statements, expected);
        assert_eq!(router.pool().leased(), 0);
    }

    #[tokio::test]
    async fn test_lines_after_session_ends_get_session_errors() {
        let connector = MockConnector::new();
        let router = router(&connector);

        let begin = router.handle(Request::new(Action::Begin)).await;
        let handle = begin.outcome().unwrap().continuation.clone().unwrap();
        let line = |id: u32, action: &str| {
            format!(
                "{}\n",
                json!({"id": id, "session": handle.as_str(), "action": action, "command": "SELECT 1"})
            )
        };
        let input = [
            line(1, "raw"),
            line(2, "rollback"),
            line(3, "raw"),
            line(4, "raw"),
        ]
        .concat();

        let replies = run_lines(Arc::clone(&router), &input).await;
        assert_eq!(replies.len(), 4);

        let by_id: HashMap<u64, &JsonValue> = replies
            .iter()
            .map(|reply| (reply["id"].as_u64().unwrap(), reply))
            .collect();
        assert_eq!(by_id[&1]["status"], "ok");
        assert_eq!(by_id[&2]["message"], "ROLLBACK");
        assert_eq!(by_id[&3]["code"], "session");
        assert_eq!(by_id[&4]["code"], "session");
        assert_eq!(
            connector.statements(),
            vec!["BEGIN", "SELECT 1", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_unknown_session_lines_all_reply() {
        let connector = MockConnector::new();
        let input: String = (0..5)
            .map(|i| {
                format!(
                    "{}\n",
                    json!({"id": i, "session": "tx_missing", "action": "raw", "command": "SELECT 1"})
                )
            })
            .collect();

        let replies = run_lines(router(&connector), &input).await;
        assert_eq!(replies.len(), 5);
        assert!(replies.iter().all(|r| r["code"] == "session"));
        assert_eq!(connector.opened(), 0);
    }

    #[test]
    fn test_render_without_id() {
        let reply: Reply = DbError::pool_closed().into();
        let value = render(None, &reply);
        assert_eq!(value["status"], "error");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_transport_name() {
        let transport = StdioTransport::new(router(&MockConnector::new()));
        assert_eq!(transport.name(), "stdio");
    }
}
