//! Transaction sessions spanning several requests.
//!
//! A session owns one pooled connection from `begin` until `commit`,
//! `rollback` or its idle watchdog fires. The watchdog is re-armed after every
//! statement, so the timeout measures inactivity rather than total duration.

use crate::db::driver::{Connection, Connector};
use crate::db::pool::{ConnectionLease, ConnectionPool};
use crate::error::{DbError, DbResult};
use crate::models::{Command, Outcome, SessionHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Idle timeouts applied to sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_timeout: Duration,
    /// Upper bound for per-session overrides
    pub max_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(crate::config::DEFAULT_TRANSACTION_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(crate::config::DEFAULT_MAX_TRANSACTION_TIMEOUT_SECS),
        }
    }
}

enum SessionState<T: Connection> {
    Active {
        lease: ConnectionLease<T>,
        /// Bumped on every statement; a watchdog only fires for the epoch it was armed with
        epoch: u64,
    },
    Closed,
}

struct Session<T: Connection> {
    handle: SessionHandle,
    timeout: Duration,
    started_at: DateTime<Utc>,
    statements: AtomicU64,
    last_activity: Mutex<Instant>,
    state: tokio::sync::Mutex<SessionState<T>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Connection> Session<T> {
    fn touch(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_time(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn replace_watchdog(&self, task: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut slot = self.watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, task)
    }

    fn cancel_watchdog(&self) {
        if let Some(task) = self.replace_watchdog(None) {
            task.abort();
        }
    }
}

/// Metadata about an active session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub handle: SessionHandle,
    pub started_at: DateTime<Utc>,
    /// Seconds since the last statement (or `begin`)
    pub idle_secs: u64,
    pub timeout_secs: u64,
    pub statements: u64,
}

struct RegistryInner<T: Connection> {
    sessions: RwLock<HashMap<SessionHandle, Arc<Session<T>>>>,
    config: SessionConfig,
    forced_rollbacks: AtomicU64,
}

/// Registry of active transaction sessions.
pub struct SessionRegistry<T: Connection> {
    inner: Arc<RegistryInner<T>>,
}

impl<T: Connection> Clone for SessionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Connection> SessionRegistry<T> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                config,
                forced_rollbacks: AtomicU64::new(0),
            }),
        }
    }

    /// Lease a connection, send `BEGIN` and register a new session.
    ///
    /// `timeout` overrides the default idle timeout and is clamped to the
    /// configured maximum.
    pub async fn begin<C>(
        &self,
        pool: &ConnectionPool<C>,
        timeout: Option<Duration>,
    ) -> DbResult<Outcome>
    where
        C: Connector<Connection = T>,
    {
        let timeout = self.resolve_timeout(timeout);

        let mut lease = pool.acquire().await?;
        if let Err(e) = lease.begin().await {
            lease.discard().await;
            return Err(e);
        }

        let handle = SessionHandle::generate();
        let session = Arc::new(Session {
            handle: handle.clone(),
            timeout,
            started_at: Utc::now(),
            statements: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            state: tokio::sync::Mutex::new(SessionState::Active { lease, epoch: 0 }),
            watchdog: Mutex::new(None),
        });

        self.inner
            .sessions
            .write()
            .await
            .insert(handle.clone(), Arc::clone(&session));
        arm_watchdog(&self.inner, &session, 0);

        info!(
            session = %handle,
            timeout_ms = timeout.as_millis() as u64,
            "Session started"
        );

        Ok(Outcome::message("BEGIN").with_continuation(handle))
    }

    /// Run one statement on the session's own connection.
    ///
    /// A failing statement leaves the session active so the client can still
    /// roll back.
    pub async fn execute(&self, handle: &SessionHandle, command: &Command) -> DbResult<Outcome> {
        let session = self.get(handle).await?;
        let mut state = session.state.lock().await;
        let SessionState::Active { lease, epoch } = &mut *state else {
            return Err(DbError::session("Session is closed", handle.as_str()));
        };

        let result = lease.execute(command).await;

        *epoch += 1;
        session.touch();
        arm_watchdog(&self.inner, &session, *epoch);
        drop(state);

        let result = result?;
        debug!(
            session = %handle,
            rows = result.rows_affected,
            "Session statement executed"
        );
        Ok(Outcome::from(result).with_continuation(handle.clone()))
    }

    pub async fn commit(&self, handle: &SessionHandle) -> DbResult<Outcome> {
        self.finish(handle, true).await
    }

    pub async fn rollback(&self, handle: &SessionHandle) -> DbResult<Outcome> {
        self.finish(handle, false).await
    }

    async fn finish(&self, handle: &SessionHandle, commit: bool) -> DbResult<Outcome> {
        let session = self.get(handle).await?;
        let mut state = session.state.lock().await;
        let SessionState::Active { mut lease, .. } =
            std::mem::replace(&mut *state, SessionState::Closed)
        else {
            return Err(DbError::session("Session is closed", handle.as_str()));
        };
        session.cancel_watchdog();
        self.inner.sessions.write().await.remove(handle);
        drop(state);

        let (result, verb) = if commit {
            (lease.commit().await, "COMMIT")
        } else {
            (lease.rollback().await, "ROLLBACK")
        };

        match result {
            Ok(()) => {
                lease.release().await;
                info!(
                    session = %handle,
                    statements = session.statements.load(Ordering::SeqCst),
                    "Session finished with {}",
                    verb
                );
                Ok(Outcome::message(verb))
            }
            Err(e) => {
                lease.discard().await;
                warn!(session = %handle, error = %e, "Session {} failed", verb);
                Err(e)
            }
        }
    }

    /// Roll back every active session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Arc<Session<T>>> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        let mut closed = 0;
        for session in sessions {
            let mut state = session.state.lock().await;
            let SessionState::Active { mut lease, .. } =
                std::mem::replace(&mut *state, SessionState::Closed)
            else {
                continue;
            };
            session.cancel_watchdog();
            drop(state);

            match lease.rollback().await {
                Ok(()) => lease.release().await,
                Err(e) => {
                    warn!(session = %session.handle, error = %e, "Rollback on shutdown failed");
                    lease.discard().await;
                }
            }
            closed += 1;
        }

        if closed > 0 {
            info!(count = closed, "Rolled back active sessions");
        }
        closed
    }

    /// List active sessions.
    pub async fn list_all(&self) -> Vec<SessionMetadata> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .values()
            .map(|session| SessionMetadata {
                handle: session.handle.clone(),
                started_at: session.started_at,
                idle_secs: session.idle_time().as_secs(),
                timeout_secs: session.timeout.as_secs(),
                statements: session.statements.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Number of sessions rolled back by their idle watchdog.
    pub fn forced_rollbacks(&self) -> u64 {
        self.inner.forced_rollbacks.load(Ordering::SeqCst)
    }

    fn resolve_timeout(&self, requested: Option<Duration>) -> Duration {
        let config = &self.inner.config;
        requested
            .filter(|t| !t.is_zero())
            .map(|t| t.min(config.max_timeout))
            .unwrap_or(config.default_timeout)
    }

    /// Look up a session. The map lock is released before the caller locks its state.
    async fn get(&self, handle: &SessionHandle) -> DbResult<Arc<Session<T>>> {
        self.inner
            .sessions
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| DbError::session("Session not found", handle.as_str()))
    }
}

impl<T: Connection> RegistryInner<T> {
    /// Watchdog expiry: roll back if the session saw no statement since `epoch`.
    async fn expire(&self, session: &Arc<Session<T>>, epoch: u64) {
        let mut state = session.state.lock().await;
        match &*state {
            SessionState::Active { epoch: current, .. } if *current == epoch => {}
            _ => return,
        }
        let SessionState::Active { mut lease, .. } =
            std::mem::replace(&mut *state, SessionState::Closed)
        else {
            return;
        };
        // Detach this task's own handle; aborting it here would cancel the rollback.
        drop(session.replace_watchdog(None));
        self.sessions.write().await.remove(&session.handle);
        drop(state);

        match lease.rollback().await {
            Ok(()) => lease.release().await,
            Err(e) => {
                debug!(session = %session.handle, error = %e, "Forced rollback failed");
                lease.discard().await;
            }
        }
        self.forced_rollbacks.fetch_add(1, Ordering::SeqCst);

        warn!(
            session = %session.handle,
            timeout_ms = session.timeout.as_millis() as u64,
            statements = session.statements.load(Ordering::SeqCst),
            "Session idle timeout exceeded; rolled back"
        );
    }
}

/// Start (or restart) the idle timer of `session`.
///
/// The task holds only weak references, so a dropped registry or a finished
/// session never keeps a timer alive.
fn arm_watchdog<T: Connection>(
    inner: &Arc<RegistryInner<T>>,
    session: &Arc<Session<T>>,
    epoch: u64,
) {
    let weak_inner: Weak<RegistryInner<T>> = Arc::downgrade(inner);
    let weak_session: Weak<Session<T>> = Arc::downgrade(session);
    let timeout = session.timeout;

    let task = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let (Some(inner), Some(session)) = (weak_inner.upgrade(), weak_session.upgrade()) else {
            return;
        };
        inner.expire(&session, epoch).await;
    });

    if let Some(previous) = session.replace_watchdog(Some(task)) {
        previous.abort();
    }
}
