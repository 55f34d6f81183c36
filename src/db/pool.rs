//! Bounded connection pool.
//!
//! Leasing is gated by a fair `tokio` semaphore with one permit per
//! connection, so waiters are served first-come-first-served and acquisition
//! never times out on its own. Idle connections are kept in a plain list and
//! reused before new ones are opened.

use crate::db::driver::{Connection, Connector};
use crate::error::{DbError, DbResult};
use crate::models::{Command, ConnectionConfig, QueryResult};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Pool sizing and connection checks.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub connect_timeout: Duration,
    pub test_before_acquire: bool,
}

impl PoolConfig {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: crate::config::DEFAULT_MAX_CONNECTIONS as usize,
            connect_timeout: Duration::from_secs(crate::config::DEFAULT_CONNECT_TIMEOUT_SECS),
            test_before_acquire: true,
        }
    }
}

impl From<&ConnectionConfig> for PoolConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_size: config.max_pool_size() as usize,
            connect_timeout: Duration::from_secs(config.pool_options.connect_timeout_or_default()),
            test_before_acquire: config.pool_options.test_before_acquire_or_default(),
        }
    }
}

/// Bookkeeping shared between the pool and its outstanding leases.
struct PoolShared<T> {
    idle: Mutex<Vec<T>>,
    /// Open connections, idle or leased
    size: AtomicUsize,
    closed: AtomicBool,
}

impl<T> PoolShared<T> {
    /// Put `conn` back in the idle list, or hand it back if the pool is closed.
    ///
    /// The flag is read under the idle lock; `close` sets it before draining
    /// under the same lock, so a returned connection is never stranded.
    fn return_idle(&self, conn: T) -> Option<T> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return Some(conn);
        }
        idle.push(conn);
        None
    }

    fn pop_idle(&self) -> Option<T> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn drain_idle(&self) -> Vec<T> {
        std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A bounded pool of backend connections.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    shared: Arc<PoolShared<C::Connection>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool. Connections are opened lazily on first demand.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            connector,
            config: PoolConfig { max_size, ..config },
            semaphore: Arc::new(Semaphore::new(max_size)),
            shared: Arc::new(PoolShared {
                idle: Mutex::new(Vec::with_capacity(max_size)),
                size: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Lease a connection, waiting in line while every connection is leased.
    pub async fn acquire(&self) -> DbResult<ConnectionLease<C::Connection>> {
        if self.is_closed() {
            return Err(DbError::pool_closed());
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DbError::pool_closed())?;

        while let Some(mut conn) = self.shared.pop_idle() {
            if !self.config.test_before_acquire {
                return Ok(ConnectionLease::new(conn, permit, &self.shared));
            }
            // Counts the connection out of `size` unless the ping succeeds,
            // including when this future is dropped mid-ping.
            let mut checkout = SizeGuard::new(&self.shared);
            match conn.ping().await {
                Ok(()) => {
                    checkout.disarm();
                    return Ok(ConnectionLease::new(conn, permit, &self.shared));
                }
                Err(e) => {
                    debug!(error = %e, "Discarding idle connection that failed ping");
                    drop(checkout);
                    let _ = conn.close().await;
                }
            }
        }

        // The permit is dropped on every error path below, freeing the slot.
        let conn = self.open().await?;
        Ok(ConnectionLease::new(conn, permit, &self.shared))
    }

    async fn open(&self) -> DbResult<C::Connection> {
        let timeout = self.config.connect_timeout;
        let conn = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(DbError::timeout("connect", timeout.as_secs())),
        };
        let size = self.shared.size.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(size, max_size = self.config.max_size, "Opened connection");
        Ok(conn)
    }

    /// Return a lease to the pool.
    pub async fn release(&self, lease: ConnectionLease<C::Connection>) {
        lease.release().await;
    }

    /// Lease a connection for the duration of `body`.
    ///
    /// The lease is returned on every exit path, including when `body` fails.
    pub async fn with_connection<R, F>(&self, body: F) -> DbResult<R>
    where
        F: for<'c> FnOnce(&'c mut ConnectionLease<C::Connection>) -> BoxFuture<'c, DbResult<R>>,
    {
        let mut lease = self.acquire().await?;
        let result = body(&mut lease).await;
        lease.release().await;
        result
    }

    /// Close the pool.
    ///
    /// Pending and future acquisitions fail. Idle connections are closed now;
    /// leased connections are closed when their lease is released.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();

        let idle = self.shared.drain_idle();
        let count = idle.len();
        for conn in idle {
            self.shared.size.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing idle connection");
            }
        }
        info!(closed = count, leased = self.leased(), "Connection pool closed");
    }

    /// Number of open connections, idle or leased.
    pub fn size(&self) -> usize {
        self.shared.size.load(Ordering::SeqCst)
    }

    pub fn idle(&self) -> usize {
        self.shared.idle_len()
    }

    /// Number of outstanding leases.
    pub fn leased(&self) -> usize {
        self.config.max_size - self.semaphore.available_permits()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Decrements the pool size on drop unless disarmed.
struct SizeGuard<'a, T> {
    shared: &'a PoolShared<T>,
    armed: bool,
}

impl<'a, T> SizeGuard<'a, T> {
    fn new(shared: &'a PoolShared<T>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T> Drop for SizeGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.size.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Exclusive use of one pooled connection.
///
/// Hand it back with [`release`](Self::release) or throw the connection away
/// with [`discard`](Self::discard). A lease dropped without either still frees
/// its slot, but its connection is closed rather than reused.
pub struct ConnectionLease<T: Connection> {
    conn: Option<T>,
    shared: Arc<PoolShared<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Connection> ConnectionLease<T> {
    fn new(conn: T, permit: OwnedSemaphorePermit, shared: &Arc<PoolShared<T>>) -> Self {
        Self {
            conn: Some(conn),
            shared: Arc::clone(shared),
            _permit: permit,
        }
    }

    /// Access the underlying connection.
    pub fn connection(&mut self) -> DbResult<&mut T> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection lease already released"))
    }

    pub async fn execute(&mut self, command: &Command) -> DbResult<QueryResult> {
        self.connection()?.execute(command).await
    }

    pub async fn begin(&mut self) -> DbResult<()> {
        self.connection()?.begin().await
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        self.connection()?.commit().await
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        self.connection()?.rollback().await
    }

    /// Return the connection to the pool, or close it if the pool was closed.
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let Some(conn) = self.shared.return_idle(conn) {
            self.shared.size.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing connection after pool close");
            }
        }
        // The permit is released when `self` drops here, after the
        // connection is back in the idle list.
    }

    /// Close the connection instead of returning it.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.size.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing discarded connection");
            }
        }
    }
}

impl<T: Connection> fmt::Debug for ConnectionLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("held", &self.conn.is_some())
            .field("pool_closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T: Connection> Drop for ConnectionLease<T> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.shared.size.fetch_sub(1, Ordering::SeqCst);
        warn!("Connection lease dropped without release; discarding connection");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::mock::MockConnector;
    use futures_util::FutureExt;
    use tokio_test::{assert_pending, assert_ready};

    fn pool(max_size: usize) -> (ConnectionPool<MockConnector>, MockConnector) {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(connector.clone(), PoolConfig::new(max_size));
        (pool, connector)
    }

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let (pool, connector) = pool(2);

        let lease = pool.acquire().await.unwrap();
        pool.release(lease).await;
        let lease = pool.acquire().await.unwrap();
        pool.release(lease).await;

        assert_eq!(connector.opened(), 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test]
    async fn test_acquire_beyond_max_waits_for_release() {
        let (pool, connector) = pool(2);

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.leased(), 2);

        let mut third = tokio_test::task::spawn(pool.acquire());
        assert_pending!(third.poll());

        first.release().await;
        assert!(third.is_woken());
        let lease = assert_ready!(third.poll()).unwrap();

        assert_eq!(pool.leased(), 2);
        assert_eq!(connector.opened(), 2);
        drop(lease);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let (pool, _connector) = pool(1);

        let held = pool.acquire().await.unwrap();
        let mut a = tokio_test::task::spawn(pool.acquire());
        let mut b = tokio_test::task::spawn(pool.acquire());
        assert_pending!(a.poll());
        assert_pending!(b.poll());

        held.release().await;
        let lease_a = assert_ready!(a.poll()).unwrap();
        assert_pending!(b.poll());

        lease_a.release().await;
        assert!(assert_ready!(b.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_with_connection_releases_on_error() {
        let (pool, connector) = pool(2);
        connector.fail_on("boom");

        let before = pool.leased();
        let result: DbResult<QueryResult> = pool
            .with_connection(|lease| {
                async move { lease.execute(&Command::raw("boom")).await }.boxed()
            })
            .await;

        assert!(result.is_err());
        assert_eq!(pool.leased(), before);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_with_connection_returns_body_result() {
        let (pool, _connector) = pool(1);
        let result = pool
            .with_connection(|lease| {
                async move { lease.execute(&Command::raw("SELECT 1")).await }.boxed()
            })
            .await
            .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_surfaced_and_frees_slot() {
        let (pool, connector) = pool(1);
        connector.set_fail_connect(true);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert_eq!(pool.leased(), 0);
        assert_eq!(pool.size(), 0);

        connector.set_fail_connect(false);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_ping_replaces_idle_connection() {
        let (pool, connector) = pool(1);

        let lease = pool.acquire().await.unwrap();
        lease.release().await;
        connector.set_fail_ping(true);

        let mut lease = pool.acquire().await.unwrap();
        assert_eq!(lease.connection().unwrap().id, 2);
        assert_eq!(connector.closed(), 1);
        assert_eq!(pool.size(), 1);
        lease.discard().await;
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_acquire() {
        let (pool, connector) = pool(1);

        let held = pool.acquire().await.unwrap();
        let mut waiter = tokio_test::task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        pool.close().await;
        let err = assert_ready!(waiter.poll()).unwrap_err();
        assert!(matches!(err, DbError::PoolClosed));

        held.release().await;
        assert_eq!(connector.closed(), 1);
        assert_eq!(pool.size(), 0);
        assert!(matches!(
            pool.acquire().await.unwrap_err(),
            DbError::PoolClosed
        ));
    }

    #[tokio::test]
    async fn test_close_disposes_idle_connections() {
        let (pool, connector) = pool(3);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.release().await;
        b.release().await;

        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(connector.closed(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_slot() {
        let (pool, _connector) = pool(1);

        let lease = pool.acquire().await.unwrap();
        drop(lease);

        assert_eq!(pool.leased(), 0);
        assert_eq!(pool.size(), 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_during_ping_keeps_size_exact() {
        let (pool, connector) = pool(1);

        let lease = pool.acquire().await.unwrap();
        lease.release().await;
        assert_eq!(pool.size(), 1);

        connector.set_stall_ping(true);
        let mut stalled = tokio_test::task::spawn(pool.acquire());
        assert_pending!(stalled.poll());
        drop(stalled);

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.leased(), 0);

        connector.set_stall_ping(false);
        let lease = pool.acquire().await.unwrap();
        assert_eq!(connector.opened(), 2);
        assert_eq!(pool.size(), 1);
        lease.release().await;
    }

    #[tokio::test]
    async fn test_return_idle_refuses_connections_once_closed() {
        let (pool, connector) = pool(1);
        let conn = connector.connect().await.unwrap();

        pool.shared.closed.store(true, Ordering::SeqCst);
        let handed_back = pool.shared.return_idle(conn);

        assert!(handed_back.is_some());
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn test_release_after_close_closes_connection() {
        let (pool, connector) = pool(2);
        let lease = pool.acquire().await.unwrap();

        pool.close().await;
        lease.release().await;

        assert_eq!(connector.closed(), 1);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_lease_debug_reports_state() {
        let (pool, _connector) = pool(1);
        let lease = pool.acquire().await.unwrap();

        let rendered = format!("{:?}", lease);
        assert!(rendered.contains("held: true"));
        assert!(rendered.contains("pool_closed: false"));
        lease.release().await;
    }
}
