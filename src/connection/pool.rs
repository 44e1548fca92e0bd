//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one endpoint and bound how many commands
//! can be in flight against it.
//!
//! ## Design
//! 1. **Object Pool Pattern**: idle connections wait in a queue and are lent
//!    out one command at a time.
//! 2. **Bounded**: a semaphore with `max_pool_size` permits caps open
//!    connections. When it is exhausted, `acquire` waits up to the queue
//!    timeout instead of opening more.
//! 3. **Minimal Locking**: the idle-queue mutex is held only while pushing or
//!    popping a connection, never across I/O.
//! 4. **Discard on Error**: a connection that saw an I/O or protocol error, or
//!    whose command was cancelled mid-flight, is dropped instead of returned;
//!    a replacement is opened lazily.

use crate::cluster::locator::Endpoint;
use crate::commands::operation::Operation;
use crate::config::SocketPoolConfig;
use crate::connection::socket::{Connection, ConnectionError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Errors returned by [`ConnectionPool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every connection was busy for the whole queue timeout
    #[error("no connection available within {0:?}")]
    QueueTimeout(Duration),

    /// The pool was closed
    #[error("connection pool is closed")]
    Closed,

    /// Opening a new connection failed
    #[error(transparent)]
    Connect(#[from] ConnectionError),
}

struct PoolInner {
    endpoint: Endpoint,
    config: SocketPoolConfig,
    idle: Mutex<VecDeque<Connection>>,
    permits: Arc<Semaphore>,
}

impl PoolInner {
    fn return_connection(&self, conn: Connection) {
        if self.permits.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        if idle.len() < self.config.max_pool_size {
            idle.push_back(conn);
        }
    }
}

/// Connection pool handle for one endpoint.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.inner.endpoint)
            .field("idle", &self.idle_count())
            .field("available", &self.available())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(endpoint: Endpoint, config: SocketPoolConfig) -> Self {
        let max = config.max_pool_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                endpoint,
                idle: Mutex::new(VecDeque::with_capacity(max)),
                permits: Arc::new(Semaphore::new(max)),
                config,
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Opens `min_pool_size` connections up front.
    ///
    /// Stops at the first connection that cannot be opened.
    pub async fn warm_up(&self) -> Result<usize, ConnectionError> {
        let target = self
            .inner
            .config
            .min_pool_size
            .min(self.inner.config.max_pool_size);
        let mut opened = 0;
        while self.idle_count() < target {
            let conn = self.open().await?;
            self.inner.return_connection(conn);
            opened += 1;
        }
        debug!(node = %self.inner.endpoint, opened = opened, "Pool warmed up");
        Ok(opened)
    }

    /// Lends a connection, opening one if none is idle.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let queue_timeout = self.inner.config.queue_timeout;
        let permit = tokio::time::timeout(queue_timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::QueueTimeout(queue_timeout))?
            .map_err(|_| PoolError::Closed)?;

        if let Some(conn) = self.pop_idle() {
            trace!(node = %self.inner.endpoint, conn = conn.id(), "Reusing idle connection");
            return Ok(PooledConnection::new(self.inner.clone(), conn, permit));
        }

        // The permit is released if connecting fails.
        let conn = self.open().await?;
        Ok(PooledConnection::new(self.inner.clone(), conn, permit))
    }

    /// Drops all idle connections (used when the endpoint dies).
    pub fn clear_idle(&self) {
        self.inner.idle.lock().expect("pool mutex poisoned").clear();
    }

    /// Rejects all future acquisitions and drops idle connections.
    pub fn close(&self) {
        self.inner.permits.close();
        self.clear_idle();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().expect("pool mutex poisoned").len()
    }

    /// Number of commands that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.idle.lock().expect("pool mutex poisoned").pop_front()
    }

    async fn open(&self) -> Result<Connection, ConnectionError> {
        Connection::connect(
            &self.inner.endpoint,
            self.inner.config.connection_timeout,
            self.inner.config.receive_timeout,
        )
        .await
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
    // Released after the connection is back in the idle queue.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection, permit: OwnedSemaphorePermit) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
            _permit: permit,
        }
    }

    /// Runs one command on the borrowed connection.
    pub async fn execute(&mut self, op: &mut dyn Operation) -> Result<(), ConnectionError> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ConnectionError::Closed),
        };
        // Stays invalid if the command fails or this future is dropped with
        // the response still unread.
        self.valid = false;
        let result = conn.execute(op).await;
        self.valid = result.is_ok();
        result
    }

    /// Marks the connection as unusable so it is closed instead of reused.
    pub fn discard(&mut self) {
        self.valid = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.return_connection(conn);
        } else {
            debug!(node = %self.pool.endpoint, conn = conn.id(), "Discarding connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::operation::NoopOperation;
    use crate::protocol::{opcode, status, Packet, PacketParser};
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every Noop; counts accepted connections.
    async fn spawn_noop_server() -> (Endpoint, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let parser = PacketParser::requests();
                    let mut buf = BytesMut::new();
                    loop {
                        match stream.read_buf(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                        while let Ok(Some((request, consumed))) = parser.parse(&buf) {
                            let _ = buf.split_to(consumed);
                            let reply = Packet::response(opcode::NOOP, status::NO_ERROR)
                                .with_opaque(request.opaque)
                                .serialize();
                            if stream.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (endpoint, accepted)
    }

    fn config(min: usize, max: usize) -> SocketPoolConfig {
        SocketPoolConfig::default()
            .with_pool_size(min, max)
            .with_connection_timeout(Duration::from_secs(1))
            .with_receive_timeout(Duration::from_secs(1))
            .with_queue_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (endpoint, accepted) = spawn_noop_server().await;
        let pool = ConnectionPool::new(endpoint, config(0, 4));

        for _ in 0..5 {
            let mut conn = pool.acquire().await.unwrap();
            conn.execute(&mut NoopOperation::new()).await.unwrap();
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (endpoint, _) = spawn_noop_server().await;
        let pool = ConnectionPool::new(endpoint, config(0, 2));

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::QueueTimeout(_))));

        drop(_a);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_discarded_connection_is_not_reused() {
        let (endpoint, accepted) = spawn_noop_server().await;
        let pool = ConnectionPool::new(endpoint, config(0, 2));

        let mut conn = pool.acquire().await.unwrap();
        conn.discard();
        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 2);

        let _conn = pool.acquire().await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_command_discards_connection() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = ConnectionPool::new(endpoint, config(0, 1));
        let mut conn = pool.acquire().await.unwrap();
        let mut op = NoopOperation::new();
        let cancelled = tokio::time::timeout(Duration::from_millis(50), conn.execute(&mut op)).await;
        assert!(cancelled.is_err());
        drop(conn);

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_and_close() {
        let (endpoint, accepted) = spawn_noop_server().await;
        let pool = ConnectionPool::new(endpoint, config(3, 5));

        assert_eq!(pool.warm_up().await.unwrap(), 3);
        assert_eq!(pool.idle_count(), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 3);

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_connect_failure_releases_permit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        drop(listener);

        let pool = ConnectionPool::new(endpoint, config(0, 1));
        assert!(matches!(pool.acquire().await, Err(PoolError::Connect(_))));
        assert_eq!(pool.available(), 1);
    }
}
