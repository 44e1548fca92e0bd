//! Endpoint Node
//!
//! A node wraps the connection pool of one endpoint and tracks whether the
//! endpoint is usable.
//!
//! ## Liveness
//!
//! ```text
//!            failure policy trips                 probe succeeds
//!   Alive ─────────────────────────> Dead ───────────────────────> Alive
//!     │     (exactly one node_failed)   │  (exactly one node_revived)
//!     │                                 │
//!     └── commands run                  └── commands fail fast (NodeDead)
//! ```
//!
//! The liveness flag is an atomic and transitions use compare-exchange, so
//! concurrent failures produce a single notification.

use crate::cluster::failure::FailurePolicy;
use crate::cluster::locator::Endpoint;
use crate::commands::operation::{NoopOperation, Operation};
use crate::commands::results::{OperationResult, StatusCode};
use crate::config::SocketPoolConfig;
use crate::connection::{Connection, ConnectionError, ConnectionPool, PoolError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, Weak};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Receives liveness transitions of nodes.
pub trait NodeListener: Send + Sync {
    fn node_failed(&self, endpoint: &Endpoint);
    fn node_revived(&self, endpoint: &Endpoint);
}

/// Transport-level reasons an execution attempt failed.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// One memcached server and its connections.
pub struct MemcachedNode {
    endpoint: Endpoint,
    pool: ConnectionPool,
    config: SocketPoolConfig,
    alive: AtomicBool,
    dead_since: Mutex<Option<Instant>>,
    policy: Mutex<Box<dyn FailurePolicy>>,
    listener: OnceLock<Weak<dyn NodeListener>>,
}

impl std::fmt::Debug for MemcachedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedNode")
            .field("endpoint", &self.endpoint)
            .field("alive", &self.is_alive())
            .field("pool", &self.pool)
            .finish()
    }
}

impl MemcachedNode {
    pub fn new(endpoint: Endpoint, config: SocketPoolConfig, policy: Box<dyn FailurePolicy>) -> Self {
        Self {
            pool: ConnectionPool::new(endpoint.clone(), config.clone()),
            endpoint,
            config,
            alive: AtomicBool::new(true),
            dead_since: Mutex::new(None),
            policy: Mutex::new(policy),
            listener: OnceLock::new(),
        }
    }

    /// Registers the listener for liveness transitions. Only the first call
    /// takes effect.
    pub fn set_listener(&self, listener: Weak<dyn NodeListener>) -> bool {
        self.listener.set(listener).is_ok()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// When the node was marked dead, if it is dead.
    pub fn dead_since(&self) -> Option<Instant> {
        *self.dead_since.lock().expect("node mutex poisoned")
    }

    /// Opens the minimum number of pooled connections. Failing to reach the
    /// server counts as one failure for the failure policy.
    pub async fn start(&self) {
        if let Err(e) = self.pool.warm_up().await {
            warn!(node = %self.endpoint, error = %e, "Could not open initial connections");
            self.record(false);
        }
    }

    /// Executes one command.
    ///
    /// Transport failures are reported to the failure policy and come back as
    /// a `TransportError` result. Server-reported statuses are returned as-is
    /// and do not count as node failures.
    pub async fn execute(&self, op: &mut dyn Operation) -> OperationResult {
        if !self.is_alive() {
            debug!(node = %self.endpoint, op = op.name(), "Node is dead, failing fast");
            return OperationResult::fail(
                StatusCode::NodeDead,
                format!("node {} is dead", self.endpoint),
            );
        }

        match self.try_execute(op).await {
            Ok(()) => {
                self.record(true);
                let state = op.state();
                if state.status().is_ok() {
                    OperationResult::pass(state.cas(), None)
                } else {
                    let message = state
                        .message()
                        .map(str::to_string)
                        .unwrap_or_else(|| state.status().to_string());
                    OperationResult::fail(state.status(), message)
                }
            }
            Err(e) => {
                warn!(node = %self.endpoint, op = op.name(), error = %e, "Execution failed");
                self.record(false);
                OperationResult::fail(StatusCode::TransportError, e.to_string())
            }
        }
    }

    async fn try_execute(&self, op: &mut dyn Operation) -> Result<(), ExecuteError> {
        let mut conn = self.pool.acquire().await?;
        conn.execute(op).await?;
        Ok(())
    }

    fn record(&self, success: bool) {
        let trip = {
            let mut policy = self.policy.lock().expect("policy mutex poisoned");
            policy.record(success);
            if !success && policy.should_mark_dead() {
                policy.reset();
                true
            } else {
                false
            }
        };
        if trip {
            self.mark_dead();
        }
    }

    /// Takes the node out of rotation. Returns false if it was already dead.
    pub fn mark_dead(&self) -> bool {
        if self
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.dead_since.lock().expect("node mutex poisoned") = Some(Instant::now());
        self.pool.clear_idle();
        error!(node = %self.endpoint, "Node marked dead");

        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.node_failed(&self.endpoint);
        }
        true
    }

    /// Puts the node back into rotation. Returns false if it was already alive.
    pub fn mark_alive(&self) -> bool {
        if self
            .alive
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.dead_since.lock().expect("node mutex poisoned") = None;
        info!(node = %self.endpoint, "Node is back online");

        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.node_revived(&self.endpoint);
        }
        true
    }

    /// Restarts the dead timer after a failed probe.
    pub(crate) fn touch_dead_since(&self) {
        let mut dead_since = self.dead_since.lock().expect("node mutex poisoned");
        if dead_since.is_some() {
            *dead_since = Some(Instant::now());
        }
    }

    /// Checks the server with a fresh connection and a Noop round trip.
    pub async fn probe(&self) -> Result<(), ConnectionError> {
        let mut conn = Connection::connect(
            &self.endpoint,
            self.config.connection_timeout,
            self.config.receive_timeout,
        )
        .await?;
        conn.execute(&mut NoopOperation::new()).await
    }

    /// Closes the connection pool.
    pub fn dispose(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::failure::{FailImmediatelyPolicy, ThrottlingFailurePolicy};
    use crate::commands::operation::GetOperation;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct CountingListener {
        failed: AtomicUsize,
        revived: AtomicUsize,
    }

    impl NodeListener for CountingListener {
        fn node_failed(&self, _endpoint: &Endpoint) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn node_revived(&self, _endpoint: &Endpoint) {
            self.revived.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn unreachable_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        drop(listener);
        endpoint
    }

    fn fast_config() -> SocketPoolConfig {
        SocketPoolConfig::default()
            .with_pool_size(0, 2)
            .with_connection_timeout(Duration::from_millis(200))
            .with_receive_timeout(Duration::from_millis(200))
    }

    fn attach(node: &MemcachedNode) -> Arc<CountingListener> {
        let listener = Arc::new(CountingListener::default());
        let as_dyn: Arc<dyn NodeListener> = listener.clone();
        assert!(node.set_listener(Arc::downgrade(&as_dyn)));
        listener
    }

    #[tokio::test]
    async fn test_threshold_marks_dead_once() {
        let endpoint = unreachable_endpoint().await;
        let node = MemcachedNode::new(
            endpoint,
            fast_config(),
            Box::new(ThrottlingFailurePolicy::new(3, Duration::from_secs(10))),
        );
        let listener = attach(&node);

        for attempt in 1..=3 {
            let result = node.execute(&mut GetOperation::new("k".into())).await;
            assert_eq!(result.status(), StatusCode::TransportError);
            assert_eq!(result.cas(), 0);
            assert_eq!(node.is_alive(), attempt < 3);
        }
        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);

        let result = node.execute(&mut GetOperation::new("k".into())).await;
        assert_eq!(result.status(), StatusCode::NodeDead);
        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_goes_through_policy() {
        let config = fast_config().with_pool_size(1, 2);
        let throttled = MemcachedNode::new(
            unreachable_endpoint().await,
            config.clone(),
            Box::new(ThrottlingFailurePolicy::new(2, Duration::from_secs(10))),
        );
        let listener = attach(&throttled);
        throttled.start().await;
        assert!(throttled.is_alive());
        assert_eq!(listener.failed.load(Ordering::SeqCst), 0);

        let result = throttled.execute(&mut GetOperation::new("k".into())).await;
        assert_eq!(result.status(), StatusCode::TransportError);
        assert!(!throttled.is_alive());
        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);

        let immediate = MemcachedNode::new(
            unreachable_endpoint().await,
            config,
            Box::<FailImmediatelyPolicy>::default(),
        );
        immediate.start().await;
        assert!(!immediate.is_alive());
    }

    #[tokio::test]
    async fn test_transitions_notify_once() {
        let endpoint = unreachable_endpoint().await;
        let node = MemcachedNode::new(endpoint, fast_config(), Box::<FailImmediatelyPolicy>::default());
        let listener = attach(&node);

        assert!(node.mark_dead());
        assert!(!node.mark_dead());
        assert!(node.dead_since().is_some());
        assert!(node.mark_alive());
        assert!(!node.mark_alive());
        assert!(node.dead_since().is_none());

        assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
        assert_eq!(listener.revived.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let endpoint = unreachable_endpoint().await;
        let node = MemcachedNode::new(endpoint, fast_config(), Box::<FailImmediatelyPolicy>::default());
        tokio_test::assert_err!(node.probe().await);
    }
}
