//! Server Pool
//!
//! Owns every [`MemcachedNode`], routes keys to the live ones and forwards
//! node liveness changes to subscribers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        ServerPool                          │
//! │                                                            │
//! │  locate(key) ──> RwLock<Arc<KetamaLocator>> ──> node       │
//! │                        ▲                                   │
//! │                        │ rebuilt on every transition       │
//! │                 ┌──────┴───────┐                           │
//! │  node_failed ──>│  Membership  │──> broadcast<NodeEvent>   │
//! │  node_revived ─>│              │                           │
//! │                 └──────────────┘                           │
//! │                                                            │
//! │  ResurrectionSweeper (probes dead nodes)                   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lookups take the read lock only long enough to clone the `Arc` of the
//! current ring; the ring itself is immutable.

use crate::cluster::failure::FailurePolicyFactory;
use crate::cluster::locator::{Endpoint, KetamaLocator};
use crate::cluster::node::{MemcachedNode, NodeListener};
use crate::cluster::sweeper::ResurrectionSweeper;
use crate::config::{ClientConfig, SocketPoolConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Capacity of the node event channel. Slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A node liveness transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Failed(Endpoint),
    Revived(Endpoint),
}

struct Membership {
    nodes: Arc<Vec<Arc<MemcachedNode>>>,
    by_endpoint: HashMap<Endpoint, Arc<MemcachedNode>>,
    locator: RwLock<Arc<KetamaLocator>>,
    events: broadcast::Sender<NodeEvent>,
    disposed: AtomicBool,
}

impl Membership {
    fn rebuild(&self) {
        // Liveness is read under the write lock so the last rebuild to store
        // also saw the last transition.
        let mut current = self.locator.write().expect("locator lock poisoned");
        let alive = self
            .nodes
            .iter()
            .filter(|node| node.is_alive())
            .map(|node| node.endpoint().clone());
        let locator = Arc::new(KetamaLocator::new(alive));
        debug!(alive = locator.len(), total = self.nodes.len(), "Rebuilt key locator");
        *current = locator;
    }

    fn locator(&self) -> Arc<KetamaLocator> {
        self.locator.read().expect("locator lock poisoned").clone()
    }
}

impl NodeListener for Membership {
    fn node_failed(&self, endpoint: &Endpoint) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.rebuild();
        warn!(node = %endpoint, "Node removed from rotation");
        // No subscribers is fine.
        let _ = self.events.send(NodeEvent::Failed(endpoint.clone()));
    }

    fn node_revived(&self, endpoint: &Endpoint) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.rebuild();
        info!(node = %endpoint, "Node returned to rotation");
        let _ = self.events.send(NodeEvent::Revived(endpoint.clone()));
    }
}

/// The set of memcached servers behind one client.
pub struct ServerPool {
    membership: Arc<Membership>,
    config: SocketPoolConfig,
    sweeper: Mutex<Option<ResurrectionSweeper>>,
}

impl std::fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPool")
            .field("nodes", &self.membership.nodes)
            .finish()
    }
}

impl ServerPool {
    /// Builds the pool from client settings. Call [`ServerPool::start`]
    /// before routing.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_policy_factory(
            config.servers.clone(),
            config.socket_pool.clone(),
            Arc::new(config.failure_policy.clone()),
        )
    }

    /// Builds the pool with a custom failure policy per node.
    pub fn with_policy_factory(
        servers: Vec<Endpoint>,
        config: SocketPoolConfig,
        policies: Arc<dyn FailurePolicyFactory>,
    ) -> Self {
        let mut by_endpoint = HashMap::new();
        let mut nodes = Vec::new();
        for endpoint in servers {
            if by_endpoint.contains_key(&endpoint) {
                continue;
            }
            let node = Arc::new(MemcachedNode::new(
                endpoint.clone(),
                config.clone(),
                policies.create(&endpoint),
            ));
            by_endpoint.insert(endpoint, node.clone());
            nodes.push(node);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let membership = Arc::new(Membership {
            locator: RwLock::new(Arc::new(KetamaLocator::new(
                nodes.iter().map(|node| node.endpoint().clone()),
            ))),
            nodes: Arc::new(nodes),
            by_endpoint,
            events,
            disposed: AtomicBool::new(false),
        });

        Self {
            membership,
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// Subscribes to the nodes, opens their initial connections and starts
    /// the resurrection sweeper.
    pub async fn start(&self) {
        let listener: Arc<dyn NodeListener> = self.membership.clone();
        for node in self.membership.nodes.iter() {
            node.set_listener(Arc::downgrade(&listener));
        }

        let mut warm_ups = JoinSet::new();
        for node in self.membership.nodes.iter().cloned() {
            warm_ups.spawn(async move { node.start().await });
        }
        while warm_ups.join_next().await.is_some() {}

        self.membership.rebuild();

        let mut sweeper = self.sweeper.lock().expect("sweeper mutex poisoned");
        if sweeper.is_none() {
            *sweeper = Some(ResurrectionSweeper::start(
                Arc::downgrade(&self.membership.nodes),
                self.config.dead_timeout,
            ));
        }

        info!(
            nodes = self.membership.nodes.len(),
            alive = self.working_nodes().len(),
            "Server pool started"
        );
    }

    /// The live node owning `key`, or `None` if every node is dead.
    pub fn locate(&self, key: &str) -> Option<Arc<MemcachedNode>> {
        let locator = self.membership.locator();
        let endpoint = locator.locate(key)?;
        self.membership.by_endpoint.get(endpoint).cloned()
    }

    /// All nodes currently alive.
    pub fn working_nodes(&self) -> Vec<Arc<MemcachedNode>> {
        self.membership
            .nodes
            .iter()
            .filter(|node| node.is_alive())
            .cloned()
            .collect()
    }

    /// Every node, dead or alive.
    pub fn nodes(&self) -> &[Arc<MemcachedNode>] {
        &self.membership.nodes
    }

    pub fn node(&self, endpoint: &Endpoint) -> Option<&Arc<MemcachedNode>> {
        self.membership.by_endpoint.get(endpoint)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.membership.events.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.membership.disposed.load(Ordering::Acquire)
    }

    /// Stops the sweeper and closes every connection pool.
    pub fn dispose(&self) {
        if self.membership.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sweeper) = self.sweeper.lock().expect("sweeper mutex poisoned").take() {
            sweeper.stop();
        }
        for node in self.membership.nodes.iter() {
            node.dispose();
        }
        info!("Server pool disposed");
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        self.dispose();
    }
}
