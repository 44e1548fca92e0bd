//! Background Resurrection Sweeper
//!
//! Dead nodes are not retried on the request path; they fail fast until this
//! task brings them back.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for the check interval
//! 2. Collects nodes that have been dead for at least `dead_timeout`
//! 3. Probes each of them concurrently (fresh connection + Noop)
//! 4. Marks responsive nodes alive; unresponsive ones wait another
//!    `dead_timeout`
//!
//! Marking a node alive goes through the node's listener, which rebuilds the
//! key locator and broadcasts the revival.

use crate::cluster::node::MemcachedNode;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

/// Upper bound on the time between two checks.
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A handle to the running sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ResurrectionSweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ResurrectionSweeper {
    /// Starts the sweeper as a background task.
    ///
    /// The task only holds a weak reference to the node list and exits once
    /// the owning pool is gone.
    pub fn start(nodes: Weak<Vec<Arc<MemcachedNode>>>, dead_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(nodes, dead_timeout, shutdown_rx));

        debug!(dead_timeout_ms = dead_timeout.as_millis(), "Resurrection sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ResurrectionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    nodes: Weak<Vec<Arc<MemcachedNode>>>,
    dead_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let interval = dead_timeout.min(MAX_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Resurrection sweeper received shutdown signal");
                    return;
                }
            }
        }

        let nodes = match nodes.upgrade() {
            Some(nodes) => nodes,
            None => return,
        };

        let due: Vec<Arc<MemcachedNode>> = nodes
            .iter()
            .filter(|node| {
                node.dead_since()
                    .is_some_and(|since| since.elapsed() >= dead_timeout)
            })
            .cloned()
            .collect();
        drop(nodes);

        if due.is_empty() {
            continue;
        }
        trace!(count = due.len(), "Probing dead nodes");

        let mut probes = JoinSet::new();
        for node in due {
            probes.spawn(async move {
                match node.probe().await {
                    Ok(()) => {
                        info!(node = %node.endpoint(), "Probe succeeded");
                        node.mark_alive();
                    }
                    Err(e) => {
                        debug!(node = %node.endpoint(), error = %e, "Probe failed");
                        node.touch_dead_since();
                    }
                }
            });
        }
        while probes.join_next().await.is_some() {}
    }
}
