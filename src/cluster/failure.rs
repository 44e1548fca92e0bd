//! Node Failure Policies
//!
//! A policy sees the outcome of every execution attempt against one endpoint
//! and decides when the endpoint should be taken out of rotation. Each node
//! owns its own policy instance, created by a [`FailurePolicyFactory`].
//!
//! Policies are called on the execution path while the node holds a short
//! lock, so they must be O(1) and must never block.

use crate::cluster::locator::Endpoint;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Decides when a node should be marked dead.
pub trait FailurePolicy: Send + fmt::Debug {
    /// Records the outcome of one execution attempt.
    fn record(&mut self, success: bool);

    /// True once the recorded failures warrant marking the node dead.
    fn should_mark_dead(&self) -> bool;

    /// Clears the state after the node was marked dead.
    fn reset(&mut self);
}

/// Creates one policy per endpoint.
pub trait FailurePolicyFactory: Send + Sync + fmt::Debug {
    fn create(&self, endpoint: &Endpoint) -> Box<dyn FailurePolicy>;
}

/// Marks the node dead on the first failure.
#[derive(Debug, Default)]
pub struct FailImmediatelyPolicy {
    failed: bool,
}

impl FailurePolicy for FailImmediatelyPolicy {
    fn record(&mut self, success: bool) {
        if !success {
            self.failed = true;
        }
    }

    fn should_mark_dead(&self) -> bool {
        self.failed
    }

    fn reset(&mut self) {
        self.failed = false;
    }
}

/// Marks the node dead after `max_failures` failures that each follow the
/// previous one within `window`.
///
/// A failure arriving more than `window` after the previous failure starts a
/// new count at 1. Successes do not touch the counter.
#[derive(Debug)]
pub struct ThrottlingFailurePolicy {
    max_failures: usize,
    window: Duration,
    failures: usize,
    last_failure: Option<Instant>,
}

impl ThrottlingFailurePolicy {
    pub fn new(max_failures: usize, window: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            window,
            failures: 0,
            last_failure: None,
        }
    }

    /// Failures counted in the current window.
    pub fn failures(&self) -> usize {
        self.failures
    }
}

impl FailurePolicy for ThrottlingFailurePolicy {
    fn record(&mut self, success: bool) {
        if success {
            return;
        }
        let now = Instant::now();
        self.failures = match self.last_failure {
            Some(last) if now.duration_since(last) <= self.window => self.failures + 1,
            _ => 1,
        };
        self.last_failure = Some(now);
    }

    fn should_mark_dead(&self) -> bool {
        self.failures >= self.max_failures
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }
}

/// Failure policy selection, usable directly as a factory.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FailurePolicyConfig {
    #[default]
    FailImmediately,
    Throttling {
        max_failures: usize,
        window: Duration,
    },
}

impl FailurePolicyFactory for FailurePolicyConfig {
    fn create(&self, _endpoint: &Endpoint) -> Box<dyn FailurePolicy> {
        match self {
            FailurePolicyConfig::FailImmediately => Box::<FailImmediatelyPolicy>::default(),
            FailurePolicyConfig::Throttling {
                max_failures,
                window,
            } => Box::new(ThrottlingFailurePolicy::new(*max_failures, *window)),
        }
    }
}
