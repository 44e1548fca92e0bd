//! Cluster Membership and Routing
//!
//! ## Modules
//!
//! - `locator`: `Endpoint` and the ketama consistent-hashing ring
//! - `failure`: failure policies deciding when a node is dead
//! - `node`: one endpoint with its connection pool and liveness state
//! - `server_pool`: the node set, key routing and node events
//! - `sweeper`: background task reviving dead nodes

pub mod failure;
pub mod locator;
pub mod node;
pub mod server_pool;
pub mod sweeper;

pub use failure::{
    FailImmediatelyPolicy, FailurePolicy, FailurePolicyConfig, FailurePolicyFactory,
    ThrottlingFailurePolicy,
};
pub use locator::{Endpoint, EndpointError, KetamaLocator};
pub use node::{MemcachedNode, NodeListener};
pub use server_pool::{NodeEvent, ServerPool};
