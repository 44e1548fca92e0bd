//! # FlashMC - A Failure-Aware Memcached Client
//!
//! FlashMC is an async client for memcached's binary protocol. It spreads
//! keys over many servers with consistent hashing, keeps a bounded pool of
//! connections per server, and takes failing servers out of rotation until
//! they answer again.
//!
//! ## Features
//!
//! - **Consistent Hashing**: ketama ring, only a dead server's keys move
//! - **Failure Handling**: pluggable failure policies, automatic revival
//! - **CAS Everywhere**: every result carries the item's version token
//! - **Fan-out**: multi-get, flush and stats run on all servers in parallel
//! - **Async I/O**: built on Tokio, with a blocking facade
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashMC                                    │
//! │                                                                         │
//! │  ┌──────────────────┐    ┌──────────────────┐                           │
//! │  │ MemcachedClient  │───>│ OperationFactory │                           │
//! │  │ (dispatch)       │    └──────────────────┘                           │
//! │  └────────┬─────────┘                                                   │
//! │           │ locate(key)                                                 │
//! │           ▼                                                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                        ServerPool                                │   │
//! │  │   KetamaLocator        NodeEvent broadcast    ResurrectionSweeper │   │
//! │  │  ┌────────────┐ ┌────────────┐ ┌────────────┐                    │   │
//! │  │  │  Node A    │ │  Node B    │ │  Node C    │  ... one per server │   │
//! │  │  │ pool+policy│ │ pool+policy│ │ pool+policy│                    │   │
//! │  │  └────────────┘ └────────────┘ └────────────┘                    │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌──────────────────┐                                                   │
//! │  │ Binary protocol  │  24-byte header packets over TCP                  │
//! │  └──────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashmc::{ClientConfig, Expiration, MemcachedClient, StoreMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new()
//!         .add_server("127.0.0.1:11211")?
//!         .add_server("127.0.0.1:11212")?;
//!     let client = MemcachedClient::connect(config).await?;
//!
//!     let stored = client
//!         .store(StoreMode::Set, "name", "Ariz", Expiration::seconds(60))
//!         .await?;
//!     assert!(stored.success());
//!
//!     let fetched = client.get("name").await?;
//!     println!("{} (cas {})", fetched.value().unwrap(), fetched.cas());
//!     Ok(())
//! }
//! ```
//!
//! ## Errors vs. Results
//!
//! Bad input (invalid key, expiration before the epoch, empty multi-get) is
//! an `Err(ClientError)`. Everything else is an `Ok(OperationResult)` whose
//! status tells what happened: a server status such as "not found", or a
//! client-side status such as `TransportError` or `NoAvailableNode`.
//! A failed result always carries a CAS of 0.
//!
//! ## Module Overview
//!
//! - [`protocol`]: binary packet types and incremental parser
//! - [`commands`]: commands, the operation factory and typed results
//! - [`connection`]: server connections and the per-server pool
//! - [`cluster`]: key locator, failure policies, nodes and the server pool
//! - [`client`]: the async and blocking clients and their collaborators
//! - [`config`]: client settings

pub mod client;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;

// Re-export commonly used types for convenience
pub use client::{
    BlockingClient, Expiration, KeyTransformer, MemcachedClient, ServerStats, Transcoder, Value,
};
pub use cluster::{Endpoint, FailurePolicyConfig, NodeEvent};
pub use commands::{
    CasValue, ConcatMode, MutationMode, OperationResult, StatusCode, StoreMode,
};
pub use config::{ClientConfig, SocketPoolConfig};
pub use error::{ClientError, ClientResult};

/// The port memcached listens on by default
pub const DEFAULT_PORT: u16 = 11211;

/// Version of FlashMC
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
