//! Server Connections
//!
//! This module manages the TCP connections from the client to each memcached
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MemcachedNode                           │
//! │                  (cluster module)                           │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ acquire()  (waits up to queue timeout)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionPool                             │
//! │                                                             │
//! │   idle: [conn] [conn] [conn]        permits: max_pool_size  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ PooledConnection (returned on drop)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Encode cmd  │───>│ Read bytes  │───>│ Parse/handle│      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Exclusive use**: a connection serves one command at a time
//! - **Buffer Management**: BytesMut read buffer, pipelined replies supported
//! - **Timeouts**: connect, per-read receive, and pool queue timeouts

pub mod pool;
pub mod socket;

// Re-export commonly used types
pub use pool::{ConnectionPool, PoolError, PooledConnection};
pub use socket::{Connection, ConnectionError};
