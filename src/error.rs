//! Client Errors
//!
//! Only input and setup problems are errors. Everything that happens after a
//! command was accepted (routing, transport, server status, serialization)
//! is reported through the status of an
//! [`OperationResult`](crate::commands::OperationResult).

use crate::client::expiration::ExpirationError;
use crate::client::key::KeyError;
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("invalid expiration: {0}")]
    InvalidExpiration(#[from] ExpirationError),

    #[error("no keys given")]
    EmptyKeySet,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("client has been disposed")]
    Disposed,

    /// The blocking client could not start its runtime
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
