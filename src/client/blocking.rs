//! Blocking Client
//!
//! A synchronous facade over [`MemcachedClient`]. It owns a multi-threaded
//! Tokio runtime and blocks the calling thread on each operation.
//!
//! Do not create or drop a `BlockingClient` from inside an async context;
//! use [`MemcachedClient`] there.

use crate::client::dispatch::MemcachedClient;
use crate::client::expiration::Expiration;
use crate::client::stats::ServerStats;
use crate::client::transcoder::Value;
use crate::cluster::locator::Endpoint;
use crate::cluster::server_pool::NodeEvent;
use crate::commands::operation::StoreMode;
use crate::commands::results::{
    CasValue, ConcatResult, GetResult, MutateResult, OperationResult, RemoveResult, StoreResult,
};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct BlockingClient {
    // Dropped before the runtime so the pool shuts down first.
    client: MemcachedClient,
    runtime: Runtime,
}

impl BlockingClient {
    pub fn connect(config: ClientConfig) -> ClientResult<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("flashmc-io")
            .enable_all()
            .build()?;
        let client = runtime.block_on(MemcachedClient::connect(config))?;
        Ok(Self { client, runtime })
    }

    /// The async client this facade drives.
    pub fn as_async(&self) -> &MemcachedClient {
        &self.client
    }

    pub fn get(&self, key: &str) -> ClientResult<GetResult<Value>> {
        self.runtime.block_on(self.client.get(key))
    }

    pub fn get_with_cas(&self, key: &str) -> ClientResult<Option<CasValue<Value>>> {
        self.runtime.block_on(self.client.get_with_cas(key))
    }

    pub fn get_many(&self, keys: &[&str]) -> ClientResult<HashMap<String, Value>> {
        self.runtime.block_on(self.client.get_many(keys))
    }

    pub fn get_many_with_cas(&self, keys: &[&str]) -> ClientResult<HashMap<String, CasValue<Value>>> {
        self.runtime.block_on(self.client.get_many_with_cas(keys))
    }

    pub fn store(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Value>,
        expiration: Expiration,
    ) -> ClientResult<StoreResult> {
        self.runtime
            .block_on(self.client.store(mode, key, value, expiration))
    }

    pub fn cas(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Value>,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<StoreResult> {
        self.runtime
            .block_on(self.client.cas(mode, key, value, expiration, cas))
    }

    pub fn increment(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<MutateResult> {
        self.runtime.block_on(
            self.client
                .increment(key, default_value, delta, expiration, cas),
        )
    }

    pub fn decrement(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<MutateResult> {
        self.runtime.block_on(
            self.client
                .decrement(key, default_value, delta, expiration, cas),
        )
    }

    pub fn append(&self, key: &str, cas: u64, data: impl Into<Bytes>) -> ClientResult<ConcatResult> {
        self.runtime.block_on(self.client.append(key, cas, data))
    }

    pub fn prepend(&self, key: &str, cas: u64, data: impl Into<Bytes>) -> ClientResult<ConcatResult> {
        self.runtime.block_on(self.client.prepend(key, cas, data))
    }

    pub fn remove(&self, key: &str) -> ClientResult<RemoveResult> {
        self.runtime.block_on(self.client.remove(key))
    }

    pub fn flush_all(&self) -> ClientResult<HashMap<Endpoint, OperationResult>> {
        self.runtime.block_on(self.client.flush_all())
    }

    pub fn stats(&self, type_filter: Option<&str>) -> ClientResult<ServerStats> {
        self.runtime.block_on(self.client.stats(type_filter))
    }

    pub fn subscribe_node_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.client.subscribe_node_events()
    }

    pub fn dispose(&self) {
        self.client.dispose();
    }
}
