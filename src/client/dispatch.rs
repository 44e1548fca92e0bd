//! Dispatch Layer
//!
//! [`MemcachedClient`] is the async entry point. Each operation:
//!
//! 1. transforms the caller key (the transformed key is routed and sent)
//! 2. builds a command through the [`OperationFactory`]
//! 3. locates the owning node and executes the command there
//! 4. turns the command's status, CAS and payload into a typed result
//!
//! Flush, stats and multi-get fan out one task per node with a `JoinSet` and
//! merge the answers in the joining task. A failing node never aborts the
//! others: its share is logged and left out.

use crate::client::expiration::Expiration;
use crate::client::key::{validate_key, DefaultKeyTransformer, KeyTransformer};
use crate::client::stats::ServerStats;
use crate::client::transcoder::{DefaultTranscoder, Transcoder, Value};
use crate::cluster::failure::FailurePolicyFactory;
use crate::cluster::locator::Endpoint;
use crate::cluster::node::MemcachedNode;
use crate::cluster::server_pool::{NodeEvent, ServerPool};
use crate::commands::operation::{CacheItem, ConcatMode, MutationMode, Operation, StoreMode};
use crate::commands::results::{
    CasValue, ConcatResult, GetResult, MutateResult, OperationResult, RemoveResult, StatusCode,
    StoreResult,
};
use crate::commands::OperationFactory;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

struct ClientInner {
    pool: ServerPool,
    factory: OperationFactory,
    transcoder: Arc<dyn Transcoder>,
    keys: Arc<dyn KeyTransformer>,
}

/// Async memcached client. Cheap to clone; clones share the server pool.
#[derive(Clone)]
pub struct MemcachedClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for MemcachedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedClient")
            .field("pool", &self.inner.pool)
            .field("transcoder", &self.inner.transcoder)
            .field("keys", &self.inner.keys)
            .finish()
    }
}

/// Builds a client with non-default collaborators.
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
    transcoder: Arc<dyn Transcoder>,
    keys: Arc<dyn KeyTransformer>,
    policies: Option<Arc<dyn FailurePolicyFactory>>,
}

impl ClientBuilder {
    pub fn transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    pub fn key_transformer(mut self, keys: impl KeyTransformer + 'static) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Overrides the failure policy selected in the config.
    pub fn failure_policy_factory(mut self, policies: impl FailurePolicyFactory + 'static) -> Self {
        self.policies = Some(Arc::new(policies));
        self
    }

    /// Validates the config, starts the server pool and returns the client.
    pub async fn build(self) -> ClientResult<MemcachedClient> {
        self.config.validate()?;
        let policies: Arc<dyn FailurePolicyFactory> = match self.policies {
            Some(policies) => policies,
            None => Arc::new(self.config.failure_policy.clone()),
        };
        let pool = ServerPool::with_policy_factory(
            self.config.servers.clone(),
            self.config.socket_pool.clone(),
            policies,
        );
        pool.start().await;

        Ok(MemcachedClient {
            inner: Arc::new(ClientInner {
                pool,
                factory: OperationFactory::new(),
                transcoder: self.transcoder,
                keys: self.keys,
            }),
        })
    }
}

impl MemcachedClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transcoder: Arc::new(DefaultTranscoder::new()),
            keys: Arc::new(DefaultKeyTransformer),
            policies: None,
        }
    }

    /// Connects with the default transcoder and key transformer.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        Self::builder(config).build().await
    }

    pub fn server_pool(&self) -> &ServerPool {
        &self.inner.pool
    }

    /// Node failures and revivals.
    pub fn subscribe_node_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.pool.subscribe()
    }

    /// Closes every connection. Later calls return `ClientError::Disposed`.
    pub fn dispose(&self) {
        self.inner.pool.dispose();
    }

    // ========================================================================
    // Single-key operations
    // ========================================================================

    pub async fn get(&self, key: &str) -> ClientResult<GetResult<Value>> {
        let hashed = self.prepare_key(key)?;
        let mut op = self.inner.factory.get(hashed.as_str());
        let result = self.execute(&hashed, &mut op).await;
        if !result.success() {
            return Ok(result.with_value(None));
        }
        let item = match op.take_item() {
            Some(item) => item,
            None => {
                return Ok(OperationResult::fail(
                    StatusCode::LocalFailure,
                    "server reported success without a value",
                ))
            }
        };
        Ok(self.decode(result, item))
    }

    /// The value and its CAS token, or `None` on a miss or failure.
    pub async fn get_with_cas(&self, key: &str) -> ClientResult<Option<CasValue<Value>>> {
        let result = self.get(key).await?;
        let cas = result.cas();
        Ok(result.into_value().map(|value| CasValue { value, cas }))
    }

    /// Stores `value` under `key` according to `mode`.
    pub async fn store(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Value>,
        expiration: Expiration,
    ) -> ClientResult<StoreResult> {
        self.perform_store(mode, key, value.into(), expiration, 0).await
    }

    /// Stores only if the item's current CAS token equals `cas`.
    pub async fn cas(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Value>,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<StoreResult> {
        self.perform_store(mode, key, value.into(), expiration, cas).await
    }

    async fn perform_store(
        &self,
        mode: StoreMode,
        key: &str,
        value: Value,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<StoreResult> {
        let hashed = self.prepare_key(key)?;
        let expires = expiration.encode()?;

        let item = match self.inner.transcoder.serialize(&value) {
            Ok(item) => item,
            Err(e) => {
                debug!(key = %key, error = %e, "Serialization failed");
                return Ok(OperationResult::fail(StatusCode::LocalFailure, e.to_string()));
            }
        };

        let mut op = self
            .inner
            .factory
            .store(mode, hashed.as_str(), item, expires, cas);
        Ok(self.execute(&hashed, &mut op).await)
    }

    /// Adds `delta` to a counter. An absent key is created with
    /// `default_value`, which is then returned.
    pub async fn increment(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<MutateResult> {
        self.perform_mutate(MutationMode::Increment, key, default_value, delta, expiration, cas)
            .await
    }

    /// Subtracts `delta` from a counter. The server never goes below 0.
    pub async fn decrement(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<MutateResult> {
        self.perform_mutate(MutationMode::Decrement, key, default_value, delta, expiration, cas)
            .await
    }

    async fn perform_mutate(
        &self,
        mode: MutationMode,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: Expiration,
        cas: u64,
    ) -> ClientResult<MutateResult> {
        let hashed = self.prepare_key(key)?;
        let expires = expiration.encode()?;
        let mut op = self.inner.factory.mutate(
            mode,
            hashed.as_str(),
            default_value,
            delta,
            expires,
            cas,
        );
        let result = self.execute(&hashed, &mut op).await;
        Ok(result.with_value(op.value()))
    }

    pub async fn append(
        &self,
        key: &str,
        cas: u64,
        data: impl Into<Bytes>,
    ) -> ClientResult<ConcatResult> {
        self.perform_concat(ConcatMode::Append, key, cas, data.into()).await
    }

    pub async fn prepend(
        &self,
        key: &str,
        cas: u64,
        data: impl Into<Bytes>,
    ) -> ClientResult<ConcatResult> {
        self.perform_concat(ConcatMode::Prepend, key, cas, data.into()).await
    }

    async fn perform_concat(
        &self,
        mode: ConcatMode,
        key: &str,
        cas: u64,
        data: Bytes,
    ) -> ClientResult<ConcatResult> {
        let hashed = self.prepare_key(key)?;
        let mut op = self.inner.factory.concat(mode, hashed.as_str(), cas, data);
        Ok(self.execute(&hashed, &mut op).await)
    }

    pub async fn remove(&self, key: &str) -> ClientResult<RemoveResult> {
        let hashed = self.prepare_key(key)?;
        let mut op = self.inner.factory.delete(hashed.as_str(), 0);
        Ok(self.execute(&hashed, &mut op).await)
    }

    // ========================================================================
    // Multi-node operations
    // ========================================================================

    /// Fetches several keys at once. Missing keys, and keys whose server is
    /// unreachable, are absent from the map.
    pub async fn get_many(&self, keys: &[&str]) -> ClientResult<HashMap<String, Value>> {
        let found = self.perform_multi_get(keys).await?;
        Ok(found
            .into_iter()
            .map(|(key, cas_value)| (key, cas_value.value))
            .collect())
    }

    /// Like [`MemcachedClient::get_many`], with the CAS token of each value.
    pub async fn get_many_with_cas(
        &self,
        keys: &[&str],
    ) -> ClientResult<HashMap<String, CasValue<Value>>> {
        self.perform_multi_get(keys).await
    }

    async fn perform_multi_get(
        &self,
        keys: &[&str],
    ) -> ClientResult<HashMap<String, CasValue<Value>>> {
        self.ensure_active()?;
        if keys.is_empty() {
            return Err(ClientError::EmptyKeySet);
        }

        // transformed key -> caller key
        let mut originals: HashMap<String, String> = HashMap::with_capacity(keys.len());
        for key in keys {
            let hashed = self.transform_key(key)?;
            originals.insert(hashed, key.to_string());
        }

        let mut by_node: HashMap<Endpoint, (Arc<MemcachedNode>, Vec<String>)> = HashMap::new();
        for hashed in originals.keys() {
            match self.inner.pool.locate(hashed) {
                Some(node) => {
                    by_node
                        .entry(node.endpoint().clone())
                        .or_insert_with(|| (node, Vec::new()))
                        .1
                        .push(hashed.clone());
                }
                None => debug!(key = %hashed, "No live node for key"),
            }
        }

        let mut tasks = JoinSet::new();
        for (endpoint, (node, node_keys)) in by_node {
            let mut op = self.inner.factory.multi_get(node_keys);
            tasks.spawn(async move {
                let result = node.execute(&mut op).await;
                (endpoint, result, op.take_results())
            });
        }

        let mut merged = HashMap::with_capacity(keys.len());
        while let Some(joined) = tasks.join_next().await {
            let (endpoint, result, items) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Multi-get task failed");
                    continue;
                }
            };
            if !result.success() {
                warn!(node = %endpoint, status = %result.status(), "Multi-get failed on node");
                continue;
            }
            for (hashed, item, cas) in items {
                let Some(original) = originals.get(&hashed) else {
                    warn!(node = %endpoint, key = %hashed, "Unrequested key in multi-get reply");
                    continue;
                };
                match self.inner.transcoder.deserialize(item) {
                    Ok(value) => {
                        merged.insert(original.clone(), CasValue { value, cas });
                    }
                    Err(e) => warn!(key = %original, error = %e, "Could not decode value"),
                }
            }
        }
        Ok(merged)
    }

    /// Invalidates every item on every live server.
    pub async fn flush_all(&self) -> ClientResult<HashMap<Endpoint, OperationResult>> {
        self.flush_all_after(Duration::ZERO).await
    }

    /// Invalidates every item once `delay` has passed.
    pub async fn flush_all_after(
        &self,
        delay: Duration,
    ) -> ClientResult<HashMap<Endpoint, OperationResult>> {
        self.ensure_active()?;
        let delay = Expiration::In(delay).encode()?;

        let mut tasks = JoinSet::new();
        for node in self.inner.pool.working_nodes() {
            let mut op = self.inner.factory.flush(delay);
            tasks.spawn(async move {
                let result = node.execute(&mut op).await;
                (node.endpoint().clone(), result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((endpoint, result)) => {
                    if !result.success() {
                        warn!(node = %endpoint, status = %result.status(), "Flush failed on node");
                    }
                    results.insert(endpoint, result);
                }
                Err(e) => error!(error = %e, "Flush task failed"),
            }
        }
        Ok(results)
    }

    /// Queries statistics from every live server. `type_filter` selects a
    /// stat group such as `"items"` or `"slabs"`.
    pub async fn stats(&self, type_filter: Option<&str>) -> ClientResult<ServerStats> {
        self.ensure_active()?;

        let mut tasks = JoinSet::new();
        for node in self.inner.pool.working_nodes() {
            let mut op = self.inner.factory.stats(type_filter);
            tasks.spawn(async move {
                let result = node.execute(&mut op).await;
                (node.endpoint().clone(), result, op.take_stats())
            });
        }

        let mut merged = ServerStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((endpoint, result, stats)) if result.success() => merged.insert(endpoint, stats),
                Ok((endpoint, result, _)) => {
                    warn!(node = %endpoint, status = %result.status(), "Stats failed on node")
                }
                Err(e) => error!(error = %e, "Stats task failed"),
            }
        }
        Ok(merged)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ensure_active(&self) -> ClientResult<()> {
        if self.inner.pool.is_disposed() {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }

    fn prepare_key(&self, key: &str) -> ClientResult<String> {
        self.ensure_active()?;
        self.transform_key(key)
    }

    /// Transforms `key` and checks that the result can go on the wire.
    fn transform_key(&self, key: &str) -> ClientResult<String> {
        let hashed = self.inner.keys.transform(key)?;
        validate_key(&hashed)?;
        Ok(hashed)
    }

    /// Runs `op` on the node owning `hashed`.
    async fn execute(&self, hashed: &str, op: &mut dyn Operation) -> OperationResult {
        match self.inner.pool.locate(hashed) {
            Some(node) => node.execute(op).await,
            None => {
                debug!(key = %hashed, op = op.name(), "No live node for key");
                OperationResult::fail(StatusCode::NoAvailableNode, "no live server for key")
            }
        }
    }

    fn decode(&self, result: OperationResult, item: CacheItem) -> GetResult<Value> {
        match self.inner.transcoder.deserialize(item) {
            Ok(value) => result.with_value(Some(value)),
            Err(e) => OperationResult::fail(StatusCode::LocalFailure, e.to_string())
                .with_inner(result),
        }
    }
}
