//! Operation Factory
//!
//! Stateless builders translating logical parameters into single-use
//! command objects. Keys passed here are already transformed (they are what
//! goes on the wire) and expirations are already encoded as protocol seconds.

use crate::commands::operation::{
    CacheItem, ConcatMode, ConcatOperation, DeleteOperation, FlushOperation, GetOperation,
    MultiGetOperation, MutateOperation, MutationMode, NoopOperation, StatsOperation, StoreMode,
    StoreOperation,
};
use bytes::Bytes;

/// Builds protocol commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationFactory;

impl OperationFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, key: impl Into<String>) -> GetOperation {
        GetOperation::new(key.into())
    }

    pub fn multi_get(&self, keys: Vec<String>) -> MultiGetOperation {
        MultiGetOperation::new(keys)
    }

    /// A CAS of 0 means "no precondition".
    pub fn store(
        &self,
        mode: StoreMode,
        key: impl Into<String>,
        item: CacheItem,
        expires: u32,
        cas: u64,
    ) -> StoreOperation {
        StoreOperation::new(mode, key.into(), item, expires, cas)
    }

    pub fn mutate(
        &self,
        mode: MutationMode,
        key: impl Into<String>,
        default_value: u64,
        delta: u64,
        expires: u32,
        cas: u64,
    ) -> MutateOperation {
        MutateOperation::new(mode, key.into(), default_value, delta, expires, cas)
    }

    pub fn concat(
        &self,
        mode: ConcatMode,
        key: impl Into<String>,
        cas: u64,
        data: impl Into<Bytes>,
    ) -> ConcatOperation {
        ConcatOperation::new(mode, key.into(), cas, data.into())
    }

    pub fn delete(&self, key: impl Into<String>, cas: u64) -> DeleteOperation {
        DeleteOperation::new(key.into(), cas)
    }

    /// Flush that takes effect after `delay` seconds (0 = now).
    pub fn flush(&self, delay: u32) -> FlushOperation {
        FlushOperation::new(delay)
    }

    pub fn stats(&self, type_filter: Option<&str>) -> StatsOperation {
        StatsOperation::new(type_filter.map(str::to_string))
    }

    pub fn noop(&self) -> NoopOperation {
        NoopOperation::new()
    }
}
