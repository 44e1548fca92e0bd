//! Protocol Commands
//!
//! A command is a single-use object: it is built by the
//! [`OperationFactory`](crate::commands::OperationFactory), executed exactly
//! once by a node, and then read for its observed CAS, status and value.
//!
//! ## Execution Contract
//!
//! ```text
//! encode() ──> socket ──> handle(packet) ──> handle(packet) ──> ... ──> Done
//!                            │
//!                            └── state(): status, cas, message
//! ```
//!
//! Single-key commands complete on their first response packet. Batched
//! commands (multi-get, stats) keep consuming packets until their terminator
//! arrives.

use crate::commands::results::StatusCode;
use crate::protocol::types::{flush_extras, mutate_extras, store_extras};
use crate::protocol::{opcode, read_u32, read_u64, Packet, ParseError, ParseResult};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

/// A serialized value as stored on the server: the type flags chosen by the
/// transcoder plus the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub flags: u32,
    pub data: Bytes,
}

impl CacheItem {
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }
}

/// Store semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Succeeds only if the key is absent.
    Add,
    /// Succeeds only if the key is present.
    Replace,
    /// Unconditional upsert (still honors a CAS precondition).
    Set,
}

impl StoreMode {
    fn opcode(self) -> u8 {
        match self {
            StoreMode::Add => opcode::ADD,
            StoreMode::Replace => opcode::REPLACE,
            StoreMode::Set => opcode::SET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationMode {
    Increment,
    Decrement,
}

impl MutationMode {
    fn opcode(self) -> u8 {
        match self {
            MutationMode::Increment => opcode::INCREMENT,
            MutationMode::Decrement => opcode::DECREMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcatMode {
    Append,
    Prepend,
}

impl ConcatMode {
    fn opcode(self) -> u8 {
        match self {
            ConcatMode::Append => opcode::APPEND,
            ConcatMode::Prepend => opcode::PREPEND,
        }
    }
}

/// Whether a command expects more response packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    Continue,
}

/// What the server reported for a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseState {
    status: Option<StatusCode>,
    cas: u64,
    message: Option<String>,
}

impl ResponseState {
    /// Records status, CAS and (for errors) the server's message.
    fn absorb(&mut self, packet: &Packet) {
        let status = StatusCode::from_wire(packet.status());
        if status.is_ok() {
            self.cas = packet.cas;
            self.message = None;
        } else {
            self.cas = 0;
            if !packet.value.is_empty() {
                self.message = Some(String::from_utf8_lossy(&packet.value).into_owned());
            }
        }
        self.status = Some(status);
    }

    fn complete(&mut self) {
        self.status = Some(StatusCode::Ok);
    }

    /// The reported status, or `TransportError` if no response was seen.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::TransportError)
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_some()
    }
}

/// A protocol command that can be executed on a connection.
pub trait Operation: Send {
    /// Short command name for logs.
    fn name(&self) -> &'static str;

    /// Appends the request bytes to `buf`, stamping `opaque` on them.
    fn encode(&self, buf: &mut BytesMut, opaque: u32);

    /// How many consecutive opaque values the request uses, starting at the
    /// one passed to [`Operation::encode`].
    fn opaque_span(&self) -> u32 {
        1
    }

    /// Consumes one response packet. Its opaque is relative to the one the
    /// request was encoded with.
    fn handle(&mut self, packet: Packet) -> ParseResult<Progress>;

    /// The server-reported outcome.
    fn state(&self) -> &ResponseState;
}

fn expect_opcode(packet: &Packet, expected: u8) -> ParseResult<()> {
    if packet.opcode != expected {
        return Err(ParseError::UnexpectedOpcode {
            expected,
            actual: packet.opcode,
        });
    }
    Ok(())
}

// ============================================================================
// Get
// ============================================================================

#[derive(Debug)]
pub struct GetOperation {
    key: String,
    state: ResponseState,
    item: Option<CacheItem>,
}

impl GetOperation {
    pub(crate) fn new(key: String) -> Self {
        Self {
            key,
            state: ResponseState::default(),
            item: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn take_item(&mut self) -> Option<CacheItem> {
        self.item.take()
    }
}

impl Operation for GetOperation {
    fn name(&self) -> &'static str {
        "get"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(opcode::GET)
            .with_key(Bytes::copy_from_slice(self.key.as_bytes()))
            .with_opaque(opaque)
            .serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, opcode::GET)?;
        self.state.absorb(&packet);
        if self.state.status().is_ok() {
            let flags = read_u32(&packet.extras)?;
            self.item = Some(CacheItem::new(flags, packet.value));
        }
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Multi-get
// ============================================================================

/// Batched get: one quiet GetKQ per key, terminated by a Noop.
///
/// Misses are not answered by the server, so absent keys are simply missing
/// from [`MultiGetOperation::items`].
#[derive(Debug)]
pub struct MultiGetOperation {
    keys: Vec<String>,
    state: ResponseState,
    items: HashMap<String, CacheItem>,
    cas: HashMap<String, u64>,
}

impl MultiGetOperation {
    pub(crate) fn new(keys: Vec<String>) -> Self {
        Self {
            items: HashMap::with_capacity(keys.len()),
            cas: HashMap::with_capacity(keys.len()),
            keys,
            state: ResponseState::default(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn items(&self) -> &HashMap<String, CacheItem> {
        &self.items
    }

    pub fn cas_values(&self) -> &HashMap<String, u64> {
        &self.cas
    }

    /// Takes the decoded items, each paired with its CAS token.
    pub fn take_results(&mut self) -> Vec<(String, CacheItem, u64)> {
        let cas = std::mem::take(&mut self.cas);
        self.items
            .drain()
            .map(|(key, item)| {
                let token = cas.get(&key).copied().unwrap_or(0);
                (key, item, token)
            })
            .collect()
    }

    fn resolve_key(&self, packet: &Packet) -> Option<String> {
        if !packet.key.is_empty() {
            return Some(String::from_utf8_lossy(&packet.key).into_owned());
        }
        // The opaque carries the key's index in the batch.
        self.keys.get(packet.opaque as usize).cloned()
    }
}

impl Operation for MultiGetOperation {
    fn name(&self) -> &'static str {
        "multi_get"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        for (index, key) in self.keys.iter().enumerate() {
            Packet::request(opcode::GETKQ)
                .with_key(Bytes::copy_from_slice(key.as_bytes()))
                .with_opaque(opaque.wrapping_add(index as u32))
                .serialize_into(buf);
        }
        Packet::request(opcode::NOOP)
            .with_opaque(opaque.wrapping_add(self.keys.len() as u32))
            .serialize_into(buf);
    }

    fn opaque_span(&self) -> u32 {
        self.keys.len() as u32 + 1
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        match packet.opcode {
            opcode::NOOP => {
                self.state.complete();
                Ok(Progress::Done)
            }
            opcode::GETKQ | opcode::GETK => {
                if packet.status() == crate::protocol::status::NO_ERROR {
                    if let Some(key) = self.resolve_key(&packet) {
                        let flags = read_u32(&packet.extras)?;
                        self.cas.insert(key.clone(), packet.cas);
                        self.items.insert(key, CacheItem::new(flags, packet.value));
                    }
                }
                Ok(Progress::Continue)
            }
            other => Err(ParseError::UnexpectedOpcode {
                expected: opcode::GETKQ,
                actual: other,
            }),
        }
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug)]
pub struct StoreOperation {
    mode: StoreMode,
    key: String,
    item: CacheItem,
    expires: u32,
    cas: u64,
    state: ResponseState,
}

impl StoreOperation {
    pub(crate) fn new(mode: StoreMode, key: String, item: CacheItem, expires: u32, cas: u64) -> Self {
        Self {
            mode,
            key,
            item,
            expires,
            cas,
            state: ResponseState::default(),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }
}

impl Operation for StoreOperation {
    fn name(&self) -> &'static str {
        match self.mode {
            StoreMode::Add => "add",
            StoreMode::Replace => "replace",
            StoreMode::Set => "set",
        }
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(self.mode.opcode())
            .with_extras(store_extras(self.item.flags, self.expires))
            .with_key(Bytes::copy_from_slice(self.key.as_bytes()))
            .with_value(self.item.data.clone())
            .with_cas(self.cas)
            .with_opaque(opaque)
            .serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, self.mode.opcode())?;
        self.state.absorb(&packet);
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Mutate
// ============================================================================

#[derive(Debug)]
pub struct MutateOperation {
    mode: MutationMode,
    key: String,
    default_value: u64,
    delta: u64,
    expires: u32,
    cas: u64,
    state: ResponseState,
    value: Option<u64>,
}

impl MutateOperation {
    pub(crate) fn new(
        mode: MutationMode,
        key: String,
        default_value: u64,
        delta: u64,
        expires: u32,
        cas: u64,
    ) -> Self {
        Self {
            mode,
            key,
            default_value,
            delta,
            expires,
            cas,
            state: ResponseState::default(),
            value: None,
        }
    }

    /// The counter value after the mutation.
    pub fn value(&self) -> Option<u64> {
        self.value
    }
}

impl Operation for MutateOperation {
    fn name(&self) -> &'static str {
        match self.mode {
            MutationMode::Increment => "increment",
            MutationMode::Decrement => "decrement",
        }
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(self.mode.opcode())
            .with_extras(mutate_extras(self.delta, self.default_value, self.expires))
            .with_key(Bytes::copy_from_slice(self.key.as_bytes()))
            .with_cas(self.cas)
            .with_opaque(opaque)
            .serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, self.mode.opcode())?;
        self.state.absorb(&packet);
        if self.state.status().is_ok() {
            self.value = Some(read_u64(&packet.value)?);
        }
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Concat
// ============================================================================

#[derive(Debug)]
pub struct ConcatOperation {
    mode: ConcatMode,
    key: String,
    cas: u64,
    data: Bytes,
    state: ResponseState,
}

impl ConcatOperation {
    pub(crate) fn new(mode: ConcatMode, key: String, cas: u64, data: Bytes) -> Self {
        Self {
            mode,
            key,
            cas,
            data,
            state: ResponseState::default(),
        }
    }
}

impl Operation for ConcatOperation {
    fn name(&self) -> &'static str {
        match self.mode {
            ConcatMode::Append => "append",
            ConcatMode::Prepend => "prepend",
        }
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(self.mode.opcode())
            .with_key(Bytes::copy_from_slice(self.key.as_bytes()))
            .with_value(self.data.clone())
            .with_cas(self.cas)
            .with_opaque(opaque)
            .serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, self.mode.opcode())?;
        self.state.absorb(&packet);
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Delete
// ============================================================================

#[derive(Debug)]
pub struct DeleteOperation {
    key: String,
    cas: u64,
    state: ResponseState,
}

impl DeleteOperation {
    pub(crate) fn new(key: String, cas: u64) -> Self {
        Self {
            key,
            cas,
            state: ResponseState::default(),
        }
    }
}

impl Operation for DeleteOperation {
    fn name(&self) -> &'static str {
        "delete"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(opcode::DELETE)
            .with_key(Bytes::copy_from_slice(self.key.as_bytes()))
            .with_cas(self.cas)
            .with_opaque(opaque)
            .serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, opcode::DELETE)?;
        self.state.absorb(&packet);
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Flush / Noop
// ============================================================================

#[derive(Debug)]
pub struct FlushOperation {
    delay: u32,
    state: ResponseState,
}

impl FlushOperation {
    pub(crate) fn new(delay: u32) -> Self {
        Self {
            delay,
            state: ResponseState::default(),
        }
    }
}

impl Operation for FlushOperation {
    fn name(&self) -> &'static str {
        "flush"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        let mut packet = Packet::request(opcode::FLUSH).with_opaque(opaque);
        if self.delay > 0 {
            packet = packet.with_extras(flush_extras(self.delay));
        }
        packet.serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, opcode::FLUSH)?;
        self.state.absorb(&packet);
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

/// Round-trip probe used to check whether a dead server is back.
#[derive(Debug, Default)]
pub struct NoopOperation {
    state: ResponseState,
}

impl NoopOperation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operation for NoopOperation {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        Packet::request(opcode::NOOP).with_opaque(opaque).serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, opcode::NOOP)?;
        self.state.absorb(&packet);
        Ok(Progress::Done)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Stat query. The server streams one packet per statistic and ends with a
/// packet carrying an empty key.
#[derive(Debug)]
pub struct StatsOperation {
    type_filter: Option<String>,
    state: ResponseState,
    stats: HashMap<String, String>,
}

impl StatsOperation {
    pub(crate) fn new(type_filter: Option<String>) -> Self {
        Self {
            type_filter,
            state: ResponseState::default(),
            stats: HashMap::new(),
        }
    }

    pub fn stats(&self) -> &HashMap<String, String> {
        &self.stats
    }

    pub fn take_stats(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.stats)
    }
}

impl Operation for StatsOperation {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn encode(&self, buf: &mut BytesMut, opaque: u32) {
        let mut packet = Packet::request(opcode::STAT).with_opaque(opaque);
        if let Some(filter) = &self.type_filter {
            packet = packet.with_key(Bytes::copy_from_slice(filter.as_bytes()));
        }
        packet.serialize_into(buf);
    }

    fn handle(&mut self, packet: Packet) -> ParseResult<Progress> {
        expect_opcode(&packet, opcode::STAT)?;
        if packet.status() != crate::protocol::status::NO_ERROR {
            self.state.absorb(&packet);
            return Ok(Progress::Done);
        }
        if packet.key.is_empty() {
            self.state.complete();
            return Ok(Progress::Done);
        }
        self.stats.insert(
            String::from_utf8_lossy(&packet.key).into_owned(),
            String::from_utf8_lossy(&packet.value).into_owned(),
        );
        Ok(Progress::Continue)
    }

    fn state(&self) -> &ResponseState {
        &self.state
    }
}
