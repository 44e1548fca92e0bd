//! Typed Operation Results
//!
//! Every dispatched command ends in an [`OperationResult`]. The result is an
//! immutable value: it is built once through [`OperationResult::pass`] or
//! [`OperationResult::fail`] and only read afterwards.
//!
//! Two rules hold for every result kind:
//! - `status().is_ok()` if and only if `success()` is true
//! - a failed result always carries a CAS of 0

use crate::protocol::status;
use std::fmt;

/// Outcome classifier for a dispatched operation.
///
/// Server statuses map one-to-one onto the wire values. The client-side
/// categories live at `0xff01..` so they can never be confused with a
/// status sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumeric,
    UnknownCommand,
    OutOfMemory,
    /// A status the client has no name for.
    Server(u16),
    /// Acquire timeout, I/O failure or undecodable response.
    TransportError,
    /// No live endpoint owns the key.
    NoAvailableNode,
    /// The operation failed before reaching the network.
    LocalFailure,
    /// The owning endpoint is marked dead and refused the command.
    NodeDead,
}

impl StatusCode {
    pub const TRANSPORT_ERROR: u16 = 0xff01;
    pub const NO_AVAILABLE_NODE: u16 = 0xff02;
    pub const LOCAL_FAILURE: u16 = 0xff03;
    pub const NODE_DEAD: u16 = 0xff04;

    /// Maps a status received from the server.
    pub fn from_wire(code: u16) -> Self {
        match code {
            status::NO_ERROR => StatusCode::Ok,
            status::KEY_NOT_FOUND => StatusCode::KeyNotFound,
            status::KEY_EXISTS => StatusCode::KeyExists,
            status::VALUE_TOO_LARGE => StatusCode::ValueTooLarge,
            status::INVALID_ARGUMENTS => StatusCode::InvalidArguments,
            status::ITEM_NOT_STORED => StatusCode::ItemNotStored,
            status::NON_NUMERIC => StatusCode::NonNumeric,
            status::UNKNOWN_COMMAND => StatusCode::UnknownCommand,
            status::OUT_OF_MEMORY => StatusCode::OutOfMemory,
            other => StatusCode::Server(other),
        }
    }

    /// Numeric value of the status. Zero means success.
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => status::NO_ERROR,
            StatusCode::KeyNotFound => status::KEY_NOT_FOUND,
            StatusCode::KeyExists => status::KEY_EXISTS,
            StatusCode::ValueTooLarge => status::VALUE_TOO_LARGE,
            StatusCode::InvalidArguments => status::INVALID_ARGUMENTS,
            StatusCode::ItemNotStored => status::ITEM_NOT_STORED,
            StatusCode::NonNumeric => status::NON_NUMERIC,
            StatusCode::UnknownCommand => status::UNKNOWN_COMMAND,
            StatusCode::OutOfMemory => status::OUT_OF_MEMORY,
            StatusCode::Server(code) => *code,
            StatusCode::TransportError => Self::TRANSPORT_ERROR,
            StatusCode::NoAvailableNode => Self::NO_AVAILABLE_NODE,
            StatusCode::LocalFailure => Self::LOCAL_FAILURE,
            StatusCode::NodeDead => Self::NODE_DEAD,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code() == status::NO_ERROR
    }

    /// True for statuses produced by the client rather than by a server.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            StatusCode::TransportError
                | StatusCode::NoAvailableNode
                | StatusCode::LocalFailure
                | StatusCode::NodeDead
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "ok",
            StatusCode::KeyNotFound => "not found",
            StatusCode::KeyExists => "exists",
            StatusCode::ValueTooLarge => "value too large",
            StatusCode::InvalidArguments => "invalid arguments",
            StatusCode::ItemNotStored => "not stored",
            StatusCode::NonNumeric => "non-numeric value",
            StatusCode::UnknownCommand => "unknown command",
            StatusCode::OutOfMemory => "out of memory",
            StatusCode::Server(code) => return write!(f, "server status {:#06x}", code),
            StatusCode::TransportError => "transport error",
            StatusCode::NoAvailableNode => "no available node",
            StatusCode::LocalFailure => "local failure",
            StatusCode::NodeDead => "node dead",
        };
        f.write_str(name)
    }
}

/// Outcome of dispatching one command.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T = ()> {
    success: bool,
    cas: u64,
    status: StatusCode,
    message: Option<String>,
    inner: Option<Box<OperationResult>>,
    value: Option<T>,
}

/// Result of a Set/Add/Replace.
pub type StoreResult = OperationResult;
/// Result of a single-key Get.
pub type GetResult<T> = OperationResult<T>;
/// Result of Increment/Decrement, carrying the new counter value.
pub type MutateResult = OperationResult<u64>;
/// Result of Append/Prepend.
pub type ConcatResult = OperationResult;
/// Result of a Delete.
pub type RemoveResult = OperationResult;

impl<T> OperationResult<T> {
    /// A successful outcome.
    pub fn pass(cas: u64, value: Option<T>) -> Self {
        Self {
            success: true,
            cas,
            status: StatusCode::Ok,
            message: None,
            inner: None,
            value,
        }
    }

    /// A failed outcome. The CAS is forced to 0.
    ///
    /// Passing `StatusCode::Ok` here is a programming error; it is turned into
    /// a `LocalFailure` so the status/success pairing can never disagree.
    pub fn fail(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_ok() {
            StatusCode::LocalFailure
        } else {
            status
        };
        Self {
            success: false,
            cas: 0,
            status,
            message: Some(message.into()),
            inner: None,
            value: None,
        }
    }

    /// Attaches the lower-level result that caused this one.
    pub fn with_inner(mut self, inner: OperationResult) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn inner(&self) -> Option<&OperationResult> {
        self.inner.as_deref()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Drops the value, keeping the status fields.
    pub fn without_value(&self) -> OperationResult {
        OperationResult {
            success: self.success,
            cas: self.cas,
            status: self.status,
            message: self.message.clone(),
            inner: self.inner.clone(),
            value: None,
        }
    }

    /// Replaces the value, keeping the status fields. A failed result stays
    /// valueless.
    pub fn with_value<U>(self, value: Option<U>) -> OperationResult<U> {
        OperationResult {
            value: if self.success { value } else { None },
            success: self.success,
            cas: self.cas,
            status: self.status,
            message: self.message,
            inner: self.inner,
        }
    }

    /// Converts the value, keeping the status fields.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            success: self.success,
            cas: self.cas,
            status: self.status,
            message: self.message,
            inner: self.inner,
            value: self.value.map(f),
        }
    }
}

impl<T> fmt::Display for OperationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "ok (cas {})", self.cas)
        } else {
            match &self.message {
                Some(message) => write!(f, "failed: {} ({})", self.status, message),
                None => write!(f, "failed: {}", self.status),
            }
        }
    }
}

/// A value paired with the CAS token it was read with.
#[derive(Debug, Clone, PartialEq)]
pub struct CasValue<T> {
    pub value: T,
    pub cas: u64,
}
