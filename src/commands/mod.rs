//! Command Model
//!
//! This module holds the protocol commands the client can run and the typed
//! results they turn into.
//!
//! ## Architecture
//!
//! ```text
//!   Dispatch layer
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ OperationFactory │  builds a single-use command
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Operation        │  encode() / handle(packet)
//! └────────┬─────────┘
//!          │  executed by a node
//!          ▼
//! ┌──────────────────┐
//! │ OperationResult  │  success, cas, status, value
//! └──────────────────┘
//! ```
//!
//! ## Commands
//!
//! - `Get`, `MultiGet` (GetKQ batch + Noop)
//! - `Store` (Add / Replace / Set)
//! - `Mutate` (Increment / Decrement)
//! - `Concat` (Append / Prepend)
//! - `Delete`, `Flush`, `Stats`, `Noop`

pub mod factory;
pub mod operation;
pub mod results;

pub use factory::OperationFactory;
pub use operation::{
    CacheItem, ConcatMode, MutationMode, Operation, Progress, ResponseState, StoreMode,
};
pub use results::{
    CasValue, ConcatResult, GetResult, MutateResult, OperationResult, RemoveResult, StatusCode,
    StoreResult,
};
