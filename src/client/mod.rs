//! Client Surface
//!
//! ## Modules
//!
//! - `dispatch`: the async `MemcachedClient` and its builder
//! - `blocking`: `BlockingClient`, a synchronous facade
//! - `transcoder`: value <-> stored item conversion
//! - `key`: key validation and transformation
//! - `expiration`: expiration encoding
//! - `stats`: merged server statistics

pub mod blocking;
pub mod dispatch;
pub mod expiration;
pub mod key;
pub mod stats;
pub mod transcoder;

pub use blocking::BlockingClient;
pub use dispatch::{ClientBuilder, MemcachedClient};
pub use expiration::{Expiration, ExpirationError};
pub use key::{
    DefaultKeyTransformer, KeyError, KeyTransformer, Md5KeyTransformer, PrefixKeyTransformer,
};
pub use stats::ServerStats;
pub use transcoder::{DefaultTranscoder, TranscodeError, Transcoder, Value};
