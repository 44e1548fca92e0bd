//! Key Transformation
//!
//! Every caller key passes through a [`KeyTransformer`] before it is routed.
//! The transformed key is the one hashed onto the ring and the one sent to
//! the server.

use std::fmt;
use thiserror::Error;

/// Longest key memcached accepts.
pub const MAX_KEY_LENGTH: usize = 250;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyError {
    #[error("key is empty")]
    Empty,

    #[error("key is {len} bytes long (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("key contains invalid character {ch:?}")]
    InvalidCharacter { ch: char },
}

/// Checks memcached's key rules: 1 to 250 bytes, no whitespace or control
/// characters.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(KeyError::TooLong {
            len: key.len(),
            max: MAX_KEY_LENGTH,
        });
    }
    if let Some(ch) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(KeyError::InvalidCharacter { ch });
    }
    Ok(())
}

/// Maps a caller key to the key used for routing and on the wire.
pub trait KeyTransformer: Send + Sync + fmt::Debug {
    fn transform(&self, key: &str) -> Result<String, KeyError>;
}

/// Passes keys through unchanged after validating them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyTransformer;

impl KeyTransformer for DefaultKeyTransformer {
    fn transform(&self, key: &str) -> Result<String, KeyError> {
        validate_key(key)?;
        Ok(key.to_string())
    }
}

/// Replaces each key with the hex MD5 of its bytes.
///
/// Any non-empty key becomes a valid 32-character key, so long keys and
/// keys with spaces can be used.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5KeyTransformer;

impl KeyTransformer for Md5KeyTransformer {
    fn transform(&self, key: &str) -> Result<String, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(format!("{:x}", md5::compute(key.as_bytes())))
    }
}

/// Prepends a namespace to every key.
#[derive(Debug, Clone)]
pub struct PrefixKeyTransformer {
    prefix: String,
}

impl PrefixKeyTransformer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl KeyTransformer for PrefixKeyTransformer {
    fn transform(&self, key: &str) -> Result<String, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        let namespaced = format!("{}{}", self.prefix, key);
        validate_key(&namespaced)?;
        Ok(namespaced)
    }
}
