//! Value Transcoding
//!
//! Converts caller values to the `(flags, bytes)` pairs stored on the server
//! and back. The flags record the value's type so a later get returns the
//! same kind of value.
//!
//! | Value       | Flags              | Payload                     |
//! |-------------|--------------------|-----------------------------|
//! | `Bytes`     | `0xfa52`           | raw bytes                   |
//! | `String`    | `0x0100 \| 18`     | UTF-8                       |
//! | `Integer`   | `0x0100 \| 11`     | ASCII decimal               |
//! | `UInteger`  | `0x0100 \| 12`     | ASCII decimal               |
//! | `Bool`      | `0x0100 \| 3`      | `1` or `0`                  |
//!
//! Integers are stored as ASCII so increment/decrement work on them. Items
//! created by the server (counters seeded by a mutate) carry flags `0` and
//! decode as a string when they are valid UTF-8.

use crate::commands::operation::CacheItem;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// memcached's default item size limit.
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

pub const RAW_DATA_FLAG: u32 = 0xfa52;
const TYPE_FLAG: u32 = 0x0100;

mod type_code {
    pub const BOOLEAN: u32 = 3;
    pub const INT64: u32 = 11;
    pub const UINT64: u32 = 12;
    pub const STRING: u32 = 18;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TranscodeError {
    #[error("item is {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("stored string is not valid UTF-8")]
    InvalidUtf8,

    #[error("stored value {0:?} is not a valid number")]
    InvalidNumber(String),
}

/// A value that can be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    String(String),
    Integer(i64),
    UInteger(u64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Reads the value as a counter. Strings are parsed, so counters created
    /// by the server can be read too.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInteger(n) => Some(*n),
            Value::Integer(n) => u64::try_from(*n).ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::UInteger(n) => i64::try_from(*n).ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The payload bytes as they would be stored.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            Value::Integer(n) => Bytes::from(n.to_string()),
            Value::UInteger(n) => Bytes::from(n.to_string()),
            Value::Bool(b) => Bytes::from_static(if *b { b"1" } else { b"0" }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::String(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::UInteger(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInteger(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInteger(u64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Converts between values and stored items.
pub trait Transcoder: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &Value) -> Result<CacheItem, TranscodeError>;
    fn deserialize(&self, item: CacheItem) -> Result<Value, TranscodeError>;
}

#[derive(Debug, Clone)]
pub struct DefaultTranscoder {
    max_item_size: usize,
}

impl Default for DefaultTranscoder {
    fn default() -> Self {
        Self {
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
        }
    }
}

impl DefaultTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_item_size(max_item_size: usize) -> Self {
        Self { max_item_size }
    }
}

impl Transcoder for DefaultTranscoder {
    fn serialize(&self, value: &Value) -> Result<CacheItem, TranscodeError> {
        let flags = match value {
            Value::Bytes(_) => RAW_DATA_FLAG,
            Value::String(_) => TYPE_FLAG | type_code::STRING,
            Value::Integer(_) => TYPE_FLAG | type_code::INT64,
            Value::UInteger(_) => TYPE_FLAG | type_code::UINT64,
            Value::Bool(_) => TYPE_FLAG | type_code::BOOLEAN,
        };
        let data = value.to_bytes();
        if data.len() > self.max_item_size {
            return Err(TranscodeError::TooLarge {
                size: data.len(),
                max: self.max_item_size,
            });
        }
        Ok(CacheItem::new(flags, data))
    }

    fn deserialize(&self, item: CacheItem) -> Result<Value, TranscodeError> {
        const STRING: u32 = TYPE_FLAG | type_code::STRING;
        const INT64: u32 = TYPE_FLAG | type_code::INT64;
        const UINT64: u32 = TYPE_FLAG | type_code::UINT64;
        const BOOLEAN: u32 = TYPE_FLAG | type_code::BOOLEAN;

        match item.flags {
            0 => Ok(match String::from_utf8(item.data.to_vec()) {
                Ok(s) => Value::String(s),
                Err(_) => Value::Bytes(item.data),
            }),
            STRING => String::from_utf8(item.data.to_vec())
                .map(Value::String)
                .map_err(|_| TranscodeError::InvalidUtf8),
            INT64 => parse_ascii(&item.data).map(Value::Integer),
            UINT64 => parse_ascii(&item.data).map(Value::UInteger),
            BOOLEAN => Ok(Value::Bool(item.data.first() == Some(&b'1'))),
            // Raw data, or flags written by another client.
            _ => Ok(Value::Bytes(item.data)),
        }
    }
}

/// Parses an ASCII number. memcached pads decremented counters with
/// trailing spaces, so surrounding whitespace is ignored.
fn parse_ascii<T: std::str::FromStr>(data: &[u8]) -> Result<T, TranscodeError> {
    let text = std::str::from_utf8(data).map_err(|_| TranscodeError::InvalidUtf8)?;
    text.trim()
        .parse()
        .map_err(|_| TranscodeError::InvalidNumber(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_values_keep_their_type() {
        let transcoder = DefaultTranscoder::new();
        for value in [
            Value::from("text"),
            Value::from(-12i64),
            Value::from(12u64),
            Value::from(true),
            Value::from(vec![0u8, 159, 146, 150]),
        ] {
            let item = transcoder.serialize(&value).unwrap();
            assert_eq!(transcoder.deserialize(item).unwrap(), value);
        }
    }

    #[test]
    fn test_integers_are_ascii() {
        let item = DefaultTranscoder::new().serialize(&Value::from(42u64)).unwrap();
        assert_eq!(&item.data[..], b"42");
    }

    #[test]
    fn test_server_counters_decode() {
        let transcoder = DefaultTranscoder::new();
        let value = transcoder.deserialize(CacheItem::new(0, "100")).unwrap();
        assert_eq!(value, Value::String("100".into()));
        assert_eq!(value.as_u64(), Some(100));

        // decremented counter padded by the server
        let padded = CacheItem::new(TYPE_FLAG | type_code::UINT64, "9 ");
        assert_eq!(transcoder.deserialize(padded).unwrap(), Value::UInteger(9));
    }

    #[test]
    fn test_flag_zero_binary_is_bytes() {
        let value = DefaultTranscoder::new()
            .deserialize(CacheItem::new(0, vec![0xffu8, 0xfe]))
            .unwrap();
        assert_eq!(value, Value::Bytes(Bytes::from(vec![0xffu8, 0xfe])));
    }

    #[test]
    fn test_rejects_large_items() {
        let transcoder = DefaultTranscoder::with_max_item_size(4);
        assert_eq!(
            transcoder.serialize(&Value::from("too long")),
            Err(TranscodeError::TooLarge { size: 8, max: 4 })
        );
    }

    #[test]
    fn test_bad_number() {
        let item = CacheItem::new(TYPE_FLAG | type_code::INT64, "abc");
        assert!(matches!(
            DefaultTranscoder::new().deserialize(item),
            Err(TranscodeError::InvalidNumber(_))
        ));
    }
}
