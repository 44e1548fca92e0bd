//! Memcached Binary Protocol Data Types
//!
//! This module defines the packet layout of memcached's binary protocol.
//! Requests and responses share the same framing, so a single [`Packet`]
//! type is used for both directions.
//!
//! ## Packet Format
//!
//! Every packet starts with a fixed 24-byte header. All multi-byte integers
//! are big-endian (network order).
//!
//! ```text
//!  Byte/     0       |       1       |       2       |       3       |
//!     /              |               |               |               |
//!    |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//!    +---------------+---------------+---------------+---------------+
//!   0| Magic         | Opcode        | Key length                    |
//!    +---------------+---------------+---------------+---------------+
//!   4| Extras length | Data type     | vbucket id / Status           |
//!    +---------------+---------------+---------------+---------------+
//!   8| Total body length                                             |
//!    +---------------+---------------+---------------+---------------+
//!  12| Opaque                                                        |
//!    +---------------+---------------+---------------+---------------+
//!  16| CAS                                                           |
//!    |                                                               |
//!    +---------------+---------------+---------------+---------------+
//!  24| Extras, Key, Value (total body length bytes)                  |
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 24;

/// Magic bytes identifying the direction of a packet.
pub mod magic {
    pub const REQUEST: u8 = 0x80;
    pub const RESPONSE: u8 = 0x81;
}

/// Command opcodes.
pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const QUIT: u8 = 0x07;
    pub const FLUSH: u8 = 0x08;
    pub const GETQ: u8 = 0x09;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const GETK: u8 = 0x0c;
    pub const GETKQ: u8 = 0x0d;
    pub const APPEND: u8 = 0x0e;
    pub const PREPEND: u8 = 0x0f;
    pub const STAT: u8 = 0x10;
}

/// Response status values reported by the server.
pub mod status {
    pub const NO_ERROR: u16 = 0x0000;
    pub const KEY_NOT_FOUND: u16 = 0x0001;
    pub const KEY_EXISTS: u16 = 0x0002;
    pub const VALUE_TOO_LARGE: u16 = 0x0003;
    pub const INVALID_ARGUMENTS: u16 = 0x0004;
    pub const ITEM_NOT_STORED: u16 = 0x0005;
    pub const NON_NUMERIC: u16 = 0x0006;
    pub const UNKNOWN_COMMAND: u16 = 0x0081;
    pub const OUT_OF_MEMORY: u16 = 0x0082;
}

/// Raw data type, the only one defined by the protocol.
pub const DATA_TYPE_RAW: u8 = 0x00;

/// A single binary protocol packet (request or response).
///
/// The body sections are kept as [`Bytes`] so a decoded packet can hand its
/// value to the caller without copying it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: u8,
    pub opcode: u8,
    pub data_type: u8,
    /// vbucket id in requests, status in responses.
    pub vbucket_or_status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Packet {
    /// Creates an empty request packet for the given opcode.
    pub fn request(opcode: u8) -> Self {
        Self::with_magic(magic::REQUEST, opcode, 0)
    }

    /// Creates an empty response packet for the given opcode and status.
    pub fn response(opcode: u8, status: u16) -> Self {
        Self::with_magic(magic::RESPONSE, opcode, status)
    }

    fn with_magic(magic: u8, opcode: u8, vbucket_or_status: u16) -> Self {
        Self {
            magic,
            opcode,
            data_type: DATA_TYPE_RAW,
            vbucket_or_status,
            opaque: 0,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    /// Returns true for packets sent by a server.
    pub fn is_response(&self) -> bool {
        self.magic == magic::RESPONSE
    }

    /// The response status. Only meaningful for response packets.
    pub fn status(&self) -> u16 {
        self.vbucket_or_status
    }

    /// Total length of extras, key and value.
    pub fn body_len(&self) -> usize {
        self.extras.len() + self.key.len() + self.value.len()
    }

    /// Serializes the packet to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body_len());
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the packet into an existing buffer.
    ///
    /// Callers batching several requests (multi-get) reuse one buffer for the
    /// whole batch.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN + self.body_len());
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key.len() as u16);
        buf.put_u8(self.extras.len() as u8);
        buf.put_u8(self.data_type);
        buf.put_u16(self.vbucket_or_status);
        buf.put_u32(self.body_len() as u32);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
        buf.put_slice(&self.extras);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.is_response() { "response" } else { "request" };
        write!(
            f,
            "{} opcode={:#04x} status={:#06x} key={:?} extras={}B value={}B cas={}",
            direction,
            self.opcode,
            self.vbucket_or_status,
            String::from_utf8_lossy(&self.key),
            self.extras.len(),
            self.value.len(),
            self.cas
        )
    }
}

/// Extras for Set/Add/Replace: flags followed by expiration.
pub fn store_extras(flags: u32, expiration: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32(flags);
    buf.put_u32(expiration);
    buf.freeze()
}

/// Extras for Increment/Decrement: delta, initial value, expiration.
pub fn mutate_extras(delta: u64, initial: u64, expiration: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u64(delta);
    buf.put_u64(initial);
    buf.put_u32(expiration);
    buf.freeze()
}

/// Extras for Flush: the delay before the flush takes effect.
pub fn flush_extras(expiration: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(expiration);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let packet = Packet::request(opcode::GET)
            .with_key(Bytes::from("foo"))
            .with_opaque(0xdead_beef);
        let bytes = packet.serialize();

        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(bytes[0], magic::REQUEST);
        assert_eq!(bytes[1], opcode::GET);
        assert_eq!(&bytes[2..4], &[0x00, 0x03]);
        assert_eq!(bytes[4], 0);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 3]);
        assert_eq!(&bytes[12..16], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&bytes[24..], b"foo");
    }

    #[test]
    fn test_set_request_body_order() {
        let packet = Packet::request(opcode::SET)
            .with_extras(store_extras(0xfa52, 300))
            .with_key(Bytes::from("k"))
            .with_value(Bytes::from("value"))
            .with_cas(42);
        let bytes = packet.serialize();

        // body = 8 extras + 1 key + 5 value
        assert_eq!(&bytes[8..12], &[0, 0, 0, 14]);
        assert_eq!(&bytes[16..24], &42u64.to_be_bytes());
        assert_eq!(&bytes[24..28], &0xfa52u32.to_be_bytes());
        assert_eq!(&bytes[28..32], &300u32.to_be_bytes());
        assert_eq!(&bytes[32..33], b"k");
        assert_eq!(&bytes[33..], b"value");
    }

    #[test]
    fn test_mutate_extras_layout() {
        let extras = mutate_extras(2, 100, 0xffff_ffff);
        assert_eq!(extras.len(), 20);
        assert_eq!(&extras[..8], &2u64.to_be_bytes());
        assert_eq!(&extras[8..16], &100u64.to_be_bytes());
        assert_eq!(&extras[16..], &[0xff; 4]);
    }

    #[test]
    fn test_response_status() {
        let packet = Packet::response(opcode::DELETE, status::KEY_NOT_FOUND);
        assert!(packet.is_response());
        assert_eq!(packet.status(), status::KEY_NOT_FOUND);
        assert_eq!(&packet.serialize()[6..8], &[0x00, 0x01]);
    }
}
