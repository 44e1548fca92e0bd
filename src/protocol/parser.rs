//! Incremental Binary Packet Parser
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((packet, consumed)))` - a complete packet was decoded, `consumed` bytes were used
//! - `Ok(None)` - the packet is incomplete, read more data and try again
//! - `Err(ParseError)` - the stream is corrupt and the connection must be dropped
//!
//! Connections append socket reads to a `BytesMut`, call [`PacketParser::parse`],
//! and advance the buffer by `consumed` on success. The fixed header makes
//! incompleteness cheap to detect: nothing is decoded until the whole body
//! is buffered.

use crate::protocol::types::{magic, Packet, HEADER_LEN};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding packets.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// First byte was neither the request nor the response magic
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    /// Extras and key lengths do not fit in the declared body
    #[error("invalid body layout: extras {extras} + key {key} > body {body}")]
    InvalidBodyLength { extras: usize, key: usize, body: usize },

    /// The body exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A response arrived for a different command than the one in flight
    #[error("unexpected opcode: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    /// A response carried the opaque of another request
    #[error("unexpected opaque: expected {expected}, got {actual}")]
    UnexpectedOpaque { expected: u32, actual: u32 },

    /// Protocol violation (malformed extras, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum body size accepted from the wire (memcached's default item limit
/// plus headroom for key and extras).
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Incremental parser for binary protocol packets.
#[derive(Debug, Clone)]
pub struct PacketParser {
    /// Which magic byte this side of the connection expects.
    expected_magic: Option<u8>,
    max_body: usize,
}

impl Default for PacketParser {
    fn default() -> Self {
        Self {
            expected_magic: None,
            max_body: MAX_BODY_SIZE,
        }
    }
}

impl PacketParser {
    /// Creates a parser accepting both requests and responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that only accepts server responses.
    pub fn responses() -> Self {
        Self {
            expected_magic: Some(magic::RESPONSE),
            ..Self::default()
        }
    }

    /// Creates a parser that only accepts client requests.
    pub fn requests() -> Self {
        Self {
            expected_magic: Some(magic::REQUEST),
            ..Self::default()
        }
    }

    /// Overrides the maximum body size.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Attempts to parse one packet from the buffer.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Packet, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let first = buf[0];
        let magic_ok = match self.expected_magic {
            Some(expected) => first == expected,
            None => first == magic::REQUEST || first == magic::RESPONSE,
        };
        if !magic_ok {
            return Err(ParseError::InvalidMagic(first));
        }

        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let key_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let extras_len = buf[4] as usize;
        let body_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;

        if body_len > self.max_body {
            return Err(ParseError::MessageTooLarge {
                size: body_len,
                max: self.max_body,
            });
        }
        if extras_len + key_len > body_len {
            return Err(ParseError::InvalidBodyLength {
                extras: extras_len,
                key: key_len,
                body: body_len,
            });
        }

        let total = HEADER_LEN + body_len;
        if buf.len() < total {
            return Ok(None);
        }

        let body = &buf[HEADER_LEN..total];
        let (extras, rest) = body.split_at(extras_len);
        let (key, value) = rest.split_at(key_len);

        let packet = Packet {
            magic: first,
            opcode: buf[1],
            data_type: buf[5],
            vbucket_or_status: u16::from_be_bytes([buf[6], buf[7]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
            extras: Bytes::copy_from_slice(extras),
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        };

        Ok(Some((packet, total)))
    }
}

/// Helper function to parse a single packet with the permissive parser.
pub fn parse_packet(buf: &[u8]) -> ParseResult<Option<(Packet, usize)>> {
    PacketParser::new().parse(buf)
}

/// Reads a big-endian u32 from the start of `data`.
pub fn read_u32(data: &[u8]) -> ParseResult<u32> {
    data.get(..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ParseError::ProtocolError(format!("expected 4 bytes, got {}", data.len())))
}

/// Reads a big-endian u64 from the start of `data`.
pub fn read_u64(data: &[u8]) -> ParseResult<u64> {
    data.get(..8)
        .map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            u64::from_be_bytes(raw)
        })
        .ok_or_else(|| ParseError::ProtocolError(format!("expected 8 bytes, got {}", data.len())))
}
