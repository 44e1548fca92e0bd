//! Memcached Binary Protocol Implementation
//!
//! This module implements the framing of memcached's binary protocol.
//!
//! ## Overview
//!
//! Every request and response is a packet with a fixed 24-byte header followed
//! by optional extras, key and value sections. The header carries the opcode,
//! section lengths, an opaque correlation value, the CAS token and, in
//! responses, the status code.
//!
//! ## Modules
//!
//! - `types`: Defines the `Packet` struct, opcodes, status values and serialization
//! - `parser`: Incremental parser for incoming packets
//!
//! ## Example
//!
//! ```
//! use flashmc::protocol::{opcode, parse_packet, Packet};
//! use bytes::Bytes;
//!
//! let request = Packet::request(opcode::GET).with_key(Bytes::from("name"));
//! let bytes = request.serialize();
//!
//! let (packet, consumed) = parse_packet(&bytes).unwrap().unwrap();
//! assert_eq!(consumed, bytes.len());
//! assert_eq!(packet.key, Bytes::from("name"));
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_packet, read_u32, read_u64, PacketParser, ParseError, ParseResult};
pub use types::{magic, opcode, status, Packet, HEADER_LEN};
