//! Server Connection
//!
//! One TCP connection to one memcached server. A connection runs one command
//! at a time: it writes the encoded request, then reads response packets and
//! feeds them to the command until the command reports it is done.
//!
//! ## Request Lifecycle
//!
//! ```text
//! 1. encode command into the write buffer
//!        │
//!        ▼
//! 2. write_all + flush
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Read Loop               │
//!    │                              │
//!    │  parse packet from buffer ───┼──> command.handle(packet)
//!    │        │ incomplete          │          │
//!    │        ▼                     │          ├─ Continue: loop
//!    │  read more (with timeout)    │          └─ Done: return
//!    └──────────────────────────────┘
//! ```
//!
//! ## Buffer Management
//!
//! Responses are accumulated in a BytesMut buffer. TCP may deliver a partial
//! packet or several packets at once (multi-get replies arrive pipelined), so
//! the parser only consumes complete packets and leaves the rest buffered.

use crate::cluster::locator::Endpoint;
use crate::commands::operation::{Operation, Progress};
use crate::protocol::{Packet, PacketParser, ParseError};
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors that can occur on a server connection.
///
/// Every variant leaves the connection unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Undecodable or unexpected response
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("connect to {0} timed out")]
    ConnectTimeout(Endpoint),

    #[error("no response within {0:?}")]
    ReceiveTimeout(Duration),

    /// Server closed the connection
    #[error("Connection closed by server")]
    Closed,

    /// Bytes left over after a command completed
    #[error("{0} unexpected bytes after response")]
    TrailingData(usize),
}

/// A single connection to a memcached server.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    endpoint: Endpoint,
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: PacketParser,
    receive_timeout: Duration,
    write_buf: BytesMut,
    next_opaque: u32,
}

impl Connection {
    /// Opens a connection, failing if the handshake takes longer than
    /// `connect_timeout`.
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint.address()))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout(endpoint.clone()))??;
        stream.set_nodelay(true)?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(node = %endpoint, conn = id, "Connected");

        Ok(Self {
            id,
            endpoint: endpoint.clone(),
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: PacketParser::responses(),
            receive_timeout,
            write_buf: BytesMut::with_capacity(256),
            next_opaque: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends `op` and feeds it responses until it completes.
    ///
    /// Every request gets fresh opaque values and each response must echo
    /// one of them. A dropped future leaves the connection mid-command, so
    /// callers must not reuse it after cancellation.
    pub async fn execute(&mut self, op: &mut dyn Operation) -> Result<(), ConnectionError> {
        let base = self.next_opaque;
        let span = op.opaque_span();
        self.next_opaque = base.wrapping_add(span);

        self.write_buf.clear();
        op.encode(&mut self.write_buf, base);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        trace!(
            node = %self.endpoint,
            conn = self.id,
            op = op.name(),
            bytes = self.write_buf.len(),
            "Sent request"
        );

        loop {
            let mut packet = self.read_packet().await?;
            let offset = packet.opaque.wrapping_sub(base);
            if offset >= span {
                warn!(
                    node = %self.endpoint,
                    conn = self.id,
                    expected = base,
                    actual = packet.opaque,
                    "Response for another request"
                );
                return Err(ParseError::UnexpectedOpaque {
                    expected: base,
                    actual: packet.opaque,
                }
                .into());
            }
            packet.opaque = offset;
            if op.handle(packet)? == Progress::Done {
                break;
            }
        }

        if !self.buffer.is_empty() {
            warn!(
                node = %self.endpoint,
                conn = self.id,
                remaining = self.buffer.len(),
                "Unread bytes after response"
            );
            return Err(ConnectionError::TrailingData(self.buffer.len()));
        }
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet, ConnectionError> {
        loop {
            if let Some(packet) = self.try_parse_packet()? {
                return Ok(packet);
            }
            self.read_more_data().await?;
        }
    }

    fn try_parse_packet(&mut self) -> Result<Option<Packet>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((packet, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    node = %self.endpoint,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed response"
                );
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(node = %self.endpoint, error = %e, "Parse error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::time::timeout(
            self.receive_timeout,
            self.stream.get_mut().read_buf(&mut self.buffer),
        )
        .await
        .map_err(|_| ConnectionError::ReceiveTimeout(self.receive_timeout))??;

        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        trace!(node = %self.endpoint, bytes = n, "Read data");
        Ok(())
    }
}
