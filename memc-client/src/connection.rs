//! # Server Connection
//!
//! Purpose: Own one cache node's socket, its resolved endpoint, a reusable
//! receive buffer, and the most recent failure message.
//!
//! ## Design Principles
//! 1. **Two States**: a connection is either Disconnected (`stream == None`) or
//!    Connected. Any transport or framing failure drops back to Disconnected.
//! 2. **No Hidden Reconnects**: send/receive never reconnect; the routing layer
//!    calls `ensure_connected` before each operation.
//! 3. **Buffer Reuse**: the receive buffer is allocated once and reused
//!    destructively by every operation on this connection.
//! 4. **Errors Stay Local**: `last_error` belongs to this connection and is
//!    valid until the next failure overwrites it.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use memc_common::{McError, McResult};

use crate::wire;

/// Capacity of every connection's receive buffer.
pub const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Socket-level deadlines applied on every (re)connect.
///
/// `None` keeps the fully blocking behaviour: a stalled peer stalls the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

/// One cache node.
pub struct ServerConnection {
    peer: String,
    endpoint: SocketAddr,
    options: SocketOptions,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    last_error: Option<String>,
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("peer", &self.peer)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Resolves `host:port` to the first socket address returned by the system.
pub fn resolve(host: &str, port: u16) -> McResult<SocketAddr> {
    let peer = peer_name(host, port);
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| McError::Resolve {
            peer: peer.clone(),
            source,
        })?;
    addrs.next().ok_or_else(|| McError::Resolve {
        peer,
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
    })
}

fn peer_name(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

impl ServerConnection {
    /// Resolves the endpoint once and makes a first connect attempt.
    ///
    /// A failed first connect is not an error: the connection is returned
    /// Disconnected and retried lazily before its first use.
    pub fn create(host: &str, port: u16, options: SocketOptions) -> McResult<Self> {
        let endpoint = resolve(host, port)?;
        let mut conn = ServerConnection::with_endpoint(peer_name(host, port), endpoint, options);
        if let Err(err) = conn.connect() {
            warn!(peer = %conn.peer, error = %err, "initial connect failed, will retry on use");
        }
        Ok(conn)
    }

    /// Builds a disconnected connection for an already resolved endpoint.
    pub fn with_endpoint(peer: String, endpoint: SocketAddr, options: SocketOptions) -> Self {
        ServerConnection {
            peer,
            endpoint,
            options,
            stream: None,
            buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
            last_error: None,
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Most recent failure description, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the socket, disables Nagle (best-effort) and applies deadlines.
    ///
    /// **Logic**:
    /// 1. Return early if already connected.
    /// 2. Connect, honouring `connect_timeout` when set.
    /// 3. Set `TCP_NODELAY`; a failure is logged and ignored.
    /// 4. Apply read/write timeouts; a failure there aborts the connect.
    pub fn connect(&mut self) -> McResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        match open_stream(self.endpoint, &self.options) {
            Ok(stream) => {
                debug!(peer = %self.peer, endpoint = %self.endpoint, "connected");
                self.stream = Some(stream);
                Ok(())
            }
            Err(source) => {
                self.last_error = Some(format!("Failed to connect socket: {}", source));
                Err(McError::Connect {
                    peer: self.peer.clone(),
                    source,
                })
            }
        }
    }

    /// Reconnects if the connection is currently Disconnected.
    pub fn ensure_connected(&mut self) -> McResult<()> {
        if self.stream.is_none() {
            debug!(peer = %self.peer, "reconnecting");
            return self.connect();
        }
        Ok(())
    }

    /// Closes the socket if open. Idempotent.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(peer = %self.peer, "disconnected");
        }
    }

    /// Records a message without touching the socket.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Records a framing violation, drops the socket, and returns the error.
    pub fn protocol_failure(&mut self, reason: impl Into<String>) -> McError {
        let reason = reason.into();
        warn!(peer = %self.peer, reason = %reason, "protocol error, dropping connection");
        self.last_error = Some(format!("Protocol error: {}", reason));
        self.disconnect();
        McError::Protocol {
            peer: self.peer.clone(),
            reason,
        }
    }

    /// Abandons the in-flight response after a local failure.
    ///
    /// The unread response bytes would desynchronize the next operation, so
    /// the socket is dropped as well.
    pub fn abandon(&mut self, err: &McError) {
        self.last_error = Some(err.to_string());
        self.disconnect();
    }

    fn transport_failure(&mut self, context: &str, source: io::Error) -> McError {
        warn!(peer = %self.peer, error = %source, "{}", context);
        self.last_error = Some(format!("{}: {}", context, source));
        self.disconnect();
        McError::Transport {
            peer: self.peer.clone(),
            source,
        }
    }

    /// Full receive buffer; only bytes reported by the last receive are valid.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Sends the whole buffer.
    pub fn send_all(&mut self, data: &[u8]) -> McResult<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => wire::write_all(stream, data),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(SEND_FAILED, err))
    }

    /// Sends all segments as one gather-write, continuing after short writes.
    pub fn send_vectored(&mut self, segments: &[&[u8]]) -> McResult<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => wire::write_all_vectored(stream, segments),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(SEND_FAILED, err))
    }

    /// Fills `buffer[offset..offset + len]` from the socket.
    pub fn receive_exact(&mut self, offset: usize, len: usize) -> McResult<()> {
        let end = match offset.checked_add(len) {
            Some(end) if end <= self.buffer.len() => end,
            _ => return Err(self.protocol_failure("response does not fit the receive buffer")),
        };
        let result = match self.stream.as_mut() {
            Some(stream) => wire::read_exact(stream, &mut self.buffer[offset..end]),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(RECEIVE_FAILED, err))
    }

    /// Fills a caller-owned destination (e.g. an item's data) from the socket.
    pub fn receive_exact_into(&mut self, dst: &mut [u8]) -> McResult<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => wire::read_exact(stream, dst),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(RECEIVE_FAILED, err))
    }

    /// Fills `head` then `tail` with one scattered read plus at most one
    /// follow-up read per part.
    pub fn receive_scattered(&mut self, head: &mut [u8], tail: &mut [u8]) -> McResult<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => wire::read_scattered(stream, head, tail),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(RECEIVE_FAILED, err))
    }

    /// One read into `buffer[offset..]`; returns the number of bytes read.
    pub fn receive_some(&mut self, offset: usize) -> McResult<usize> {
        if offset >= self.buffer.len() {
            return Err(self.protocol_failure("receive buffer exhausted"));
        }
        let result = match self.stream.as_mut() {
            Some(stream) => wire::read_some(stream, &mut self.buffer[offset..]),
            None => Err(not_connected()),
        };
        result.map_err(|err| self.transport_failure(RECEIVE_FAILED, err))
    }

    /// Reads from offset 0 until a carriage return has arrived.
    ///
    /// Returns the total bytes read. Filling the whole buffer without a
    /// terminator is a protocol error.
    pub fn receive_line(&mut self) -> McResult<usize> {
        let result = match self.stream.as_mut() {
            Some(stream) => wire::read_line(stream, &mut self.buffer),
            None => Err(not_connected()),
        };
        match result {
            Ok(Some(nread)) => Ok(nread),
            Ok(None) => Err(self.protocol_failure("line terminator not found")),
            Err(err) => Err(self.transport_failure(RECEIVE_FAILED, err)),
        }
    }

    /// Reads and discards `len` bytes, a buffer-full at a time.
    pub fn receive_discard(&mut self, mut len: usize) -> McResult<()> {
        while len > 0 {
            let chunk = len.min(self.buffer.len());
            self.receive_exact(0, chunk)?;
            len -= chunk;
        }
        Ok(())
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

const SEND_FAILED: &str = "Failed to send data to server";
const RECEIVE_FAILED: &str = "Failed to receive data from server";

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "not connected")
}

fn open_stream(endpoint: SocketAddr, options: &SocketOptions) -> io::Result<TcpStream> {
    let stream = match options.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&endpoint, timeout)?,
        None => TcpStream::connect(endpoint)?,
    };
    // Disable Nagle so small request headers are not held back.
    if let Err(err) = stream.set_nodelay(true) {
        warn!(endpoint = %endpoint, error = %err, "failed to set TCP_NODELAY");
    }
    stream.set_read_timeout(options.read_timeout)?;
    stream.set_write_timeout(options.write_timeout)?;
    Ok(stream)
}
