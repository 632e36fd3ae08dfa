//! # Cache Client API
//!
//! Purpose: Expose a compact, blocking get/add/set/replace API over a set of
//! cache servers, routing each key to one server connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides routing, reconnects and codecs.
//! 2. **Strategy Pattern**: the protocol codec is chosen once at construction.
//! 3. **Lazy Reconnect**: a disconnected server is reconnected right before
//!    its next operation, never inside a send or receive.
//! 4. **Per-Connection Locking**: each connection sits behind its own mutex, so
//!    different servers can be driven from different threads while operations
//!    on one server are serialized.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use memc_common::{GetOutcome, Item, McError, McResult, Protocol, StoreCommand, StoreOutcome};

use crate::codec::{codec_for, Codec};
use crate::connection::{ServerConnection, SocketOptions};
use crate::routing;

/// Configuration for the client and its server connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Wire protocol used for every server.
    pub protocol: Protocol,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl ClientConfig {
    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

/// Synchronous client routing keys over a fixed list of servers.
///
/// Servers are added with `add_connection` before the client is shared; the
/// list is read-only afterwards, so routing needs no lock.
pub struct CacheClient {
    config: ClientConfig,
    codec: Box<dyn Codec>,
    connections: Vec<Mutex<ServerConnection>>,
}

impl CacheClient {
    /// Creates a client speaking `protocol` with default socket options.
    pub fn new(protocol: Protocol) -> Self {
        Self::with_config(ClientConfig {
            protocol,
            ..ClientConfig::default()
        })
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        CacheClient {
            codec: codec_for(config.protocol),
            config,
            connections: Vec::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.codec.protocol()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Resolves `host:port` and appends a server.
    ///
    /// Fails only when resolution fails, leaving the client unchanged. A server
    /// whose first connect attempt fails is still added and retried on use.
    pub fn add_connection(&mut self, host: &str, port: u16) -> McResult<()> {
        let conn = ServerConnection::create(host, port, self.config.socket_options())?;
        info!(
            peer = %conn.peer_name(),
            index = self.connections.len(),
            connected = conn.is_connected(),
            "server added"
        );
        self.connections.push(Mutex::new(conn));
        Ok(())
    }

    /// Index of the server `key` routes to, or `None` without servers.
    pub fn server_index(&self, key: &[u8]) -> Option<usize> {
        routing::bucket(key, self.connections.len())
    }

    /// Display name of the server `key` routes to.
    pub fn peer_name(&self, key: &[u8]) -> Option<String> {
        let idx = self.server_index(key)?;
        Some(self.connections[idx].lock().peer_name().to_string())
    }

    /// Last failure message recorded by the server `key` routes to.
    pub fn last_error(&self, key: &[u8]) -> Option<String> {
        let idx = self.server_index(key)?;
        self.connections[idx].lock().last_error().map(str::to_string)
    }

    /// Whether the server `key` routes to currently holds an open socket.
    pub fn is_connected(&self, key: &[u8]) -> bool {
        match self.server_index(key) {
            Some(idx) => self.connections[idx].lock().is_connected(),
            None => false,
        }
    }

    /// Fetches the value for `item.key()` into `item`.
    ///
    /// On `Found` the item's data is sized to the value exactly and its flags
    /// and CAS token are updated. A missing key is `Ok(GetOutcome::NotFound)`.
    pub fn get(&self, item: &mut Item) -> McResult<GetOutcome> {
        self.codec.validate_key(item.key())?;
        let conn = self.route(item.key())?;
        let mut conn = conn.lock();
        conn.ensure_connected()?;
        self.codec.get(&mut conn, item)
    }

    /// Stores the item only if the key does not exist yet.
    pub fn add(&self, item: &Item) -> McResult<StoreOutcome> {
        self.store(StoreCommand::Add, item)
    }

    /// Stores the item unconditionally (subject to a non-zero CAS token).
    pub fn set(&self, item: &Item) -> McResult<StoreOutcome> {
        self.store(StoreCommand::Set, item)
    }

    /// Stores the item only if the key already exists.
    pub fn replace(&self, item: &Item) -> McResult<StoreOutcome> {
        self.store(StoreCommand::Replace, item)
    }

    fn store(&self, cmd: StoreCommand, item: &Item) -> McResult<StoreOutcome> {
        self.codec.validate_key(item.key())?;
        let conn = self.route(item.key())?;
        let mut conn = conn.lock();
        conn.ensure_connected()?;
        self.codec.store(&mut conn, cmd, item)
    }

    fn route(&self, key: &[u8]) -> McResult<&Mutex<ServerConnection>> {
        let idx = self.server_index(key).ok_or(McError::NoServers)?;
        Ok(&self.connections[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_client_has_no_servers() {
        let client = CacheClient::new(Protocol::Binary);
        assert_eq!(client.protocol(), Protocol::Binary);
        assert_eq!(client.connection_count(), 0);
        assert_eq!(client.server_index(b"alpha"), None);

        let mut item = Item::for_key("alpha");
        assert!(matches!(client.get(&mut item), Err(McError::NoServers)));
        assert!(matches!(client.set(&Item::new("alpha", "1")), Err(McError::NoServers)));
        assert!(client.last_error(b"alpha").is_none());
    }

    #[test]
    fn malformed_key_fails_before_routing() {
        let client = CacheClient::new(Protocol::Textual);
        let item = Item::new("has space", "v");
        assert!(matches!(client.add(&item), Err(McError::MalformedKey)));
    }

    #[test]
    fn unresolvable_host_leaves_client_unchanged() {
        let mut client = CacheClient::new(Protocol::Textual);
        let err = client.add_connection("host.invalid", 11211).unwrap_err();
        assert!(matches!(err, McError::Resolve { .. }));
        assert_eq!(client.connection_count(), 0);
    }

    #[test]
    fn config_defaults_to_blocking_text() {
        let config = ClientConfig::default();
        assert_eq!(config.protocol, Protocol::Textual);
        assert_eq!(config.read_timeout, None);
        let client = CacheClient::with_config(config);
        assert_eq!(client.protocol(), Protocol::Textual);
    }
}
