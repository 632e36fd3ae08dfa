//! # Codec Strategy
//!
//! Purpose: One interface for the two wire protocols so the client picks its
//! implementation once at construction instead of branching on every call.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `BinaryCodec` and `TextCodec` implement `Codec`.
//! 2. **Connection In, Outcome Out**: codecs drive a connected
//!    `ServerConnection` and never reconnect on their own.

use memc_common::{
    validate_key, GetOutcome, Item, McError, McResult, Protocol, StoreCommand, StoreOutcome,
};

use crate::binary::BinaryCodec;
use crate::connection::ServerConnection;
use crate::text::TextCodec;

/// Request encoder / response decoder for one wire protocol.
pub trait Codec: Send + Sync {
    /// Protocol implemented by this codec.
    fn protocol(&self) -> Protocol;

    /// Rejects keys the protocol cannot carry, before any socket I/O.
    fn validate_key(&self, key: &[u8]) -> McResult<()> {
        validate_key(key)
    }

    /// Fetches `item.key()` into the item's data buffer.
    fn get(&self, conn: &mut ServerConnection, item: &mut Item) -> McResult<GetOutcome>;

    /// Stores the item with add/set/replace semantics.
    fn store(
        &self,
        conn: &mut ServerConnection,
        cmd: StoreCommand,
        item: &Item,
    ) -> McResult<StoreOutcome>;
}

/// Returns the codec for `protocol`.
pub fn codec_for(protocol: Protocol) -> Box<dyn Codec> {
    match protocol {
        Protocol::Binary => Box::new(BinaryCodec),
        Protocol::Textual => Box::new(TextCodec),
    }
}

/// Sizes the item for an incoming value, dropping the connection on failure
/// since the value bytes are still pending on the socket.
pub(crate) fn prepare_value(conn: &mut ServerConnection, item: &mut Item, len: usize) -> McResult<()> {
    if item.resize_to_fit(len).is_ok() {
        return Ok(());
    }
    let err = McError::ValueAllocation {
        peer: conn.peer_name().to_string(),
        requested: len,
    };
    conn.abandon(&err);
    Err(err)
}
