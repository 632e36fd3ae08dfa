//! # memc Sync Client
//!
//! Purpose: Provide a blocking cache client that speaks both the textual and
//! the binary wire protocol to a set of servers, routing each key by hash.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` is the only type most callers need.
//! 2. **Strategy Pattern**: `Codec` implementations encapsulate each protocol.
//! 3. **Minimal Allocation**: requests are gathered from borrowed slices and
//!    every connection reuses one receive buffer.
//! 4. **Explicit Failure Semantics**: transport and framing errors drop the
//!    socket; expected misses are outcomes, not errors.
//!
//! ## Usage
//!
//! ```no_run
//! use memc_client::{CacheClient, GetOutcome, Item, Protocol};
//!
//! let mut client = CacheClient::new(Protocol::Binary);
//! client.add_connection("127.0.0.1", 11211)?;
//!
//! client.set(&Item::new("color", "red"))?;
//! let mut item = Item::for_key("color");
//! if client.get(&mut item)? == GetOutcome::Found {
//!     assert_eq!(item.data(), b"red");
//! }
//! # Ok::<(), memc_client::McError>(())
//! ```

mod binary;
mod client;
mod codec;
mod connection;
pub mod routing;
mod text;
mod wire;

pub use binary::BinaryCodec;
pub use client::{CacheClient, ClientConfig};
pub use codec::{codec_for, Codec};
pub use connection::{resolve, ServerConnection, SocketOptions, RECEIVE_BUFFER_SIZE};
pub use text::TextCodec;
pub use wire::GatherCursor;

pub use memc_common::{
    GetOutcome, Item, McError, McResult, Protocol, StoreCommand, StoreOutcome, MAX_KEY_LENGTH,
};
