//! # Error Taxonomy
//!
//! Purpose: Describe every way a cache operation can fail, grouped by what
//! the failure does to the connection that experienced it.
//!
//! ## Design Principles
//! 1. **One Enum**: Callers match on a single `McError` instead of nested types.
//! 2. **Connection-Aware**: `is_disconnecting` tells whether the socket was dropped.
//! 3. **Expected Misses Are Not Errors**: missing keys and failed preconditions
//!    are reported through outcome enums, never through `McError`.

use std::io;

use thiserror::Error;

/// Result alias used across the workspace.
pub type McResult<T> = Result<T, McError>;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum McError {
    /// The client has no server connections to route to.
    #[error("no server available")]
    NoServers,

    /// Host/port could not be resolved to a socket address.
    #[error("failed to resolve {peer}: {source}")]
    Resolve {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// Socket creation or connect failed; the connection stays disconnected.
    #[error("failed to connect socket to {peer}: {source}")]
    Connect {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// Send or receive failed; the connection was dropped.
    #[error("transport failure talking to {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// Bytes on the wire did not match the expected framing; the connection
    /// was dropped because the stream can no longer be trusted.
    #[error("protocol error from {peer}: {reason}")]
    Protocol { peer: String, reason: String },

    /// Binary protocol returned a non-success status that is not a
    /// precondition outcome.
    #[error("server error (status {status:#06x}): {message}")]
    Server { status: u16, message: String },

    /// Key is empty, too long, or contains bytes the protocol cannot carry.
    #[error("malformed key")]
    MalformedKey,

    /// Value length does not fit the protocol's length fields.
    #[error("value of {size} bytes is too large to encode")]
    ValueTooLarge { size: usize },

    /// Growing the item's data buffer failed.
    #[error("failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    /// No room for a value the server is already sending; the connection
    /// was dropped because the unread bytes would desynchronize the stream.
    #[error("failed to allocate {requested} bytes for a value from {peer}")]
    ValueAllocation { peer: String, requested: usize },
}

impl McError {
    /// Returns true when this error class leaves the connection disconnected.
    pub fn is_disconnecting(&self) -> bool {
        matches!(
            self,
            McError::Connect { .. }
                | McError::Transport { .. }
                | McError::Protocol { .. }
                | McError::ValueAllocation { .. }
        )
    }
}
