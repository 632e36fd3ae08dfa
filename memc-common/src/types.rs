//! # Cache Item and Operation Types
//!
//! Core data types passed between callers, the routing layer, and the codecs.
//!
//! ## Design Principles
//!
//! 1. **Caller-Owned Items**: An `Item` is borrowed by every operation; a get
//!    only resizes its data buffer in place.
//! 2. **Grow, Never Shrink Capacity**: `resize_to_fit` reuses the existing
//!    allocation when it is large enough and only ever grows it otherwise.
//! 3. **Length Is Authoritative**: Keys are raw bytes with an explicit length,
//!    never terminated by a sentinel.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Item
//! +-----------+------------------+--------+----------+-----------+
//! | key: Vec  | data: Vec (grown)| flags  | exptime  | cas_id    |
//! +-----------+------------------+--------+----------+-----------+
//! | n bytes   | len <= capacity  | 4B     | 4B       | 8B        |
//! +-----------+------------------+--------+----------+-----------+
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{McError, McResult};

/// Longest key accepted by the cache server.
pub const MAX_KEY_LENGTH: usize = 250;

/// Wire protocol spoken by a client for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// CRLF-terminated ASCII command lines.
    #[default]
    Textual,
    /// Fixed 24-byte header framing.
    Binary,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Textual => write!(f, "textual"),
            Protocol::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "textual" | "ascii" => Ok(Protocol::Textual),
            "binary" | "bin" => Ok(Protocol::Binary),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Storage command variants sharing one code path in each codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCommand {
    /// Store only if the key does not exist.
    Add,
    /// Store unconditionally.
    Set,
    /// Store only if the key already exists.
    Replace,
}

impl StoreCommand {
    /// Returns the textual protocol verb.
    pub const fn verb(self) -> &'static [u8] {
        match self {
            StoreCommand::Add => b"add",
            StoreCommand::Set => b"set",
            StoreCommand::Replace => b"replace",
        }
    }
}

/// Result of a successful get round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    /// The item's data, flags and CAS were filled from the response.
    Found,
    /// The server has no value for the key.
    NotFound,
}

/// Result of a successful store round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The server stored the value.
    Stored,
    /// The server rejected the store because its precondition did not hold
    /// (add on an existing key, replace on a missing key, CAS mismatch).
    NotStored,
}

/// One cache entry, owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    key: Vec<u8>,
    data: Vec<u8>,
    flags: u32,
    exptime: u32,
    cas_id: u64,
}

impl Item {
    /// Creates an item with the given key and value, no expiration and no CAS.
    ///
    /// # Examples
    /// ```rust
    /// use memc_common::Item;
    ///
    /// let item = Item::new("color", "red").with_exptime(60);
    /// assert_eq!(item.key(), b"color");
    /// assert_eq!(item.data(), b"red");
    /// assert_eq!(item.exptime(), 60);
    /// ```
    pub fn new(key: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Item {
            key: key.into(),
            data: data.into(),
            ..Item::default()
        }
    }

    /// Creates an item with an empty data buffer, ready for a get.
    pub fn for_key(key: impl Into<Vec<u8>>) -> Self {
        Item::new(key, Vec::new())
    }

    pub fn with_exptime(mut self, exptime: u32) -> Self {
        self.exptime = exptime;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cas(mut self, cas_id: u64) -> Self {
        self.cas_id = cas_id;
        self
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the current data bytes (length is `size()`).
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consumes the item and returns its data buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn exptime(&self) -> u32 {
        self.exptime
    }

    /// Compare-and-swap token; 0 means no CAS check.
    pub fn cas_id(&self) -> u64 {
        self.cas_id
    }

    pub fn set_key(&mut self, key: impl Into<Vec<u8>>) {
        self.key = key.into();
    }

    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn set_exptime(&mut self, exptime: u32) {
        self.exptime = exptime;
    }

    pub fn set_cas_id(&mut self, cas_id: u64) {
        self.cas_id = cas_id;
    }

    /// Sizes the data buffer to exactly `len` bytes.
    ///
    /// The existing allocation is reused when its capacity is large enough;
    /// otherwise it is grown with a fallible reservation so an allocation
    /// failure surfaces as `McError::OutOfMemory` instead of aborting.
    ///
    /// **Input**: `len` (new logical size).
    /// **Output**: `Ok(())` with `size() == len`.
    ///
    /// **Logic**:
    /// 1. If capacity is short, reserve the difference exactly.
    /// 2. Resize the vector (truncating or zero-filling).
    pub fn resize_to_fit(&mut self, len: usize) -> McResult<()> {
        if len > self.data.capacity() {
            let additional = len - self.data.len();
            self.data
                .try_reserve_exact(additional)
                .map_err(|_| McError::OutOfMemory { requested: len })?;
        }
        self.data.resize(len, 0);
        Ok(())
    }
}

/// Checks the key rules shared by both protocols.
///
/// Textual keys are additionally checked by the textual codec, since the
/// ASCII framing cannot carry whitespace or control bytes.
pub fn validate_key(key: &[u8]) -> McResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(McError::MalformedKey);
    }
    Ok(())
}
