//! # Binary Protocol Header
//!
//! Purpose: Define the fixed 24-byte request/response headers of the binary
//! cache protocol and their explicit byte-level encoding.
//!
//! ## Design Principles
//!
//! 1. **Explicit Encoding**: Every multi-byte field is converted to/from network
//!    order on its own; in-memory struct layout never has to match the wire.
//! 2. **Stack Buffers**: Headers encode into `[u8; HEADER_SIZE]` so a request
//!    can be gathered with key and value without an intermediate allocation.
//! 3. **Validate Once**: `ResponseHeader::decode` rejects a wrong magic byte so
//!    codecs only deal with well-framed headers.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Header (24 bytes total, network byte order):
//! +-------+--------+-----------+-----------+----------+------------------+
//! | magic | opcode | key_len   | extras_len| data_type| reserved/status  |
//! | 1B    | 1B     | 2B        | 1B        | 1B       | 2B               |
//! +-------+--------+-----------+-----------+----------+------------------+
//! | body_len: 4B               | opaque: 4B                              |
//! +----------------------------+-----------------------------------------+
//! | cas: 8B                                                              |
//! +----------------------------------------------------------------------+
//!
//! Store extras (8 bytes):     Get response extras (4 bytes):
//! +----------+-------------+  +----------+
//! | flags:4B | expiry:4B   |  | flags:4B |
//! +----------+-------------+  +----------+
//! ```

use crate::types::StoreCommand;

/// Magic byte marking a request packet.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte marking a response packet.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Size of every request and response header.
pub const HEADER_SIZE: usize = 24;

/// Extras length of add/set/replace requests (flags + expiration).
pub const STORE_EXTRAS_LEN: usize = 8;

/// Extras length of a get response carrying flags.
pub const GET_EXTRAS_LEN: usize = 4;

/// Data type for raw byte payloads.
pub const RAW_BYTES: u8 = 0x00;

/// Binary opcodes used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x02 => Some(Opcode::Add),
            0x03 => Some(Opcode::Replace),
            _ => None,
        }
    }
}

impl From<StoreCommand> for Opcode {
    fn from(cmd: StoreCommand) -> Self {
        match cmd {
            StoreCommand::Add => Opcode::Add,
            StoreCommand::Set => Opcode::Set,
            StoreCommand::Replace => Opcode::Replace,
        }
    }
}

/// Response status codes the client distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
}

impl Status {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Status::NoError),
            0x0001 => Some(Status::KeyNotFound),
            0x0002 => Some(Status::KeyExists),
            0x0003 => Some(Status::ValueTooLarge),
            0x0004 => Some(Status::InvalidArguments),
            0x0005 => Some(Status::ItemNotStored),
            0x0081 => Some(Status::UnknownCommand),
            0x0082 => Some(Status::OutOfMemory),
            _ => None,
        }
    }
}

/// Request header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub key_len: u16,
    pub extras_len: u8,
    /// Extras + key + value.
    pub body_len: u32,
    pub cas: u64,
}

impl RequestHeader {
    /// Builds a get request header for a key of `key_len` bytes.
    pub fn get(key_len: u16) -> Self {
        RequestHeader {
            opcode: Opcode::Get,
            key_len,
            extras_len: 0,
            body_len: u32::from(key_len),
            cas: 0,
        }
    }

    /// Builds a store request header; the body carries extras, key and value.
    pub fn store(cmd: StoreCommand, key_len: u16, value_len: u32, cas: u64) -> Self {
        RequestHeader {
            opcode: Opcode::from(cmd),
            key_len,
            extras_len: STORE_EXTRAS_LEN as u8,
            body_len: STORE_EXTRAS_LEN as u32 + u32::from(key_len) + value_len,
            cas,
        }
    }

    /// Encodes the header in network byte order.
    ///
    /// Data type, reserved and opaque are always zero.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = REQUEST_MAGIC;
        buf[1] = self.opcode.as_u8();
        buf[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        buf[4] = self.extras_len;
        buf[5] = RAW_BYTES;
        // 6..8 reserved, 12..16 opaque
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        buf
    }
}

/// Encodes the 8-byte extras block of a store request.
///
/// Flags are always transmitted as zero for wire compatibility with existing
/// deployments; only the expiration is taken from the caller.
pub fn encode_store_extras(exptime: u32) -> [u8; STORE_EXTRAS_LEN] {
    let mut buf = [0u8; STORE_EXTRAS_LEN];
    buf[4..8].copy_from_slice(&exptime.to_be_bytes());
    buf
}

/// Decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    /// Decodes a response header, rejecting a wrong magic byte.
    ///
    /// Returns `None` when `data` is shorter than `HEADER_SIZE` or the magic
    /// byte is not `RESPONSE_MAGIC`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE || data[0] != RESPONSE_MAGIC {
            return None;
        }
        Some(ResponseHeader {
            opcode: data[1],
            key_len: u16::from_be_bytes([data[2], data[3]]),
            extras_len: data[4],
            data_type: data[5],
            status: u16::from_be_bytes([data[6], data[7]]),
            body_len: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            opaque: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            cas: u64::from_be_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }

    /// Encodes the header; used by test servers speaking the binary protocol.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = RESPONSE_MAGIC;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_len.to_be_bytes());
        buf[4] = self.extras_len;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.status.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        buf
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::NoError as u16
    }

    /// Value bytes following extras and key in the body.
    ///
    /// Returns `None` when the declared lengths are inconsistent.
    pub fn value_len(&self) -> Option<usize> {
        (self.body_len as usize)
            .checked_sub(self.extras_len as usize)?
            .checked_sub(self.key_len as usize)
    }
}
