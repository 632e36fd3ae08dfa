//! # Binary Protocol Codec
//!
//! Purpose: Encode get/add/set/replace as fixed-header binary requests and
//! decode the matching responses into item data and outcomes.
//!
//! ## Design Principles
//! 1. **One Gather-Write per Request**: header (+ extras), key and value go
//!    out as a single vectored send; nothing is copied into a staging buffer.
//! 2. **Header First**: the 24-byte response header is read into the
//!    connection buffer, then the body is read straight into its destination.
//! 3. **Expected Misses Are Outcomes**: "key not found" and failed store
//!    preconditions keep the connection; framing violations drop it.
//!
//! ## Response Handling
//!
//! ```text
//! get:   header ── status ok ──> [flags:4B]? value ──> item.data, item.cas
//!               └─ status err ─> message (drained) ──> NotFound / Server
//! store: header ── status ok, body 0 ──> Stored
//!               ├─ status ok, body>0 ──> protocol error (disconnect)
//!               └─ status err ───────> message (drained) ──> NotStored / Server
//! ```

use memc_common::{
    encode_store_extras, GetOutcome, Item, McError, McResult, Protocol, RequestHeader,
    ResponseHeader, Status, StoreCommand, StoreOutcome, GET_EXTRAS_LEN, HEADER_SIZE,
    STORE_EXTRAS_LEN,
};

use crate::codec::{prepare_value, Codec};
use crate::connection::ServerConnection;

/// Binary protocol codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Binary
    }

    fn get(&self, conn: &mut ServerConnection, item: &mut Item) -> McResult<GetOutcome> {
        let key_len = key_len(item.key())?;
        let header = RequestHeader::get(key_len).encode();
        conn.send_vectored(&[&header[..], item.key()])?;

        let response = read_header(conn)?;
        if !response.is_success() {
            let message = read_error_body(conn, response.body_len as usize)?;
            conn.record_error(message.clone());
            if response.status == Status::KeyNotFound as u16 {
                return Ok(GetOutcome::NotFound);
            }
            return Err(McError::Server {
                status: response.status,
                message,
            });
        }

        if response.key_len != 0 {
            return Err(conn.protocol_failure("unexpected key in get response"));
        }
        let value_len = match response.value_len() {
            Some(len) => len,
            None => return Err(conn.protocol_failure("body shorter than extras")),
        };

        match response.extras_len as usize {
            0 => {
                prepare_value(conn, item, value_len)?;
                conn.receive_exact_into(item.data_mut())?;
            }
            GET_EXTRAS_LEN => {
                prepare_value(conn, item, value_len)?;
                let mut flags = [0u8; GET_EXTRAS_LEN];
                conn.receive_scattered(&mut flags, item.data_mut())?;
                item.set_flags(u32::from_be_bytes(flags));
            }
            other => {
                return Err(conn.protocol_failure(format!("unexpected extras length {}", other)));
            }
        }

        item.set_cas_id(response.cas);
        Ok(GetOutcome::Found)
    }

    fn store(
        &self,
        conn: &mut ServerConnection,
        cmd: StoreCommand,
        item: &Item,
    ) -> McResult<StoreOutcome> {
        let key_len = key_len(item.key())?;
        let value_len = u32::try_from(item.size())
            .ok()
            .filter(|len| len.checked_add(STORE_EXTRAS_LEN as u32 + u32::from(key_len)).is_some())
            .ok_or(McError::ValueTooLarge { size: item.size() })?;

        let mut head = [0u8; HEADER_SIZE + STORE_EXTRAS_LEN];
        head[..HEADER_SIZE]
            .copy_from_slice(&RequestHeader::store(cmd, key_len, value_len, item.cas_id()).encode());
        head[HEADER_SIZE..].copy_from_slice(&encode_store_extras(item.exptime()));
        conn.send_vectored(&[&head[..], item.key(), item.data()])?;

        let response = read_header(conn)?;
        if response.is_success() {
            if response.body_len != 0 {
                return Err(conn.protocol_failure("unexpected data returned"));
            }
            return Ok(StoreOutcome::Stored);
        }

        let message = read_error_body(conn, response.body_len as usize)?;
        conn.record_error(message.clone());
        match Status::from_u16(response.status) {
            Some(Status::KeyExists | Status::KeyNotFound | Status::ItemNotStored) => {
                Ok(StoreOutcome::NotStored)
            }
            _ => Err(McError::Server {
                status: response.status,
                message,
            }),
        }
    }
}

fn key_len(key: &[u8]) -> McResult<u16> {
    u16::try_from(key.len()).map_err(|_| McError::MalformedKey)
}

fn read_header(conn: &mut ServerConnection) -> McResult<ResponseHeader> {
    conn.receive_exact(0, HEADER_SIZE)?;
    let decoded = ResponseHeader::decode(&conn.buffer()[..HEADER_SIZE]);
    match decoded {
        Some(header) => Ok(header),
        None => Err(conn.protocol_failure("invalid response magic")),
    }
}

/// Reads an error body; the message keeps at most one buffer's worth of text
/// and the rest is drained so the stream stays in sync.
fn read_error_body(conn: &mut ServerConnection, len: usize) -> McResult<String> {
    let kept = len.min(conn.buffer_capacity());
    conn.receive_exact(0, kept)?;
    let message = String::from_utf8_lossy(&conn.buffer()[..kept]).into_owned();
    conn.receive_discard(len - kept)?;
    Ok(message)
}
