//! # Textual Protocol Codec
//!
//! Purpose: Encode get/add/set/replace as ASCII command lines and parse the
//! `VALUE`/`END`/`STORED`/`NOT_STORED` responses, continuing short reads
//! until the full value has arrived.
//!
//! ## Design Principles
//! 1. **Header in the Buffer, Value in the Item**: the response line is read
//!    into the connection buffer; value bytes that arrived with it are copied
//!    out and the remainder is read straight into the item, so values larger
//!    than the buffer are never truncated.
//! 2. **Binary-Safe Values**: value bytes are never scanned for terminators.
//! 3. **Fail Fast**: any unexpected response line drops the connection, since
//!    the stream position can no longer be trusted.
//!
//! ## Wire Format
//!
//! ```text
//! get <key>\r\n                          -> VALUE <key> <flags> <bytes>\r\n<data>\r\nEND\r\n
//!                                        -> END\r\n
//! <verb> <key> 0 <exptime> <bytes>\r\n<data>\r\n -> STORED\r\n | NOT_STORED\r\n
//! ```

use memc_common::{
    validate_key, GetOutcome, Item, McError, McResult, Protocol, StoreCommand, StoreOutcome,
};

use crate::codec::{prepare_value, Codec};
use crate::connection::ServerConnection;

const GET_PREFIX: &[u8] = b"get ";
const SPACE: &[u8] = b" ";
const CRLF: &[u8] = b"\r\n";
const VALUE_PREFIX: &[u8] = b"VALUE ";
const RESULT_END: &[u8] = b"END";
const RESULT_STORED: &[u8] = b"STORED\r\n";
const RESULT_NOT_STORED: &[u8] = b"NOT_STORED\r\n";
/// Bytes following a value: its own CRLF plus the closing `END\r\n`.
const VALUE_TRAILER: &[u8; 7] = b"\r\nEND\r\n";

/// Textual protocol codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

/// Parsed first line of a get response.
#[derive(Debug, PartialEq, Eq)]
enum GetHeader {
    Value { flags: u32, size: usize },
    End,
    Malformed(String),
}

/// Classification of the bytes accumulated for a store response.
#[derive(Debug, PartialEq, Eq)]
enum StoreReply {
    Incomplete,
    Stored,
    NotStored,
    Unexpected(String),
}

impl Codec for TextCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Textual
    }

    fn validate_key(&self, key: &[u8]) -> McResult<()> {
        validate_key(key)?;
        if key.iter().any(|&b| b <= b' ' || b == 0x7f) {
            return Err(McError::MalformedKey);
        }
        Ok(())
    }

    /// Sends `get <key>` and reads the single-key response.
    ///
    /// **Logic**:
    /// 1. Read the header line (line mode stops at the first `\r`; one more
    ///    byte is read if the `\n` has not arrived yet).
    /// 2. `END` means the key is absent.
    /// 3. `VALUE` carries flags and size; value bytes already buffered are
    ///    copied, the rest is read directly into the item.
    /// 4. The `\r\nEND\r\n` trailer is consumed and verified.
    fn get(&self, conn: &mut ServerConnection, item: &mut Item) -> McResult<GetOutcome> {
        conn.send_vectored(&[GET_PREFIX, item.key(), CRLF])?;

        let mut nread = conn.receive_line()?;
        let terminator = conn.buffer()[..nread].iter().position(|&b| b == b'\r');
        let cr = match terminator {
            Some(pos) => pos,
            None => return Err(conn.protocol_failure("line terminator not found")),
        };
        if cr + 1 == nread {
            conn.receive_exact(nread, 1)?;
            nread += 1;
        }
        if conn.buffer()[cr + 1] != b'\n' {
            return Err(conn.protocol_failure("malformed line terminator"));
        }
        let head = cr + 2;

        let header = parse_get_header(&conn.buffer()[..cr]);
        let (flags, size) = match header {
            GetHeader::Value { flags, size } => (flags, size),
            GetHeader::End => {
                conn.record_error("Item not found");
                return Ok(GetOutcome::NotFound);
            }
            GetHeader::Malformed(line) => {
                return Err(conn.protocol_failure(format!("unexpected response: {}", line)));
            }
        };

        let chunk = nread - head;
        if chunk > size.saturating_add(VALUE_TRAILER.len()) {
            return Err(conn.protocol_failure("unexpected data after value"));
        }

        prepare_value(conn, item, size)?;
        let copied = chunk.min(size);
        item.data_mut()[..copied].copy_from_slice(&conn.buffer()[head..head + copied]);
        if copied < size {
            conn.receive_exact_into(&mut item.data_mut()[copied..])?;
        }

        let mut trailer = [0u8; 7];
        let have = chunk - copied;
        if have > 0 {
            let start = head + size;
            trailer[..have].copy_from_slice(&conn.buffer()[start..start + have]);
        }
        if have < trailer.len() {
            conn.receive_exact_into(&mut trailer[have..])?;
        }
        if &trailer != VALUE_TRAILER {
            return Err(conn.protocol_failure("value not followed by END"));
        }

        item.set_flags(flags);
        Ok(GetOutcome::Found)
    }

    /// Sends `<verb> <key> 0 <exptime> <bytes>\r\n<data>\r\n` and classifies
    /// the reply. Flags always go out as 0.
    fn store(
        &self,
        conn: &mut ServerConnection,
        cmd: StoreCommand,
        item: &Item,
    ) -> McResult<StoreOutcome> {
        let mut params = Vec::with_capacity(32);
        encode_store_params(item.exptime(), item.size(), &mut params);
        conn.send_vectored(&[cmd.verb(), SPACE, item.key(), &params[..], item.data(), CRLF])?;

        let mut offset = 0;
        loop {
            if offset == conn.buffer_capacity() {
                return Err(conn.protocol_failure("out of sync with server"));
            }
            offset += conn.receive_some(offset)?;

            let reply = classify_store_reply(&conn.buffer()[..offset]);
            match reply {
                StoreReply::Incomplete => continue,
                StoreReply::Stored => return Ok(StoreOutcome::Stored),
                StoreReply::NotStored => {
                    conn.record_error("Item NOT stored");
                    return Ok(StoreOutcome::NotStored);
                }
                StoreReply::Unexpected(line) => {
                    return Err(conn.protocol_failure(format!("unexpected response: {}", line)));
                }
            }
        }
    }
}

fn parse_get_header(line: &[u8]) -> GetHeader {
    if let Some(rest) = line.strip_prefix(VALUE_PREFIX) {
        return match parse_value_line(rest) {
            Some((flags, size)) => GetHeader::Value { flags, size },
            None => GetHeader::Malformed(String::from_utf8_lossy(line).into_owned()),
        };
    }
    if line.starts_with(RESULT_END) {
        return GetHeader::End;
    }
    GetHeader::Malformed(String::from_utf8_lossy(line).into_owned())
}

/// Parses `<key> <flags> <bytes>` (the part after `VALUE `); fields may be
/// separated by any run of whitespace.
fn parse_value_line(rest: &[u8]) -> Option<(u32, usize)> {
    let mut fields = rest
        .split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty());
    fields.next()?;
    let flags = u32::try_from(parse_u64(fields.next()?)?).ok()?;
    let size = usize::try_from(parse_u64(fields.next()?)?).ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((flags, size))
}

fn classify_store_reply(seen: &[u8]) -> StoreReply {
    if !seen.contains(&b'\r') {
        return StoreReply::Incomplete;
    }
    if seen.starts_with(RESULT_STORED) {
        return StoreReply::Stored;
    }
    if seen.starts_with(RESULT_NOT_STORED) {
        return StoreReply::NotStored;
    }
    match seen.windows(2).position(|w| w == CRLF) {
        Some(end) => StoreReply::Unexpected(String::from_utf8_lossy(&seen[..end]).into_owned()),
        None => StoreReply::Incomplete,
    }
}

/// Appends ` 0 <exptime> <size>\r\n`.
fn encode_store_params(exptime: u32, size: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(b" 0 ");
    push_u64(out, u64::from(exptime));
    out.push(b' ');
    push_u64(out, size as u64);
    out.extend_from_slice(CRLF);
}

fn parse_u64(data: &[u8]) -> Option<u64> {
    if data.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}

fn push_u64(out: &mut Vec<u8>, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_store_params() {
        let mut buf = Vec::new();
        encode_store_params(300, 4096, &mut buf);
        assert_eq!(buf, b" 0 300 4096\r\n");

        buf.clear();
        encode_store_params(0, 0, &mut buf);
        assert_eq!(buf, b" 0 0 0\r\n");
    }

    #[test]
    fn parses_value_header() {
        assert_eq!(
            parse_get_header(b"VALUE color 32 3"),
            GetHeader::Value { flags: 32, size: 3 }
        );
        assert_eq!(parse_get_header(b"END"), GetHeader::End);
    }

    #[test]
    fn value_header_tolerates_extra_whitespace() {
        assert_eq!(
            parse_get_header(b"VALUE color  32 \t 3 "),
            GetHeader::Value { flags: 32, size: 3 }
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        for line in [
            &b"VALUE color x 3"[..],
            b"VALUE color 1",
            b"VALUE color 1 2 3",
            b"VALUE  1 2",
            b"VALUE ",
            b"VALUE color 99999999999 1",
            b"SERVER_ERROR out of memory",
        ] {
            assert!(
                matches!(parse_get_header(line), GetHeader::Malformed(_)),
                "{}",
                String::from_utf8_lossy(line)
            );
        }
    }

    #[test]
    fn classifies_store_replies() {
        assert_eq!(classify_store_reply(b"STO"), StoreReply::Incomplete);
        assert_eq!(classify_store_reply(b"STORED\r"), StoreReply::Incomplete);
        assert_eq!(classify_store_reply(b"STORED\r\n"), StoreReply::Stored);
        assert_eq!(classify_store_reply(b"NOT_STORED\r\n"), StoreReply::NotStored);
        assert_eq!(
            classify_store_reply(b"SERVER_ERROR object too large\r\n"),
            StoreReply::Unexpected("SERVER_ERROR object too large".to_string())
        );
    }

    #[test]
    fn text_keys_reject_whitespace() {
        let codec = TextCodec;
        assert!(codec.validate_key(b"user:42").is_ok());
        assert!(matches!(codec.validate_key(b"two words"), Err(McError::MalformedKey)));
        assert!(matches!(codec.validate_key(b"line\r\n"), Err(McError::MalformedKey)));
    }
}
