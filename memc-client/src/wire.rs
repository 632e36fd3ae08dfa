//! # Wire Buffer I/O
//!
//! Purpose: Blocking send/receive loops over any `Read`/`Write` stream, with
//! partial-I/O continuation and transparent retry of interrupted calls.
//!
//! ## Design Principles
//! 1. **Stream-Generic**: Loops take `R: Read` / `W: Write` so they are testable
//!    with in-memory streams that deliver a few bytes per call.
//! 2. **Retry Only Interrupts**: `ErrorKind::Interrupted` is retried in place;
//!    every other error is returned for the connection to act on.
//! 3. **Borrowed Gather Lists**: `GatherCursor` walks a list of immutable
//!    slices, consuming fully-sent segments and slicing the partial one.
//! 4. **EOF Is an Error**: a zero-length read means the peer closed the
//!    socket and surfaces as `UnexpectedEof`.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

/// Cursor over the unsent part of a gather-write.
///
/// **Invariant**: `remaining` equals the total length of the segments from
/// `index` onwards minus `offset`.
pub struct GatherCursor<'s, 'a> {
    segments: &'s [&'a [u8]],
    index: usize,
    offset: usize,
    remaining: usize,
}

impl<'s, 'a> GatherCursor<'s, 'a> {
    pub fn new(segments: &'s [&'a [u8]]) -> Self {
        let remaining = segments.iter().map(|seg| seg.len()).sum();
        GatherCursor {
            segments,
            index: 0,
            offset: 0,
            remaining,
        }
    }

    /// Bytes still to be sent.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Returns the unsent bytes as `IoSlice`s, skipping empty segments.
    pub fn io_slices(&self) -> Vec<IoSlice<'a>> {
        let mut slices = Vec::with_capacity(self.segments.len() - self.index);
        for (pos, &seg) in self.segments[self.index..].iter().enumerate() {
            let seg: &'a [u8] = if pos == 0 { &seg[self.offset..] } else { seg };
            if !seg.is_empty() {
                slices.push(IoSlice::new(seg));
            }
        }
        slices
    }

    /// Marks `sent` bytes as transmitted.
    ///
    /// **Logic**:
    /// 1. Drop every segment that was sent completely.
    /// 2. Move the offset into the first partially sent segment.
    pub fn advance(&mut self, mut sent: usize) {
        self.remaining -= sent.min(self.remaining);
        while self.index < self.segments.len() {
            let left = self.segments[self.index].len() - self.offset;
            if sent < left {
                self.offset += sent;
                return;
            }
            sent -= left;
            self.index += 1;
            self.offset = 0;
        }
    }
}

/// Writes the whole buffer, continuing after short writes.
pub fn write_all<W: Write>(writer: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(sent) => data = &data[sent..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Writes all segments as one logical message.
///
/// Each iteration hands every unsent byte to a single vectored write; after a
/// partial write the cursor advances and the loop resumes with what is left.
pub fn write_all_vectored<W: Write>(writer: &mut W, segments: &[&[u8]]) -> io::Result<()> {
    let mut cursor = GatherCursor::new(segments);
    while !cursor.is_empty() {
        let slices = cursor.io_slices();
        match writer.write_vectored(&slices) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(sent) => cursor.advance(sent),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Performs one read, retrying interrupts. Returns the byte count (> 0).
pub fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(0) if !buf.is_empty() => return Err(peer_closed()),
            Ok(nread) => return Ok(nread),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Fills `buf` completely.
pub fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        offset += read_some(reader, &mut buf[offset..])?;
    }
    Ok(())
}

/// Reads into `buf` from offset 0 until a carriage return has been received.
///
/// Returns `Ok(Some(n))` with the total bytes read (the terminator may be
/// followed by payload bytes), or `Ok(None)` when `buf` filled up without a
/// terminator.
pub fn read_line<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let mut offset = 0;
    while offset < buf.len() {
        let nread = read_some(reader, &mut buf[offset..])?;
        let found = buf[offset..offset + nread].contains(&b'\r');
        offset += nread;
        if found {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

/// Fills `head` then `tail`, starting with one scattered read.
///
/// If the scattered read comes back short, the shortfall of each part is
/// completed with `read_exact`; anything still missing after that is an
/// error from the underlying stream.
pub fn read_scattered<R: Read>(reader: &mut R, head: &mut [u8], tail: &mut [u8]) -> io::Result<()> {
    let total = head.len() + tail.len();
    if total == 0 {
        return Ok(());
    }
    let nread = loop {
        let mut slices = [IoSliceMut::new(head), IoSliceMut::new(tail)];
        match reader.read_vectored(&mut slices) {
            Ok(0) => return Err(peer_closed()),
            Ok(nread) => break nread,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    };
    if nread == total {
        return Ok(());
    }

    let head_len = head.len();
    if nread < head_len {
        read_exact(reader, &mut head[nread..])?;
        read_exact(reader, tail)
    } else {
        read_exact(reader, &mut tail[nread - head_len..])
    }
}

fn peer_closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer")
}
