//! Packet framing over a [`ByteStream`].
//!
//! Each frame is a 3-byte little-endian payload length, a 1-byte sequence
//! number and the payload. A logical packet of 2^24-1 bytes or more spans
//! several frames; a frame of exactly 2^24-1 bytes means "more follows",
//! so a payload whose length is an exact multiple of the limit ends with an
//! empty frame.
//!
//! The sequence counter is reset at the start of every command and
//! incremented for every frame in either direction.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{MAX_PACKET_SIZE, PacketReader};
use crate::stream::{ByteStream, connection_error};
use asupersync::Cx;
use mywire_core::Error;
use mywire_core::error::{ConnectionErrorKind, ProtocolError, QueryError, QueryErrorKind};
use std::io;
use std::time::Instant;

const READ_CHUNK: usize = 16 * 1024;

/// Split `payload` into wire frames starting at sequence `seq`.
///
/// Returns the framed bytes and the next sequence number.
pub fn frame_payload(payload: &[u8], mut seq: u8) -> (Vec<u8>, u8) {
    let frames = payload.len() / MAX_PACKET_SIZE + 1;
    let mut out = Vec::with_capacity(payload.len() + frames * 4);
    let mut chunks = payload.chunks(MAX_PACKET_SIZE);
    loop {
        let chunk = chunks.next().unwrap_or(&[]);
        let len = chunk.len() as u32;
        out.extend_from_slice(&len.to_le_bytes()[..3]);
        out.push(seq);
        out.extend_from_slice(chunk);
        seq = seq.wrapping_add(1);
        if chunk.len() < MAX_PACKET_SIZE {
            break;
        }
    }
    (out, seq)
}

/// Reassemble one logical packet from the front of `wire`.
///
/// Returns the payload, the sequence number of the last frame and the
/// number of bytes consumed, or `None` if `wire` is incomplete.
pub fn unframe_payload(wire: &[u8]) -> Option<(Vec<u8>, u8, usize)> {
    let mut payload = Vec::new();
    let mut pos = 0;
    loop {
        let header = wire.get(pos..pos + 4)?;
        let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
        let seq = header[3];
        pos += 4;
        payload.extend_from_slice(wire.get(pos..pos + len)?);
        pos += len;
        if len < MAX_PACKET_SIZE {
            return Some((payload, seq, pos));
        }
    }
}

/// Framed packet I/O with sequence tracking.
#[derive(Debug)]
pub struct PacketTransport<S> {
    stream: S,
    sequence: u8,
    buf: Vec<u8>,
    pos: usize,
    max_packet_size: usize,
    deadline: Option<Instant>,
}

impl<S: ByteStream> PacketTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
            buf: Vec::new(),
            pos: 0,
            max_packet_size: usize::MAX,
            deadline: None,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Resume a pipelined exchange whose reply starts at `seq`.
    pub fn set_sequence(&mut self, seq: u8) {
        self.sequence = seq;
    }

    /// Largest payload the server accepts (`max_allowed_packet`).
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Deadline checked before each packet read; `None` disables it.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Bytes already received but not yet consumed.
    pub fn has_buffered_data(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// Frame and send one logical packet, then flush.
    pub async fn write_packet(&mut self, cx: &Cx, payload: &[u8]) -> Result<(), Error> {
        self.queue_packet(cx, payload).await?;
        self.stream.flush().await.map_err(write_failed)
    }

    /// Frame and send one logical packet without flushing.
    pub async fn queue_packet(&mut self, cx: &Cx, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > self.max_packet_size {
            return Err(Error::usage(format!(
                "packet of {} bytes exceeds max_allowed_packet ({})",
                payload.len(),
                self.max_packet_size
            )));
        }
        // Checked only before the first byte goes out; a started write is finished.
        if cx.is_cancel_requested() {
            return Err(Error::Cancelled);
        }
        let (wire, next) = frame_payload(payload, self.sequence);
        tracing::trace!(len = payload.len(), seq = self.sequence, "send packet");
        self.sequence = next;
        self.stream.write_all(&wire).await.map_err(write_failed)
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        self.stream.flush().await.map_err(write_failed)
    }

    /// Read one logical packet. ERR packets come back as payloads.
    pub async fn read_packet_raw(&mut self, cx: &Cx) -> Result<Vec<u8>, Error> {
        if cx.is_cancel_requested() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Timeout);
        }

        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 4];
            self.read_exact(&mut header).await?;
            let len = usize::from(header[0])
                | usize::from(header[1]) << 8
                | usize::from(header[2]) << 16;
            let seq = header[3];
            if seq != self.sequence {
                return Err(Error::Protocol(ProtocolError {
                    message: format!(
                        "packet sequence mismatch: expected {}, got {seq}",
                        self.sequence
                    ),
                    raw_data: None,
                    source: None,
                }));
            }
            self.sequence = seq.wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.read_exact(&mut payload[start..]).await?;
            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        tracing::trace!(len = payload.len(), seq = self.sequence.wrapping_sub(1), "recv packet");
        Ok(payload)
    }

    /// Read one logical packet, turning an ERR packet into [`Error::Query`].
    pub async fn read_packet(&mut self, cx: &Cx) -> Result<Vec<u8>, Error> {
        let payload = self.read_packet_raw(cx).await?;
        if payload.first() == Some(&0xFF) {
            return Err(server_error(&payload, None));
        }
        Ok(payload)
    }

    async fn read_exact(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < out.len() {
            if self.pos == self.buf.len() {
                self.buf.resize(READ_CHUNK, 0);
                self.pos = 0;
                let n = self
                    .stream
                    .read_some(&mut self.buf)
                    .await
                    .map_err(|e| {
                        self.buf.clear();
                        read_failed(e)
                    })?;
                self.buf.truncate(n);
                if n == 0 {
                    return Err(connection_error(
                        ConnectionErrorKind::Disconnected,
                        "server closed the connection".to_string(),
                        None,
                    ));
                }
            }
            let take = (out.len() - filled).min(self.buf.len() - self.pos);
            out[filled..filled + take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}

/// Convert an ERR payload into [`Error::Query`].
pub fn server_error(payload: &[u8], sql: Option<&str>) -> Error {
    let Some(err) = PacketReader::new(payload).parse_err_packet() else {
        return Error::Protocol(ProtocolError {
            message: "truncated ERR packet".to_string(),
            raw_data: Some(payload.to_vec()),
            source: None,
        });
    };
    Error::Query(QueryError {
        kind: QueryErrorKind::from_server_code(err.error_code),
        code: Some(err.error_code),
        sql: sql.map(str::to_string),
        sqlstate: (!err.sql_state.is_empty()).then_some(err.sql_state),
        message: err.error_message,
        source: None,
    })
}

fn read_failed(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
            connection_error(ConnectionErrorKind::Disconnected, format!("read failed: {e}"), Some(e))
        }
        io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

fn write_failed(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => {
            connection_error(ConnectionErrorKind::Disconnected, format!("write failed: {e}"), Some(e))
        }
        _ => Error::Io(e),
    }
}
