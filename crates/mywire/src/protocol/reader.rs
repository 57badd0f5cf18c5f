//! Cursor over a packet payload.
//!
//! Every read returns `None` when the payload is too short, so callers can
//! turn truncation into a protocol error at the point they know what was
//! being parsed.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::capabilities::CLIENT_PROTOCOL_41;
use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// A reader for MySQL protocol data.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }

    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.read_uint_le(3).map(|v| v as u32)
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    /// 6-byte table ids in binlog events.
    pub fn read_u48_le(&mut self) -> Option<u64> {
        self.read_uint_le(6)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    pub fn read_i64_le(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    pub fn read_f32_le(&mut self) -> Option<f32> {
        self.take().map(f32::from_le_bytes)
    }

    pub fn read_f64_le(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }

    /// Little-endian unsigned integer of `width` bytes (at most 8).
    pub fn read_uint_le(&mut self, width: usize) -> Option<u64> {
        if width > 8 {
            return None;
        }
        let bytes = self.read_bytes(width)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        )
    }

    /// Big-endian unsigned integer of `width` bytes (at most 8).
    pub fn read_uint_be(&mut self, width: usize) -> Option<u64> {
        if width > 8 {
            return None;
        }
        let bytes = self.read_bytes(width)?;
        Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Read a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB: NULL marker, 0xFF: invalid
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    /// Read a length-encoded byte string that may be NULL (0xFB).
    ///
    /// Outer `None` means truncation, inner `None` means SQL NULL.
    pub fn read_lenenc_nullable(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek()? == 0xFB {
            self.pos += 1;
            return Some(None);
        }
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len).map(Some)
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_string(len)
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    /// Read a null-terminated byte string. A missing terminator consumes the rest.
    pub fn read_null_bytes(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos += end + 1;
                &rest[..end]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    pub fn read_null_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_null_bytes()).into_owned()
    }

    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            false
        }
    }

    /// Parse an OK packet (leading 0x00 or 0xFE marker optional).
    ///
    /// Without `CLIENT_PROTOCOL_41` in `capabilities` there is no warning
    /// count, and the status flags are optional.
    pub fn parse_ok_packet(&mut self, capabilities: u32) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1);
        }

        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        let (status_flags, warnings) = if capabilities & CLIENT_PROTOCOL_41 != 0 {
            (self.read_u16_le()?, self.read_u16_le()?)
        } else if self.remaining() >= 2 {
            (self.read_u16_le()?, 0)
        } else {
            (0, 0)
        };
        let info = self.read_rest_string();

        Some(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an ERR packet: code, optional `#` + 5-byte SQL state, message.
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }

        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1);
            self.read_string(5)?
        } else {
            String::new()
        };
        let error_message = self.read_rest_string();

        Some(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse a legacy EOF packet. Pre-4.1 servers send a bare 0xFE.
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }
        if self.is_empty() {
            return Some(EofPacket::default());
        }

        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;
        Some(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let mut reader = PacketReader::new(&[0x42, 0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u8(), Some(0x42));
        assert_eq!(reader.read_u16_le(), Some(0x1234));
        assert_eq!(reader.read_u24_le(), Some(0x0012_3456));
        assert_eq!(reader.read_u8(), None);
    }

    #[test]
    fn test_read_u48_and_be() {
        let mut reader = PacketReader::new(&[1, 0, 0, 0, 0, 1, 0x01, 0x02]);
        assert_eq!(reader.read_u48_le(), Some(0x0100_0000_0001));
        assert_eq!(reader.read_uint_be(2), Some(0x0102));
    }

    #[test]
    fn test_read_lenenc_int() {
        let cases: [(&[u8], u64); 4] = [
            (&[0x42], 0x42),
            (&[0xFC, 0x34, 0x12], 0x1234),
            (&[0xFD, 0x56, 0x34, 0x12], 0x0012_3456),
            (
                &[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
                0x0807_0605_0403_0201,
            ),
        ];
        for (bytes, expected) in cases {
            assert_eq!(PacketReader::new(bytes).read_lenenc_int(), Some(expected));
        }
        assert_eq!(PacketReader::new(&[0xFC, 0x01]).read_lenenc_int(), None);
    }

    #[test]
    fn test_nullable_lenenc() {
        let mut reader = PacketReader::new(&[0xFB, 0x02, b'h', b'i', 0x05, b'x']);
        assert_eq!(reader.read_lenenc_nullable(), Some(None));
        assert_eq!(reader.read_lenenc_nullable(), Some(Some(&b"hi"[..])));
        assert_eq!(reader.read_lenenc_nullable(), None);
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"hello\0world");
        assert_eq!(reader.read_null_string(), "hello");
        assert_eq!(reader.read_null_string(), "world");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_parse_ok_packet() {
        let data = [0x00, 0x01, 0x2A, 0x0A, 0x00, 0x01, 0x00];
        let ok = PacketReader::new(&data)
            .parse_ok_packet(CLIENT_PROTOCOL_41)
            .unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 0x0A);
        assert!(ok.more_results());
        assert_eq!(ok.warnings, 1);
    }

    #[test]
    fn test_parse_pre_41_ok_packet() {
        let ok = PacketReader::new(&[0x00, 0x01, 0x00, 0x02, 0x00])
            .parse_ok_packet(0)
            .unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);

        let bare = PacketReader::new(&[0x00, 0x03, 0x00]).parse_ok_packet(0).unwrap();
        assert_eq!(bare.affected_rows, 3);
        assert_eq!(bare.status_flags, 0);

        // 4.1 layout insists on the warning count.
        assert!(PacketReader::new(&[0x00, 0x01, 0x00, 0x02, 0x00])
            .parse_ok_packet(CLIENT_PROTOCOL_41)
            .is_none());
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.error_message, "Access denied");
    }

    #[test]
    fn test_parse_eof_packet() {
        let eof = PacketReader::new(&[0xFE, 0x01, 0x00, 0x02, 0x00])
            .parse_eof_packet()
            .unwrap();
        assert_eq!(eof.warnings, 1);
        assert_eq!(eof.status_flags, 2);
        assert_eq!(
            PacketReader::new(&[0xFE]).parse_eof_packet(),
            Some(EofPacket::default())
        );
    }
}
