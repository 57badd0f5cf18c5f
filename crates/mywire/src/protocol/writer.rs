//! Payload builder for outgoing packets.
//!
//! The writer only assembles a payload; framing into 4-byte-header frames
//! happens in [`crate::transport::frame_payload`].

#![allow(clippy::cast_possible_truncation)]

/// A writer for MySQL protocol data.
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Start a command payload with its command byte.
    pub fn command(command: crate::protocol::Command) -> Self {
        let mut writer = Self::new();
        writer.write_u8(command as u8);
        writer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer.
    ///
    /// - < 251: 1 byte
    /// - < 2^16: 0xFC + 2 bytes
    /// - < 2^24: 0xFD + 3 bytes
    /// - otherwise: 0xFE + 8 bytes
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Single-byte length prefix; input longer than 255 bytes is truncated.
    pub fn write_pascal_string(&mut self, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(255)];
        self.write_u8(bytes.len() as u8);
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, PacketReader};

    #[test]
    fn test_fixed_width_writes() {
        let mut writer = PacketWriter::new();
        writer.write_u16_le(0x1234);
        writer.write_u24_le(0x0012_3456);
        writer.write_u32_le(0x1234_5678);
        assert_eq!(
            writer.as_bytes(),
            &[0x34, 0x12, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_write_lenenc_int_boundaries() {
        let cases: [(u64, &[u8]); 5] = [
            (250, &[0xFA]),
            (251, &[0xFC, 0xFB, 0x00]),
            (0xFFFF, &[0xFC, 0xFF, 0xFF]),
            (0x0001_0000, &[0xFD, 0x00, 0x00, 0x01]),
            (0x0100_0000, &[0xFE, 0, 0, 0, 1, 0, 0, 0, 0]),
        ];
        for (value, expected) in cases {
            let mut writer = PacketWriter::new();
            writer.write_lenenc_int(value);
            assert_eq!(writer.as_bytes(), expected, "value {value}");
            assert_eq!(PacketReader::new(expected).read_lenenc_int(), Some(value));
        }
    }

    #[test]
    fn test_strings() {
        let mut writer = PacketWriter::new();
        writer.write_null_string("hello");
        writer.write_lenenc_string("hi");
        writer.write_pascal_string("_os");
        assert_eq!(writer.as_bytes(), b"hello\0\x02hi\x03_os");
    }

    #[test]
    fn test_pascal_string_truncates() {
        let long = "x".repeat(300);
        let mut writer = PacketWriter::new();
        writer.write_pascal_string(&long);
        assert_eq!(writer.len(), 256);
        assert_eq!(writer.as_bytes()[0], 255);
    }

    #[test]
    fn test_command_prefix() {
        let mut writer = PacketWriter::command(Command::Query);
        writer.write_bytes(b"SELECT 1");
        assert_eq!(writer.as_bytes()[0], 0x03);
        assert_eq!(&writer.as_bytes()[1..], b"SELECT 1");
    }
}
