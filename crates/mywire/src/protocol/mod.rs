//! MySQL wire protocol building blocks.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum frame payload is 2^24 - 1 bytes. Larger logical packets span
//! several frames; see [`crate::transport`].

pub mod command;
pub mod prepared;
pub mod reader;
pub mod writer;

pub use command::{ClientCommand, ResponseShape};
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload size for a single MySQL frame (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_NO_SCHEMA: u32 = 1 << 4;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_ODBC: u32 = 1 << 6;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_IGNORE_SPACE: u32 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 1 << 12;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_RESERVED: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 1 << 22;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
    pub const CLIENT_OPTIONAL_RESULTSET_METADATA: u32 = 1 << 25;
    pub const CLIENT_ZSTD_COMPRESSION_ALGORITHM: u32 = 1 << 26;
    pub const CLIENT_QUERY_ATTRIBUTES: u32 = 1 << 27;
    pub const CLIENT_MULTI_FACTOR_AUTHENTICATION: u32 = 1 << 28;

    /// Requested on every connection (still masked by what the server offers).
    pub const ALWAYS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_LONG_PASSWORD;

    /// Mirrored only when the server advertises them.
    pub const IF_OFFERED: u32 = CLIENT_LONG_FLAG
        | CLIENT_SECURE_CONNECTION
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_CONNECT_ATTRS
        | CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS
        | CLIENT_QUERY_ATTRIBUTES
        | CLIENT_MULTI_FACTOR_AUTHENTICATION;
}

/// MySQL command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    ProcessKill = 0x0c,
    Ping = 0x0e,
    Time = 0x0f,
    BinlogDump = 0x12,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// MySQL character set ids.
#[allow(dead_code)]
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Default charset for new connections (utf8mb4).
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;

    /// Resolve a charset name from a connection string to its collation id.
    pub fn from_name(name: &str) -> Option<u8> {
        match name.to_ascii_lowercase().as_str() {
            "utf8mb4" | "utf8mb4_general_ci" => Some(UTF8MB4_GENERAL_CI),
            "utf8mb4_unicode_ci" => Some(UTF8MB4_UNICODE_CI),
            "utf8mb4_0900_ai_ci" => Some(UTF8MB4_0900_AI_CI),
            "utf8" | "utf8mb3" | "utf8_general_ci" => Some(UTF8_GENERAL_CI),
            "latin1" | "latin1_swedish_ci" => Some(LATIN1_SWEDISH_CI),
            "binary" => Some(BINARY),
            _ => None,
        }
    }
}

/// COM_SET_OPTION values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SetOption {
    MultiStatementsOn = 0,
    MultiStatementsOff = 1,
}

/// Classification of a response packet by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// Legacy EOF packet (0xFE with a short payload)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else: column count, column definition, row
    Data,
}

impl PacketType {
    /// Detect packet type from a payload.
    pub fn of(payload: &[u8]) -> Self {
        match payload.first() {
            Some(0x00) => PacketType::Ok,
            Some(0xFF) => PacketType::Error,
            Some(0xFE) if payload.len() < 9 => PacketType::Eof,
            Some(0xFB) => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

/// True when `payload` is a legacy EOF terminator.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    PacketType::of(payload) == PacketType::Eof
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human-readable info string (if any)
    pub info: String,
}

impl OkPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters), empty for pre-4.1 style errors
    pub sql_state: String,
    pub error_message: String,
}

/// Parsed legacy EOF packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_detection() {
        assert_eq!(PacketType::of(&[0x00, 0, 0, 2, 0, 0, 0]), PacketType::Ok);
        assert_eq!(PacketType::of(&[0xFF, 0x15, 0x04]), PacketType::Error);
        assert_eq!(PacketType::of(&[0xFE, 0, 0, 2, 0]), PacketType::Eof);
        assert_eq!(PacketType::of(&[0xFE; 9]), PacketType::Data);
        assert_eq!(PacketType::of(&[0xFB, b'f']), PacketType::LocalInfile);
        assert_eq!(PacketType::of(&[0x03, b'd', b'e', b'f']), PacketType::Data);
        assert_eq!(PacketType::of(&[]), PacketType::Data);
    }

    #[test]
    fn test_capability_groups_are_disjoint() {
        assert_eq!(capabilities::ALWAYS & capabilities::IF_OFFERED, 0);
        assert_eq!(
            capabilities::ALWAYS & capabilities::CLIENT_DEPRECATE_EOF,
            0,
            "legacy EOF framing is assumed throughout"
        );
    }

    #[test]
    fn test_charset_names() {
        assert_eq!(charset::from_name("UTF8MB4"), Some(charset::UTF8MB4_GENERAL_CI));
        assert_eq!(charset::from_name("binary"), Some(charset::BINARY));
        assert_eq!(charset::from_name("klingon"), None);
    }

    #[test]
    fn test_more_results_flag() {
        let eof = EofPacket {
            warnings: 0,
            status_flags: server_status::SERVER_MORE_RESULTS_EXISTS,
        };
        assert!(eof.more_results());
        assert!(!OkPacket::default().more_results());
    }
}
