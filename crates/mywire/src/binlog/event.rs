//! Binlog event header and non-row event bodies.

use super::rows::RowsEvent;
use crate::protocol::PacketReader;
use crate::types::FieldType;
use std::sync::Arc;

/// Size of the common event header (v4 binlog format).
pub const HEADER_LEN: usize = 19;

/// Size of the CRC32 trailer when checksums are enabled.
pub const CHECKSUM_LEN: usize = 4;

/// Event type codes.
pub mod event_type {
    pub const QUERY: u8 = 2;
    pub const ROTATE: u8 = 4;
    pub const FORMAT_DESCRIPTION: u8 = 15;
    pub const XID: u8 = 16;
    pub const TABLE_MAP: u8 = 19;
    pub const WRITE_ROWS_V0: u8 = 20;
    pub const UPDATE_ROWS_V0: u8 = 21;
    pub const DELETE_ROWS_V0: u8 = 22;
    pub const WRITE_ROWS_V1: u8 = 23;
    pub const UPDATE_ROWS_V1: u8 = 24;
    pub const DELETE_ROWS_V1: u8 = 25;
    pub const HEARTBEAT: u8 = 27;
    pub const WRITE_ROWS_V2: u8 = 30;
    pub const UPDATE_ROWS_V2: u8 = 31;
    pub const DELETE_ROWS_V2: u8 = 32;
}

/// The fixed 19-byte header every event starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    /// Total event length including this header
    pub event_length: u32,
    /// Position of the next event in the binlog file
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut r = PacketReader::new(data.get(..HEADER_LEN)?);
        Some(Self {
            timestamp: r.read_u32_le()?,
            event_type: r.read_u8()?,
            server_id: r.read_u32_le()?,
            event_length: r.read_u32_le()?,
            next_position: r.read_u32_le()?,
            flags: r.read_u16_le()?,
        })
    }
}

/// Checksum algorithm announced by the format description event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    None,
    Crc32,
    /// The server predates checksums
    Undefined,
}

/// Column layout of one table, as announced by a TABLE_MAP event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMap {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub column_types: Vec<FieldType>,
    /// Per-column type metadata, two bytes packed little-endian
    pub metadata: Vec<u16>,
    pub nullable: Vec<bool>,
}

impl TableMap {
    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }
}

/// A decoded event body.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Rotate {
        position: u64,
        file: String,
    },
    Query {
        thread_id: u32,
        exec_time: u32,
        error_code: u16,
        schema: String,
        sql: String,
    },
    FormatDescription {
        binlog_version: u16,
        server_version: String,
        header_length: u8,
        checksum: ChecksumAlgorithm,
    },
    TableMap(Arc<TableMap>),
    Rows(RowsEvent),
    /// Transaction commit marker
    Xid(u64),
    Heartbeat,
}

/// One decoded binlog event.
#[derive(Debug, Clone, PartialEq)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub body: EventBody,
}

impl BinlogEvent {
    /// Schema and table the event touches, for row and table-map events.
    pub fn table_ref(&self) -> Option<(Option<&str>, Option<&str>)> {
        match &self.body {
            EventBody::TableMap(map) => Some((Some(&map.schema), Some(&map.table))),
            EventBody::Rows(rows) => Some((rows.schema.as_deref(), rows.table.as_deref())),
            _ => None,
        }
    }
}

pub(crate) fn parse_rotate(body: &[u8]) -> Option<EventBody> {
    let mut r = PacketReader::new(body);
    let position = r.read_u64_le()?;
    let file = r.read_rest_string();
    Some(EventBody::Rotate { position, file })
}

pub(crate) fn parse_query(body: &[u8]) -> Option<EventBody> {
    let mut r = PacketReader::new(body);
    let thread_id = r.read_u32_le()?;
    let exec_time = r.read_u32_le()?;
    let schema_len = usize::from(r.read_u8()?);
    let error_code = r.read_u16_le()?;
    let status_len = usize::from(r.read_u16_le()?);
    if !r.skip(status_len) {
        return None;
    }
    let schema = r.read_string(schema_len)?;
    // NUL after the schema name
    r.skip(1);
    let sql = r.read_rest_string();
    Some(EventBody::Query {
        thread_id,
        exec_time,
        error_code,
        schema,
        sql,
    })
}

/// Server versions from which the format description carries a checksum
/// algorithm byte.
fn has_checksum_byte(server_version: &str) -> bool {
    let numbers: Vec<u32> = server_version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .take(3)
        .filter_map(|s| s.parse().ok())
        .collect();
    let version = (
        numbers.first().copied().unwrap_or(0),
        numbers.get(1).copied().unwrap_or(0),
        numbers.get(2).copied().unwrap_or(0),
    );
    if server_version.contains("MariaDB") {
        version >= (5, 3, 0)
    } else {
        version >= (5, 6, 1)
    }
}

/// Parse a FORMAT_DESCRIPTION body (including any checksum trailer).
pub(crate) fn parse_format_description(body: &[u8]) -> Option<EventBody> {
    let mut r = PacketReader::new(body);
    let binlog_version = r.read_u16_le()?;
    let raw_version = r.read_bytes(50)?;
    let end = raw_version.iter().position(|&b| b == 0).unwrap_or(raw_version.len());
    let server_version = String::from_utf8_lossy(&raw_version[..end]).into_owned();
    // create timestamp
    r.skip(4);
    let header_length = r.read_u8()?;
    let checksum = if has_checksum_byte(&server_version) && body.len() >= CHECKSUM_LEN + 1 {
        match body[body.len() - CHECKSUM_LEN - 1] {
            0 => ChecksumAlgorithm::None,
            1 => ChecksumAlgorithm::Crc32,
            _ => ChecksumAlgorithm::Undefined,
        }
    } else {
        ChecksumAlgorithm::Undefined
    };
    Some(EventBody::FormatDescription {
        binlog_version,
        server_version,
        header_length,
        checksum,
    })
}

/// Metadata bytes carried per column type in a TABLE_MAP event.
fn metadata_width(field_type: FieldType) -> usize {
    match field_type {
        FieldType::Float
        | FieldType::Double
        | FieldType::TinyBlob
        | FieldType::Blob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Geometry
        | FieldType::Json
        | FieldType::Timestamp2
        | FieldType::DateTime2
        | FieldType::Time2 => 1,
        FieldType::VarChar
        | FieldType::VarString
        | FieldType::String
        | FieldType::Bit
        | FieldType::NewDecimal
        | FieldType::Enum
        | FieldType::Set => 2,
        _ => 0,
    }
}

pub(crate) fn parse_table_map(body: &[u8]) -> Option<TableMap> {
    let mut r = PacketReader::new(body);
    let table_id = r.read_u48_le()?;
    let flags = r.read_u16_le()?;
    let schema_len = usize::from(r.read_u8()?);
    let schema = r.read_string(schema_len)?;
    r.skip(1);
    let table_len = usize::from(r.read_u8()?);
    let table = r.read_string(table_len)?;
    r.skip(1);
    let count = usize::try_from(r.read_lenenc_int()?).ok()?;
    let column_types: Vec<FieldType> = r
        .read_bytes(count)?
        .iter()
        .map(|&code| FieldType::from_u8(code))
        .collect();

    let meta_len = usize::try_from(r.read_lenenc_int()?).ok()?;
    let mut meta = PacketReader::new(r.read_bytes(meta_len)?);
    let mut metadata = Vec::with_capacity(count);
    for &field_type in &column_types {
        let value = match metadata_width(field_type) {
            1 => u16::from(meta.read_u8()?),
            2 => {
                let b = meta.read_bytes(2)?;
                u16::from(b[0]) | u16::from(b[1]) << 8
            }
            _ => 0,
        };
        metadata.push(value);
    }

    let nullable = match r.read_bytes(count.div_ceil(8)) {
        Some(bitmap) => bitmap_to_vec(bitmap, count),
        None => vec![true; count],
    };
    Some(TableMap {
        table_id,
        flags,
        schema,
        table,
        column_types,
        metadata,
        nullable,
    })
}

pub(crate) fn bitmap_to_vec(bitmap: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bitmap.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}
