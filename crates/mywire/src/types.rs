//! MySQL type codes and column metadata.
//!
//! The server describes every result column with a type code, a charset id
//! and a flag set. The type code alone is ambiguous for string data: TEXT
//! and BLOB share the BLOB codes, CHAR and BINARY share STRING. The charset
//! id settles it, which is what [`ColumnDef::logical_type`] does.

use crate::protocol::{PacketReader, charset};
use mywire_core::Error;
use mywire_core::error::ProtocolError;

/// MySQL field type codes (`MYSQL_TYPE_*`).
///
/// Codes this client does not know are kept as [`FieldType::Unknown`] and
/// decode to raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    VarChar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Vector,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
    Unknown(u8),
}

impl FieldType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF2 => FieldType::Vector,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            other => FieldType::Unknown(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            FieldType::Decimal => 0x00,
            FieldType::Tiny => 0x01,
            FieldType::Short => 0x02,
            FieldType::Long => 0x03,
            FieldType::Float => 0x04,
            FieldType::Double => 0x05,
            FieldType::Null => 0x06,
            FieldType::Timestamp => 0x07,
            FieldType::LongLong => 0x08,
            FieldType::Int24 => 0x09,
            FieldType::Date => 0x0A,
            FieldType::Time => 0x0B,
            FieldType::DateTime => 0x0C,
            FieldType::Year => 0x0D,
            FieldType::NewDate => 0x0E,
            FieldType::VarChar => 0x0F,
            FieldType::Bit => 0x10,
            FieldType::Timestamp2 => 0x11,
            FieldType::DateTime2 => 0x12,
            FieldType::Time2 => 0x13,
            FieldType::Vector => 0xF2,
            FieldType::Json => 0xF5,
            FieldType::NewDecimal => 0xF6,
            FieldType::Enum => 0xF7,
            FieldType::Set => 0xF8,
            FieldType::TinyBlob => 0xF9,
            FieldType::MediumBlob => 0xFA,
            FieldType::LongBlob => 0xFB,
            FieldType::Blob => 0xFC,
            FieldType::VarString => 0xFD,
            FieldType::String => 0xFE,
            FieldType::Geometry => 0xFF,
            FieldType::Unknown(code) => code,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
        )
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Vector => "VECTOR",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
            FieldType::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Column flags in result set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// The column type after charset-based reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Decimal,
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Float,
    Double,
    Null,
    Timestamp,
    Date,
    Time,
    DateTime,
    Year,
    Bit,
    Json,
    Enum,
    Set,
    Char,
    VarChar,
    Binary,
    VarBinary,
    TinyText,
    Text,
    MediumText,
    LongText,
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Geometry,
    Vector,
    Unknown(u8),
}

impl LogicalType {
    /// Values of this type are character data.
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            LogicalType::Char
                | LogicalType::VarChar
                | LogicalType::TinyText
                | LogicalType::Text
                | LogicalType::MediumText
                | LogicalType::LongText
                | LogicalType::Enum
                | LogicalType::Set
                | LogicalType::Json
        )
    }

    /// Values of this type are opaque bytes.
    pub const fn is_binary(self) -> bool {
        matches!(
            self,
            LogicalType::Binary
                | LogicalType::VarBinary
                | LogicalType::TinyBlob
                | LogicalType::Blob
                | LogicalType::MediumBlob
                | LogicalType::LongBlob
                | LogicalType::Geometry
                | LogicalType::Vector
                | LogicalType::Unknown(_)
        )
    }
}

/// Column definition from a result set or a prepare response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    pub org_name: String,
    /// Character set / collation id
    pub charset: u16,
    /// Declared display length
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Minimal definition used by tests and binlog decoding.
    pub fn new(name: impl Into<String>, column_type: FieldType) -> Self {
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.into(),
            org_name: String::new(),
            charset: u16::from(charset::UTF8MB4_GENERAL_CI),
            column_length: 0,
            column_type,
            flags: 0,
            decimals: 0,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_charset(mut self, charset: u16) -> Self {
        self.charset = charset;
        self
    }

    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    pub fn has_binary_charset(&self) -> bool {
        self.charset == u16::from(charset::BINARY)
    }

    /// Resolve the declared type code against the charset.
    pub fn logical_type(&self) -> LogicalType {
        let binary = self.has_binary_charset();
        match self.column_type {
            FieldType::Decimal | FieldType::NewDecimal => LogicalType::Decimal,
            FieldType::Tiny => LogicalType::TinyInt,
            FieldType::Short => LogicalType::SmallInt,
            FieldType::Int24 => LogicalType::MediumInt,
            FieldType::Long => LogicalType::Int,
            FieldType::LongLong => LogicalType::BigInt,
            FieldType::Float => LogicalType::Float,
            FieldType::Double => LogicalType::Double,
            FieldType::Null => LogicalType::Null,
            FieldType::Timestamp | FieldType::Timestamp2 => LogicalType::Timestamp,
            FieldType::Date | FieldType::NewDate => LogicalType::Date,
            FieldType::Time | FieldType::Time2 => LogicalType::Time,
            FieldType::DateTime | FieldType::DateTime2 => LogicalType::DateTime,
            FieldType::Year => LogicalType::Year,
            FieldType::Bit => LogicalType::Bit,
            FieldType::Json => LogicalType::Json,
            FieldType::Enum => LogicalType::Enum,
            FieldType::Set => LogicalType::Set,
            FieldType::String if binary => LogicalType::Binary,
            FieldType::String => {
                if self.flags & column_flags::ENUM != 0 {
                    LogicalType::Enum
                } else if self.flags & column_flags::SET != 0 {
                    LogicalType::Set
                } else {
                    LogicalType::Char
                }
            }
            FieldType::VarChar | FieldType::VarString if binary => LogicalType::VarBinary,
            FieldType::VarChar | FieldType::VarString => LogicalType::VarChar,
            FieldType::TinyBlob if binary => LogicalType::TinyBlob,
            FieldType::TinyBlob => LogicalType::TinyText,
            FieldType::Blob if binary => LogicalType::Blob,
            FieldType::Blob => LogicalType::Text,
            FieldType::MediumBlob if binary => LogicalType::MediumBlob,
            FieldType::MediumBlob => LogicalType::MediumText,
            FieldType::LongBlob if binary => LogicalType::LongBlob,
            FieldType::LongBlob => LogicalType::LongText,
            FieldType::Geometry => LogicalType::Geometry,
            FieldType::Vector => LogicalType::Vector,
            FieldType::Unknown(code) => LogicalType::Unknown(code),
        }
    }
}

/// Parse a protocol-41 column definition packet.
pub fn parse_column_def(data: &[u8]) -> Result<ColumnDef, Error> {
    let mut reader = PacketReader::new(data);
    let mut text = |field: &str| {
        reader
            .read_lenenc_string()
            .ok_or_else(|| truncated_column(field))
    };
    let catalog = text("catalog")?;
    let schema = text("schema")?;
    let table = text("table")?;
    let org_table = text("org_table")?;
    let name = text("name")?;
    let org_name = text("org_name")?;

    // Length of the fixed-length fields block (always 0x0c)
    reader
        .read_lenenc_int()
        .ok_or_else(|| truncated_column("fixed block"))?;
    let charset = reader.read_u16_le().ok_or_else(|| truncated_column("charset"))?;
    let column_length = reader
        .read_u32_le()
        .ok_or_else(|| truncated_column("length"))?;
    let column_type = reader
        .read_u8()
        .map(FieldType::from_u8)
        .ok_or_else(|| truncated_column("type"))?;
    let flags = reader.read_u16_le().ok_or_else(|| truncated_column("flags"))?;
    let decimals = reader
        .read_u8()
        .ok_or_else(|| truncated_column("decimals"))?;

    Ok(ColumnDef {
        catalog,
        schema,
        table,
        org_table,
        name,
        org_name,
        charset,
        column_length,
        column_type,
        flags,
        decimals,
    })
}

fn truncated_column(field: &str) -> Error {
    Error::Protocol(ProtocolError {
        message: format!("column definition truncated at {field}"),
        raw_data: None,
        source: None,
    })
}

#[cfg(test)]
pub(crate) fn encode_column_def(col: &ColumnDef) -> Vec<u8> {
    let mut w = crate::protocol::PacketWriter::new();
    w.write_lenenc_string(&col.catalog);
    w.write_lenenc_string(&col.schema);
    w.write_lenenc_string(&col.table);
    w.write_lenenc_string(&col.org_table);
    w.write_lenenc_string(&col.name);
    w.write_lenenc_string(&col.org_name);
    w.write_lenenc_int(0x0c);
    w.write_u16_le(col.charset);
    w.write_u32_le(col.column_length);
    w.write_u8(col.column_type.code());
    w.write_u16_le(col.flags);
    w.write_u8(col.decimals);
    w.write_zeros(2);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_code_roundtrip_keeps_unknown() {
        for code in 0..=255u8 {
            assert_eq!(FieldType::from_u8(code).code(), code);
        }
        assert_eq!(FieldType::from_u8(0x42), FieldType::Unknown(0x42));
        assert_eq!(FieldType::from_u8(0xF2), FieldType::Vector);
    }

    #[test]
    fn test_blob_under_text_charset_is_text() {
        let text = ColumnDef::new("body", FieldType::Blob);
        assert_eq!(text.logical_type(), LogicalType::Text);
        let blob = ColumnDef::new("body", FieldType::Blob).with_charset(63);
        assert_eq!(blob.logical_type(), LogicalType::Blob);
        let long = ColumnDef::new("doc", FieldType::LongBlob);
        assert_eq!(long.logical_type(), LogicalType::LongText);
    }

    #[test]
    fn test_string_under_binary_charset_is_binary() {
        let c = ColumnDef::new("hash", FieldType::String).with_charset(63);
        assert_eq!(c.logical_type(), LogicalType::Binary);
        let v = ColumnDef::new("token", FieldType::VarString).with_charset(63);
        assert_eq!(v.logical_type(), LogicalType::VarBinary);
        let s = ColumnDef::new("name", FieldType::VarString);
        assert_eq!(s.logical_type(), LogicalType::VarChar);
        assert!(s.logical_type().is_text());
        assert!(v.logical_type().is_binary());
    }

    #[test]
    fn test_enum_flag_on_string() {
        let c = ColumnDef::new("state", FieldType::String).with_flags(column_flags::ENUM);
        assert_eq!(c.logical_type(), LogicalType::Enum);
    }

    #[test]
    fn test_parse_column_def() {
        let mut col = ColumnDef::new("age", FieldType::Long)
            .with_flags(column_flags::UNSIGNED | column_flags::NOT_NULL);
        col.schema = "app".to_string();
        col.table = "t".to_string();
        col.column_length = 10;
        let parsed = parse_column_def(&encode_column_def(&col)).unwrap();
        assert_eq!(parsed, col);
        assert!(parsed.is_unsigned());
        assert!(parsed.is_not_null());
    }

    #[test]
    fn test_parse_column_def_truncated() {
        let bytes = encode_column_def(&ColumnDef::new("x", FieldType::Long));
        assert!(matches!(
            parse_column_def(&bytes[..10]),
            Err(Error::Protocol(_))
        ));
    }
}
