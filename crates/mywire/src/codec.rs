//! Row decoding and parameter encoding.
//!
//! Text-protocol rows carry every value as a length-encoded string; binary
//! rows (prepared statements) carry a NULL bitmap followed by fixed-width
//! or length-prefixed values. Both paths dispatch on the column's
//! [`LogicalType`] so TEXT and BLOB columns that share a type code decode
//! to `Value::Text` and `Value::Bytes` respectively.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use crate::protocol::{PacketReader, PacketWriter};
use crate::types::{ColumnDef, FieldType, LogicalType};
use mywire_core::error::{ProtocolError, TypeError};
use mywire_core::{Date, DateTime, Error, Time, Value};

/// Flag set on the high byte of a parameter type pair for unsigned values.
pub const UNSIGNED_PARAM_FLAG: u8 = 0x80;

/// Decode one text-protocol row.
pub fn decode_text_row(columns: &[ColumnDef], payload: &[u8]) -> Result<Vec<Value>, Error> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());
    for col in columns {
        let raw = reader
            .read_lenenc_nullable()
            .ok_or_else(|| truncated_row(&col.name))?;
        values.push(decode_text_value(col, raw)?);
    }
    Ok(values)
}

/// Decode a single text-protocol value. `None` is SQL NULL.
pub fn decode_text_value(col: &ColumnDef, data: Option<&[u8]>) -> Result<Value, Error> {
    let Some(data) = data else {
        return Ok(Value::Null);
    };
    let logical = col.logical_type();
    if logical.is_binary() {
        return Ok(Value::Bytes(data.to_vec()));
    }
    if logical == LogicalType::Bit {
        return Ok(Value::Bit(bit_value(data)));
    }
    if logical.is_text() {
        return Ok(text_or_bytes(data));
    }

    let text = std::str::from_utf8(data).map_err(|_| type_error(col, "UTF-8 text", data))?;
    let unsigned = col.is_unsigned();
    let value = match logical {
        LogicalType::Null => Value::Null,
        LogicalType::TinyInt if unsigned => Value::UTinyInt(parse_num(col, text)?),
        LogicalType::TinyInt => Value::TinyInt(parse_num(col, text)?),
        LogicalType::SmallInt if unsigned => Value::USmallInt(parse_num(col, text)?),
        LogicalType::SmallInt => Value::SmallInt(parse_num(col, text)?),
        LogicalType::MediumInt | LogicalType::Int if unsigned => Value::UInt(parse_num(col, text)?),
        LogicalType::MediumInt | LogicalType::Int => Value::Int(parse_num(col, text)?),
        LogicalType::BigInt if unsigned => Value::UBigInt(parse_num(col, text)?),
        LogicalType::BigInt => Value::BigInt(parse_num(col, text)?),
        LogicalType::Float => Value::Float(parse_num(col, text)?),
        LogicalType::Double => Value::Double(parse_num(col, text)?),
        LogicalType::Decimal => Value::Decimal(text.to_string()),
        LogicalType::Year => Value::Year(parse_num(col, text)?),
        LogicalType::Date => Value::Date(
            text.parse()
                .map_err(|_| type_error(col, "DATE", data))?,
        ),
        LogicalType::DateTime | LogicalType::Timestamp => Value::DateTime(
            text.parse()
                .map_err(|_| type_error(col, "DATETIME", data))?,
        ),
        LogicalType::Time => Value::Time(
            text.parse()
                .map_err(|_| type_error(col, "TIME", data))?,
        ),
        _ => Value::Text(text.to_string()),
    };
    Ok(value)
}

/// Decode one binary-protocol row (leading 0x00 header included).
pub fn decode_binary_row(columns: &[ColumnDef], payload: &[u8]) -> Result<Vec<Value>, Error> {
    let mut reader = PacketReader::new(payload);
    if reader.read_u8() != Some(0x00) {
        return Err(Error::Protocol(ProtocolError {
            message: "binary row without 0x00 header".to_string(),
            raw_data: Some(payload.to_vec()),
            source: None,
        }));
    }
    // Result-set NULL bitmaps are offset by two bits.
    let bitmap = reader
        .read_bytes((columns.len() + 7 + 2) / 8)
        .ok_or_else(|| truncated_row("null bitmap"))?;

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        values.push(decode_binary_value(col, &mut reader)?);
    }
    Ok(values)
}

fn decode_binary_value(col: &ColumnDef, reader: &mut PacketReader<'_>) -> Result<Value, Error> {
    let unsigned = col.is_unsigned();
    let short = || truncated_row(&col.name);
    let value = match col.column_type {
        FieldType::Null => Value::Null,
        FieldType::Tiny => {
            let b = reader.read_u8().ok_or_else(short)?;
            if unsigned {
                Value::UTinyInt(b)
            } else {
                Value::TinyInt(b as i8)
            }
        }
        FieldType::Short => {
            let v = reader.read_u16_le().ok_or_else(short)?;
            if unsigned {
                Value::USmallInt(v)
            } else {
                Value::SmallInt(v as i16)
            }
        }
        FieldType::Year => Value::Year(reader.read_u16_le().ok_or_else(short)?),
        FieldType::Long | FieldType::Int24 => {
            let v = reader.read_u32_le().ok_or_else(short)?;
            if unsigned {
                Value::UInt(v)
            } else {
                Value::Int(v as i32)
            }
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le().ok_or_else(short)?;
            if unsigned {
                Value::UBigInt(v)
            } else {
                Value::BigInt(v as i64)
            }
        }
        FieldType::Float => Value::Float(reader.read_f32_le().ok_or_else(short)?),
        FieldType::Double => Value::Double(reader.read_f64_le().ok_or_else(short)?),
        FieldType::Date | FieldType::NewDate => {
            Value::Date(read_binary_datetime(col, reader)?.date)
        }
        FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => Value::DateTime(read_binary_datetime(col, reader)?),
        FieldType::Time | FieldType::Time2 => Value::Time(read_binary_time(col, reader)?),
        _ => {
            let data = reader.read_lenenc_bytes().ok_or_else(short)?;
            match col.logical_type() {
                LogicalType::Decimal => Value::Decimal(String::from_utf8_lossy(data).into_owned()),
                LogicalType::Bit => Value::Bit(bit_value(data)),
                logical if logical.is_text() => text_or_bytes(data),
                _ => Value::Bytes(data.to_vec()),
            }
        }
    };
    Ok(value)
}

/// Binary DATE/DATETIME/TIMESTAMP: length byte 0, 4, 7 or 11.
fn read_binary_datetime(col: &ColumnDef, reader: &mut PacketReader<'_>) -> Result<DateTime, Error> {
    let short = || truncated_row(&col.name);
    let len = reader.read_u8().ok_or_else(short)?;
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(type_error(col, "binary DATETIME length 0/4/7/11", &[len]));
    }
    let mut dt = DateTime::default();
    if len >= 4 {
        dt.date = Date::new(
            reader.read_u16_le().ok_or_else(short)?,
            reader.read_u8().ok_or_else(short)?,
            reader.read_u8().ok_or_else(short)?,
        );
    }
    if len >= 7 {
        dt.hour = reader.read_u8().ok_or_else(short)?;
        dt.minute = reader.read_u8().ok_or_else(short)?;
        dt.second = reader.read_u8().ok_or_else(short)?;
    }
    if len == 11 {
        dt.microsecond = reader.read_u32_le().ok_or_else(short)?;
    }
    Ok(dt)
}

/// Binary TIME: length byte 0, 8 or 12.
fn read_binary_time(col: &ColumnDef, reader: &mut PacketReader<'_>) -> Result<Time, Error> {
    let short = || truncated_row(&col.name);
    let len = reader.read_u8().ok_or_else(short)?;
    if !matches!(len, 0 | 8 | 12) {
        return Err(type_error(col, "binary TIME length 0/8/12", &[len]));
    }
    let mut time = Time::default();
    if len >= 8 {
        time.negative = reader.read_u8().ok_or_else(short)? != 0;
        let days = reader.read_u32_le().ok_or_else(short)?;
        let hours = reader.read_u8().ok_or_else(short)?;
        time.hours = days
            .checked_mul(24)
            .and_then(|h| h.checked_add(u32::from(hours)))
            .ok_or_else(|| type_error(col, "binary TIME day count", &days.to_le_bytes()))?;
        time.minutes = reader.read_u8().ok_or_else(short)?;
        time.seconds = reader.read_u8().ok_or_else(short)?;
    }
    if len == 12 {
        time.microseconds = reader.read_u32_le().ok_or_else(short)?;
    }
    Ok(time)
}

/// The wire type a parameter is bound as, and whether it is unsigned.
pub fn param_type(value: &Value) -> (FieldType, bool) {
    match value {
        Value::Null => (FieldType::Null, false),
        Value::Bool(_) | Value::TinyInt(_) => (FieldType::Tiny, false),
        Value::UTinyInt(_) => (FieldType::Tiny, true),
        Value::SmallInt(_) => (FieldType::Short, false),
        Value::USmallInt(_) | Value::Year(_) => (FieldType::Short, true),
        Value::Int(_) => (FieldType::Long, false),
        Value::UInt(_) => (FieldType::Long, true),
        Value::BigInt(_) => (FieldType::LongLong, false),
        Value::UBigInt(_) | Value::Bit(_) => (FieldType::LongLong, true),
        Value::Float(_) => (FieldType::Float, false),
        Value::Double(_) => (FieldType::Double, false),
        Value::Decimal(_) => (FieldType::NewDecimal, false),
        Value::Text(_) | Value::Json(_) => (FieldType::VarString, false),
        Value::Bytes(_) => (FieldType::Blob, false),
        Value::Date(_) => (FieldType::Date, false),
        Value::DateTime(_) => (FieldType::DateTime, false),
        Value::Time(_) => (FieldType::Time, false),
    }
}

/// Write the two-byte type pair for `value`.
pub fn write_param_type(writer: &mut PacketWriter, value: &Value) {
    let (field_type, unsigned) = param_type(value);
    writer.write_u8(field_type.code());
    writer.write_u8(if unsigned { UNSIGNED_PARAM_FLAG } else { 0 });
}

/// Write the binary encoding of a non-NULL parameter value.
pub fn write_param_value(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::TinyInt(v) => writer.write_u8(*v as u8),
        Value::UTinyInt(v) => writer.write_u8(*v),
        Value::SmallInt(v) => writer.write_u16_le(*v as u16),
        Value::USmallInt(v) | Value::Year(v) => writer.write_u16_le(*v),
        Value::Int(v) => writer.write_u32_le(*v as u32),
        Value::UInt(v) => writer.write_u32_le(*v),
        Value::BigInt(v) => writer.write_u64_le(*v as u64),
        Value::UBigInt(v) | Value::Bit(v) => writer.write_u64_le(*v),
        Value::Float(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Double(v) => writer.write_bytes(&v.to_le_bytes()),
        Value::Decimal(s) | Value::Text(s) => writer.write_lenenc_string(s),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Date(d) => {
            if d.is_zero() {
                writer.write_u8(0);
            } else {
                writer.write_u8(4);
                write_date(writer, *d);
            }
        }
        Value::DateTime(dt) => write_datetime(writer, dt),
        Value::Time(t) => write_time(writer, t),
    }
}

fn write_date(writer: &mut PacketWriter, d: Date) {
    writer.write_u16_le(d.year);
    writer.write_u8(d.month);
    writer.write_u8(d.day);
}

fn write_datetime(writer: &mut PacketWriter, dt: &DateTime) {
    if dt.microsecond != 0 {
        writer.write_u8(11);
    } else if dt.has_time() {
        writer.write_u8(7);
    } else if !dt.date.is_zero() {
        writer.write_u8(4);
    } else {
        writer.write_u8(0);
        return;
    }
    write_date(writer, dt.date);
    if dt.has_time() {
        writer.write_u8(dt.hour);
        writer.write_u8(dt.minute);
        writer.write_u8(dt.second);
    }
    if dt.microsecond != 0 {
        writer.write_u32_le(dt.microsecond);
    }
}

fn write_time(writer: &mut PacketWriter, t: &Time) {
    if t.is_zero() {
        writer.write_u8(0);
        return;
    }
    writer.write_u8(if t.microseconds != 0 { 12 } else { 8 });
    let (days, hours) = t.days_and_hours();
    writer.write_u8(u8::from(t.negative));
    writer.write_u32_le(days);
    writer.write_u8(hours);
    writer.write_u8(t.minutes);
    writer.write_u8(t.seconds);
    if t.microseconds != 0 {
        writer.write_u32_le(t.microseconds);
    }
}

/// BIT values arrive big-endian (most significant byte first), in both
/// protocols; the last eight bytes are kept.
pub fn bit_value(data: &[u8]) -> u64 {
    let start = data.len().saturating_sub(8);
    data[start..]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

pub(crate) fn text_or_bytes(data: &[u8]) -> Value {
    String::from_utf8(data.to_vec()).map_or_else(|e| Value::Bytes(e.into_bytes()), Value::Text)
}

fn parse_num<T: std::str::FromStr>(col: &ColumnDef, text: &str) -> Result<T, Error> {
    text.trim()
        .parse()
        .map_err(|_| type_error(col, col.column_type.name(), text.as_bytes()))
}

fn type_error(col: &ColumnDef, expected: &'static str, data: &[u8]) -> Error {
    Error::Type(TypeError {
        expected,
        actual: String::from_utf8_lossy(data).into_owned(),
        column: Some(col.name.clone()),
        rust_type: None,
    })
}

fn truncated_row(at: &str) -> Error {
    Error::Protocol(ProtocolError {
        message: format!("row truncated at {at}"),
        raw_data: None,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::column_flags;

    fn lenenc_row(values: &[Option<&[u8]>]) -> Vec<u8> {
        let mut w = PacketWriter::new();
        for v in values {
            match v {
                Some(b) => w.write_lenenc_bytes(b),
                None => w.write_u8(0xFB),
            }
        }
        w.into_bytes()
    }

    #[test]
    fn test_text_row_decodes_by_column_type() {
        let cols = vec![
            ColumnDef::new("id", FieldType::LongLong),
            ColumnDef::new("name", FieldType::VarString),
            ColumnDef::new("age", FieldType::Tiny).with_flags(column_flags::UNSIGNED),
            ColumnDef::new("note", FieldType::Blob),
            ColumnDef::new("blob", FieldType::Blob).with_charset(63),
            ColumnDef::new("price", FieldType::NewDecimal),
            ColumnDef::new("gone", FieldType::VarString),
        ];
        let payload = lenenc_row(&[
            Some(b"42"),
            Some(b"Tom"),
            Some(b"200"),
            Some(b"hello"),
            Some(b"\x00\x01"),
            Some(b"12.50"),
            None,
        ]);
        let values = decode_text_row(&cols, &payload).unwrap();
        assert_eq!(values[0], Value::BigInt(42));
        assert_eq!(values[1], Value::Text("Tom".into()));
        assert_eq!(values[2], Value::UTinyInt(200));
        assert_eq!(values[3], Value::Text("hello".into()));
        assert_eq!(values[4], Value::Bytes(vec![0, 1]));
        assert_eq!(values[5], Value::Decimal("12.50".into()));
        assert_eq!(values[6], Value::Null);
    }

    #[test]
    fn test_text_temporal_and_bit() {
        let date = ColumnDef::new("d", FieldType::Date);
        assert_eq!(
            decode_text_value(&date, Some(b"0000-00-00")).unwrap(),
            Value::Date(Date::new(0, 0, 0))
        );
        let time = ColumnDef::new("t", FieldType::Time);
        assert_eq!(
            decode_text_value(&time, Some(b"-838:59:59")).unwrap(),
            Value::Time(Time::new(true, 838, 59, 59, 0))
        );
        let bit = ColumnDef::new("b", FieldType::Bit);
        assert_eq!(
            decode_text_value(&bit, Some(&[0x01, 0x02])).unwrap(),
            Value::Bit(0x0102)
        );
        let json = ColumnDef::new("j", FieldType::Json).with_charset(63);
        assert_eq!(
            decode_text_value(&json, Some(b"{\"a\":1}")).unwrap(),
            Value::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_text_bad_integer_is_type_error() {
        let col = ColumnDef::new("n", FieldType::Long);
        assert!(matches!(
            decode_text_value(&col, Some(b"abc")),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_raw_bytes() {
        let col = ColumnDef::new("v", FieldType::Unknown(0x42));
        assert_eq!(
            decode_text_value(&col, Some(b"xyz")).unwrap(),
            Value::Bytes(b"xyz".to_vec())
        );
    }

    #[test]
    fn test_binary_row_with_nulls() {
        let cols = vec![
            ColumnDef::new("a", FieldType::Long),
            ColumnDef::new("b", FieldType::VarString),
            ColumnDef::new("c", FieldType::DateTime),
            ColumnDef::new("d", FieldType::Time),
        ];
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        // column b (index 1) is NULL -> bit 3
        w.write_u8(0b0000_1000);
        w.write_u32_le((-7i32) as u32);
        w.write_u8(7);
        w.write_u16_le(2024);
        w.write_bytes(&[2, 29, 13, 45, 30]);
        w.write_u8(8);
        w.write_u8(1);
        w.write_u32_le(1);
        w.write_bytes(&[2, 3, 4]);
        let values = decode_binary_row(&cols, w.as_bytes()).unwrap();
        assert_eq!(values[0], Value::Int(-7));
        assert_eq!(values[1], Value::Null);
        assert_eq!(
            values[2],
            Value::DateTime(DateTime::new(Date::new(2024, 2, 29), 13, 45, 30, 0))
        );
        assert_eq!(values[3], Value::Time(Time::new(true, 26, 3, 4, 0)));
    }

    #[test]
    fn test_binary_zero_length_temporal() {
        let cols = vec![ColumnDef::new("d", FieldType::Date)];
        let values = decode_binary_row(&cols, &[0x00, 0x00, 0x00]).unwrap();
        assert_eq!(values[0], Value::Date(Date::new(0, 0, 0)));
    }

    #[test]
    fn test_binary_bad_temporal_length() {
        let cols = vec![ColumnDef::new("d", FieldType::DateTime)];
        assert!(matches!(
            decode_binary_row(&cols, &[0x00, 0x00, 0x05, 1, 2, 3, 4, 5]),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_binary_time_day_overflow_is_type_error() {
        let cols = vec![ColumnDef::new("t", FieldType::Time)];
        let mut w = PacketWriter::new();
        w.write_bytes(&[0x00, 0x00, 8, 0]);
        w.write_u32_le(u32::MAX);
        w.write_bytes(&[23, 0, 0]);
        assert!(matches!(
            decode_binary_row(&cols, w.as_bytes()),
            Err(Error::Type(_))
        ));
    }

    /// Boundary values with the column each one is read back through.
    fn boundary_values() -> Vec<(ColumnDef, Value)> {
        let unsigned = |name: &str, t| ColumnDef::new(name, t).with_flags(column_flags::UNSIGNED);
        vec![
            (ColumnDef::new("i8", FieldType::Tiny), Value::TinyInt(i8::MIN)),
            (ColumnDef::new("i8", FieldType::Tiny), Value::TinyInt(i8::MAX)),
            (unsigned("u8", FieldType::Tiny), Value::UTinyInt(u8::MAX)),
            (ColumnDef::new("i16", FieldType::Short), Value::SmallInt(i16::MIN)),
            (unsigned("u16", FieldType::Short), Value::USmallInt(u16::MAX)),
            (ColumnDef::new("i24", FieldType::Int24), Value::Int(-8_388_608)),
            (ColumnDef::new("i24", FieldType::Int24), Value::Int(8_388_607)),
            (unsigned("u24", FieldType::Int24), Value::UInt(16_777_215)),
            (ColumnDef::new("i32", FieldType::Long), Value::Int(i32::MIN)),
            (ColumnDef::new("i32", FieldType::Long), Value::Int(i32::MAX)),
            (unsigned("u32", FieldType::Long), Value::UInt(u32::MAX)),
            (unsigned("u32", FieldType::Long), Value::UInt(0)),
            (ColumnDef::new("i64", FieldType::LongLong), Value::BigInt(i64::MIN)),
            (ColumnDef::new("i64", FieldType::LongLong), Value::BigInt(i64::MAX)),
            (unsigned("u64", FieldType::LongLong), Value::UBigInt(u64::MAX)),
            (ColumnDef::new("y", FieldType::Year), Value::Year(2155)),
            (ColumnDef::new("d", FieldType::Date), Value::Date(Date::new(0, 0, 0))),
            (ColumnDef::new("d", FieldType::Date), Value::Date(Date::new(9999, 12, 31))),
            (ColumnDef::new("dt", FieldType::DateTime), Value::DateTime(DateTime::default())),
            (
                ColumnDef::new("dt", FieldType::DateTime),
                Value::DateTime(DateTime::new(Date::new(1000, 1, 1), 23, 59, 59, 999_999)),
            ),
            (ColumnDef::new("t", FieldType::Time), Value::Time(Time::default())),
            (ColumnDef::new("t", FieldType::Time), Value::Time(Time::new(true, 838, 59, 59, 0))),
            (ColumnDef::new("t", FieldType::Time), Value::Time(Time::new(false, 25, 0, 1, 500))),
            (ColumnDef::new("t", FieldType::Time), Value::Time(Time::new(true, 0, 0, 1, 0))),
            (ColumnDef::new("s", FieldType::VarString), Value::Text(String::new())),
            (ColumnDef::new("b", FieldType::Blob).with_charset(63), Value::Bytes(Vec::new())),
            (ColumnDef::new("n", FieldType::NewDecimal), Value::Decimal("-99999.99".into())),
        ]
    }

    /// How the server spells a value in a text-protocol row.
    fn text_form(value: &Value) -> Vec<u8> {
        match value {
            Value::TinyInt(v) => v.to_string().into_bytes(),
            Value::UTinyInt(v) => v.to_string().into_bytes(),
            Value::SmallInt(v) => v.to_string().into_bytes(),
            Value::USmallInt(v) | Value::Year(v) => v.to_string().into_bytes(),
            Value::Int(v) => v.to_string().into_bytes(),
            Value::UInt(v) => v.to_string().into_bytes(),
            Value::BigInt(v) => v.to_string().into_bytes(),
            Value::UBigInt(v) => v.to_string().into_bytes(),
            Value::Date(d) => d.to_string().into_bytes(),
            Value::DateTime(dt) => dt.to_string().into_bytes(),
            Value::Time(t) => t.to_string().into_bytes(),
            Value::Text(s) | Value::Decimal(s) => s.clone().into_bytes(),
            Value::Bytes(b) => b.clone(),
            other => panic!("no text form for {other:?}"),
        }
    }

    #[test]
    fn test_binary_round_trip_at_boundaries() {
        for (col, value) in boundary_values() {
            let mut w = PacketWriter::new();
            // Row header and a one-column NULL bitmap with nothing set.
            w.write_bytes(&[0x00, 0x00]);
            write_param_value(&mut w, &value);
            let decoded = decode_binary_row(std::slice::from_ref(&col), w.as_bytes())
                .unwrap_or_else(|e| panic!("{value:?}: {e}"));
            assert_eq!(decoded, vec![value.clone()], "column {}", col.name);
        }
    }

    #[test]
    fn test_text_round_trip_at_boundaries() {
        for (col, value) in boundary_values() {
            let text = text_form(&value);
            let decoded = decode_text_value(&col, Some(&text))
                .unwrap_or_else(|e| panic!("{value:?}: {e}"));
            assert_eq!(decoded, value, "column {}", col.name);
        }
    }

    #[test]
    fn test_param_types() {
        assert_eq!(param_type(&Value::Bool(true)), (FieldType::Tiny, false));
        assert_eq!(param_type(&Value::Bit(5)), (FieldType::LongLong, true));
        assert_eq!(param_type(&Value::Null), (FieldType::Null, false));
        let mut w = PacketWriter::new();
        write_param_type(&mut w, &Value::UInt(1));
        assert_eq!(w.as_bytes(), &[FieldType::Long.code(), UNSIGNED_PARAM_FLAG]);
    }

    #[test]
    fn test_param_temporal_lengths() {
        let mut w = PacketWriter::new();
        write_param_value(&mut w, &Value::DateTime(DateTime::from_date(Date::new(2020, 1, 2))));
        assert_eq!(w.as_bytes(), &[4, 0xE4, 0x07, 1, 2]);

        let mut w = PacketWriter::new();
        write_param_value(
            &mut w,
            &Value::DateTime(DateTime::new(Date::new(2020, 1, 2), 3, 4, 5, 6)),
        );
        assert_eq!(w.as_bytes()[0], 11);
        assert_eq!(w.len(), 12);

        let mut w = PacketWriter::new();
        write_param_value(&mut w, &Value::Time(Time::new(false, 49, 0, 1, 0)));
        assert_eq!(w.as_bytes(), &[8, 0, 2, 0, 0, 0, 1, 0, 1]);

        let mut w = PacketWriter::new();
        write_param_value(&mut w, &Value::Time(Time::default()));
        assert_eq!(w.as_bytes(), &[0]);
    }
}
