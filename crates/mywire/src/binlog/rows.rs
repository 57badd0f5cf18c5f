//! Row images of WRITE/UPDATE/DELETE rows events.
//!
//! Row values are encoded per column type using the metadata announced by
//! the preceding TABLE_MAP event. Without that map (or when a column type
//! cannot be decoded) the event is kept with its raw row data and no
//! decoded rows.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use super::event::{TableMap, bitmap_to_vec, event_type};
use crate::codec::{bit_value, text_or_bytes};
use crate::protocol::PacketReader;
use crate::types::FieldType;
use mywire_core::{Date, DateTime, Time, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// One changed row. Writes carry only `after`, deletes only `before`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub before: Option<Vec<Value>>,
    pub after: Option<Vec<Value>>,
}

/// A decoded rows event.
///
/// Row vectors are indexed by column position; columns absent from the
/// image (see `present`) hold `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub kind: RowsKind,
    /// Rows event format version (0, 1 or 2)
    pub version: u8,
    pub table_id: u64,
    pub flags: u16,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column_count: usize,
    pub present: Vec<bool>,
    /// Columns present in the after image of an update
    pub present_after: Option<Vec<bool>>,
    pub rows: Vec<RowChange>,
    /// Row data as received, kept when rows could not be decoded
    pub raw: Vec<u8>,
}

impl RowsEvent {
    /// Whether the row images were decoded.
    pub fn is_resolved(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Kind and version of a rows event type code.
pub fn rows_kind(code: u8) -> Option<(RowsKind, u8)> {
    use event_type::*;
    Some(match code {
        WRITE_ROWS_V0 => (RowsKind::Write, 0),
        UPDATE_ROWS_V0 => (RowsKind::Update, 0),
        DELETE_ROWS_V0 => (RowsKind::Delete, 0),
        WRITE_ROWS_V1 => (RowsKind::Write, 1),
        UPDATE_ROWS_V1 => (RowsKind::Update, 1),
        DELETE_ROWS_V1 => (RowsKind::Delete, 1),
        WRITE_ROWS_V2 => (RowsKind::Write, 2),
        UPDATE_ROWS_V2 => (RowsKind::Update, 2),
        DELETE_ROWS_V2 => (RowsKind::Delete, 2),
        _ => return None,
    })
}

/// Parse a rows event body. Returns `None` only when the fixed part is
/// truncated.
pub(crate) fn parse_rows(
    code: u8,
    body: &[u8],
    tables: &HashMap<u64, Arc<TableMap>>,
) -> Option<RowsEvent> {
    let (kind, version) = rows_kind(code)?;
    let mut r = PacketReader::new(body);
    let table_id = r.read_u48_le()?;
    let flags = r.read_u16_le()?;
    if version == 2 {
        // Extra data length includes its own two bytes.
        let extra = usize::from(r.read_u16_le()?);
        if !r.skip(extra.saturating_sub(2)) {
            return None;
        }
    }
    let column_count = usize::try_from(r.read_lenenc_int()?).ok()?;
    let bitmap_len = column_count.div_ceil(8);
    let present = bitmap_to_vec(r.read_bytes(bitmap_len)?, column_count);
    let present_after = if kind == RowsKind::Update {
        Some(bitmap_to_vec(r.read_bytes(bitmap_len)?, column_count))
    } else {
        None
    };
    let row_data = r.read_rest();

    let map = tables.get(&table_id);
    let mut event = RowsEvent {
        kind,
        version,
        table_id,
        flags,
        schema: map.map(|m| m.schema.clone()),
        table: map.map(|m| m.table.clone()),
        column_count,
        present,
        present_after,
        rows: Vec::new(),
        raw: Vec::new(),
    };
    match map.and_then(|m| decode_rows(&event, m, row_data)) {
        Some(rows) => event.rows = rows,
        None => {
            tracing::debug!(table_id, "rows event left undecoded");
            event.raw = row_data.to_vec();
        }
    }
    Some(event)
}

fn decode_rows(event: &RowsEvent, map: &TableMap, data: &[u8]) -> Option<Vec<RowChange>> {
    if event.column_count > map.column_count() {
        return None;
    }
    let mut r = PacketReader::new(data);
    let mut rows = Vec::new();
    while !r.is_empty() {
        let change = match event.kind {
            RowsKind::Write => RowChange {
                before: None,
                after: Some(decode_image(&mut r, map, &event.present)?),
            },
            RowsKind::Delete => RowChange {
                before: Some(decode_image(&mut r, map, &event.present)?),
                after: None,
            },
            RowsKind::Update => {
                let before = decode_image(&mut r, map, &event.present)?;
                let after_present = event.present_after.as_deref().unwrap_or(&event.present);
                RowChange {
                    before: Some(before),
                    after: Some(decode_image(&mut r, map, after_present)?),
                }
            }
        };
        rows.push(change);
    }
    Some(rows)
}

fn decode_image(r: &mut PacketReader<'_>, map: &TableMap, present: &[bool]) -> Option<Vec<Value>> {
    let present_count = present.iter().filter(|p| **p).count();
    let nulls = bitmap_to_vec(r.read_bytes(present_count.div_ceil(8))?, present_count);
    let mut nulls = nulls.into_iter();
    let mut values = Vec::with_capacity(present.len());
    for (column, &is_present) in present.iter().enumerate() {
        if !is_present || nulls.next()? {
            values.push(Value::Null);
            continue;
        }
        values.push(decode_value(r, map.column_types[column], map.metadata[column])?);
    }
    Some(values)
}

/// Decode one non-NULL column value in row-image format.
pub fn decode_value(r: &mut PacketReader<'_>, field_type: FieldType, meta: u16) -> Option<Value> {
    let [lo, hi] = meta.to_le_bytes();
    Some(match field_type {
        FieldType::Tiny => Value::TinyInt(r.read_u8()? as i8),
        FieldType::Short => Value::SmallInt(r.read_u16_le()? as i16),
        FieldType::Int24 => {
            let raw = r.read_u24_le()?;
            // sign-extend from 24 bits
            Value::Int(((raw << 8) as i32) >> 8)
        }
        FieldType::Long => Value::Int(r.read_u32_le()? as i32),
        FieldType::LongLong => Value::BigInt(r.read_i64_le()?),
        FieldType::Float => Value::Float(r.read_f32_le()?),
        FieldType::Double => Value::Double(r.read_f64_le()?),
        FieldType::Year => {
            let y = u16::from(r.read_u8()?);
            Value::Year(if y == 0 { 0 } else { 1900 + y })
        }
        FieldType::NewDecimal => Value::Decimal(decode_decimal(r, usize::from(lo), usize::from(hi))?),
        FieldType::Date | FieldType::NewDate => {
            let v = r.read_u24_le()?;
            Value::Date(Date::new((v >> 9) as u16, ((v >> 5) & 0x0F) as u8, (v & 0x1F) as u8))
        }
        FieldType::Time => {
            let v = r.read_u24_le()?;
            Value::Time(Time::new(false, v / 10_000, ((v / 100) % 100) as u8, (v % 100) as u8, 0))
        }
        FieldType::DateTime => {
            let v = r.read_u64_le()?;
            let (d, t) = (v / 1_000_000, v % 1_000_000);
            let date = Date::new((d / 10_000) as u16, ((d / 100) % 100) as u8, (d % 100) as u8);
            Value::DateTime(DateTime::new(
                date,
                (t / 10_000) as u8,
                ((t / 100) % 100) as u8,
                (t % 100) as u8,
                0,
            ))
        }
        FieldType::Timestamp => Value::DateTime(from_unix(u64::from(r.read_u32_le()?), 0)),
        FieldType::Timestamp2 => {
            let seconds = r.read_uint_be(4)?;
            let micros = read_fraction(r, lo)?;
            Value::DateTime(from_unix(seconds, micros))
        }
        FieldType::DateTime2 => Value::DateTime(decode_datetime2(r, lo)?),
        FieldType::Time2 => Value::Time(decode_time2(r, lo)?),
        FieldType::VarChar | FieldType::VarString => {
            let len = read_length(r, if meta < 256 { 1 } else { 2 })?;
            text_or_bytes(r.read_bytes(len)?)
        }
        FieldType::String | FieldType::Enum | FieldType::Set => decode_string(r, lo, hi)?,
        FieldType::Bit => {
            let bits = usize::from(hi) * 8 + usize::from(lo);
            Value::Bit(bit_value(r.read_bytes(bits.div_ceil(8))?))
        }
        FieldType::TinyBlob
        | FieldType::Blob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Geometry
        | FieldType::Json => {
            let len = read_length(r, usize::from(lo))?;
            Value::Bytes(r.read_bytes(len)?.to_vec())
        }
        FieldType::Null => Value::Null,
        _ => return None,
    })
}

fn read_length(r: &mut PacketReader<'_>, width: usize) -> Option<usize> {
    if !(1..=4).contains(&width) {
        return None;
    }
    usize::try_from(r.read_uint_le(width)?).ok()
}

/// STRING columns carry the real type (CHAR, ENUM or SET) in the first
/// metadata byte. Long CHAR lengths borrow two bits from it.
fn decode_string(r: &mut PacketReader<'_>, lo: u8, hi: u8) -> Option<Value> {
    let (real_type, max_len) = if lo != 0 && lo & 0x30 != 0x30 {
        (lo | 0x30, usize::from(hi) | usize::from((lo & 0x30) ^ 0x30) << 4)
    } else if lo != 0 {
        (lo, usize::from(hi))
    } else {
        (FieldType::String.code(), usize::from(hi))
    };
    match FieldType::from_u8(real_type) {
        FieldType::Enum => Some(Value::UInt(r.read_uint_le(usize::from(hi))? as u32)),
        FieldType::Set => Some(Value::UBigInt(r.read_uint_le(usize::from(hi))?)),
        _ => {
            let len = read_length(r, if max_len < 256 { 1 } else { 2 })?;
            Some(text_or_bytes(r.read_bytes(len)?))
        }
    }
}

/// Fractional seconds for `fsp` digits, in microseconds.
fn read_fraction(r: &mut PacketReader<'_>, fsp: u8) -> Option<u32> {
    let width = usize::from(fsp.min(6)).div_ceil(2);
    if width == 0 {
        return Some(0);
    }
    let raw = r.read_uint_be(width)? as u32;
    Some(raw * 100u32.pow(3 - width as u32))
}

fn decode_datetime2(r: &mut PacketReader<'_>, fsp: u8) -> Option<DateTime> {
    let packed = r.read_uint_be(5)? as i64 - 0x80_0000_0000;
    let micros = read_fraction(r, fsp)?;
    let packed = packed.unsigned_abs();
    let ymd = packed >> 17;
    let ym = ymd >> 5;
    let hms = packed & 0x1_FFFF;
    let date = Date::new((ym / 13) as u16, (ym % 13) as u8, (ymd & 0x1F) as u8);
    Some(DateTime::new(
        date,
        (hms >> 12) as u8,
        ((hms >> 6) & 0x3F) as u8,
        (hms & 0x3F) as u8,
        micros,
    ))
}

fn decode_time2(r: &mut PacketReader<'_>, fsp: u8) -> Option<Time> {
    let packed: i64 = match fsp.min(6) {
        0 => (r.read_uint_be(3)? as i64 - 0x80_0000) << 24,
        1 | 2 => {
            let mut int = r.read_uint_be(3)? as i64 - 0x80_0000;
            let mut frac = i64::from(r.read_u8()? as i8);
            if int < 0 && frac != 0 {
                int += 1;
                frac -= 0x100;
            }
            (int << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut int = r.read_uint_be(3)? as i64 - 0x80_0000;
            let mut frac = i64::from(r.read_uint_be(2)? as u16 as i16);
            if int < 0 && frac != 0 {
                int += 1;
                frac -= 0x1_0000;
            }
            (int << 24) + frac * 100
        }
        _ => r.read_uint_be(6)? as i64 - 0x8000_0000_0000,
    };
    let negative = packed < 0;
    let magnitude = packed.unsigned_abs();
    let int = magnitude >> 24;
    Some(Time::new(
        negative,
        ((int >> 12) & 0x3FF) as u32,
        ((int >> 6) & 0x3F) as u8,
        (int & 0x3F) as u8,
        (magnitude & 0xFF_FFFF) as u32,
    ))
}

/// UTC calendar time of a unix timestamp. Zero maps to the zero datetime.
fn from_unix(seconds: u64, micros: u32) -> DateTime {
    if seconds == 0 && micros == 0 {
        return DateTime::default();
    }
    let days = (seconds / 86_400) as i64;
    let rem = seconds % 86_400;
    let (year, month, day) = civil_from_days(days);
    DateTime::new(
        Date::new(year as u16, month as u8, day as u8),
        (rem / 3600) as u8,
        ((rem / 60) % 60) as u8,
        (rem % 60) as u8,
        micros,
    )
}

/// Proleptic Gregorian date from days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// Decode a packed DECIMAL(precision, scale).
///
/// Digits are stored in base-10^9 groups of four bytes, with shorter
/// leading and trailing groups. The sign bit is inverted; negative values
/// have every byte inverted.
pub fn decode_decimal(r: &mut PacketReader<'_>, precision: usize, scale: usize) -> Option<String> {
    if scale > precision || precision == 0 {
        return None;
    }
    let intg = precision - scale;
    let (intg0, intg0x) = (intg / 9, intg % 9);
    let (frac0, frac0x) = (scale / 9, scale % 9);
    let size = intg0 * 4 + DIG2BYTES[intg0x] + frac0 * 4 + DIG2BYTES[frac0x];
    let mut buf = r.read_bytes(size)?.to_vec();
    let negative = buf[0] & 0x80 == 0;
    buf[0] ^= 0x80;
    if negative {
        for b in &mut buf {
            *b ^= 0xFF;
        }
    }

    let mut pos = 0;
    let mut group = |width: usize| {
        let v = buf[pos..pos + width]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        pos += width;
        v
    };

    let mut int_digits = String::new();
    if intg0x > 0 {
        int_digits.push_str(&group(DIG2BYTES[intg0x]).to_string());
    }
    for _ in 0..intg0 {
        int_digits.push_str(&format!("{:09}", group(4)));
    }
    let mut frac_digits = String::new();
    for _ in 0..frac0 {
        frac_digits.push_str(&format!("{:09}", group(4)));
    }
    if frac0x > 0 {
        let v = group(DIG2BYTES[frac0x]);
        frac_digits.push_str(&format!("{v:0frac0x$}"));
    }

    let int_part = int_digits.trim_start_matches('0');
    let mut out = String::with_capacity(precision + 3);
    if negative {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Some(out)
}
