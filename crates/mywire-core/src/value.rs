//! Dynamic MySQL values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dynamically-typed MySQL value.
///
/// This enum covers every value the text and binary protocols can carry and
/// is used both for parameter binding and result decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value (bound as TINYINT)
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 8-bit unsigned integer
    UTinyInt(u8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 16-bit unsigned integer
    USmallInt(u16),

    /// 24/32-bit signed integer
    Int(i32),

    /// 24/32-bit unsigned integer
    UInt(u32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit unsigned integer
    UBigInt(u64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Exact decimal, kept as its textual representation
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// YEAR column
    Year(u16),

    /// BIT(n) column, up to 64 bits
    Bit(u64),

    /// DATE column
    Date(Date),

    /// DATETIME / TIMESTAMP column
    DateTime(DateTime),

    /// TIME column (signed, hours may exceed 24)
    Time(Time),

    /// JSON document supplied as a parameter
    Json(serde_json::Value),
}

/// A calendar date. Zero dates (`0000-00-00`) are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// A date with wall-clock time and microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

/// A signed time span as stored in a TIME column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

impl Date {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }
}

impl DateTime {
    pub const fn new(date: Date, hour: u8, minute: u8, second: u8, microsecond: u32) -> Self {
        Self {
            date,
            hour,
            minute,
            second,
            microsecond,
        }
    }

    /// Midnight of `date`.
    pub const fn from_date(date: Date) -> Self {
        Self::new(date, 0, 0, 0, 0)
    }

    pub fn has_time(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0 || self.microsecond != 0
    }
}

impl Time {
    pub const fn new(negative: bool, hours: u32, minutes: u8, seconds: u8, microseconds: u32) -> Self {
        Self {
            negative,
            hours,
            minutes,
            seconds,
            microseconds,
        }
    }

    /// Whole days and the remaining hour, as the binary protocol splits them.
    pub fn days_and_hours(&self) -> (u32, u8) {
        (self.hours / 24, (self.hours % 24) as u8)
    }

    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0 && self.microseconds == 0
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.microseconds != 0 {
            write!(f, ".{:06}", self.microseconds)?;
        }
        Ok(())
    }
}

/// Failure to parse a MySQL temporal literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTemporalError {
    pub input: String,
    pub expected: &'static str,
}

impl fmt::Display for ParseTemporalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} literal '{}'", self.expected, self.input)
    }
}

impl std::error::Error for ParseTemporalError {}

fn parse_part<T: FromStr>(part: &str, input: &str, expected: &'static str) -> Result<T, ParseTemporalError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseTemporalError {
            input: input.to_string(),
            expected,
        });
    }
    part.parse().map_err(|_| ParseTemporalError {
        input: input.to_string(),
        expected,
    })
}

/// Parse a fractional-seconds suffix into microseconds, padding or truncating to 6 digits.
fn parse_fraction(frac: &str, input: &str, expected: &'static str) -> Result<u32, ParseTemporalError> {
    let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
    parse_part(&digits, input, expected)
}

impl FromStr for Date {
    type Err = ParseTemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '-');
        let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseTemporalError {
                input: s.to_string(),
                expected: "DATE",
            });
        };
        Ok(Date {
            year: parse_part(y, s, "DATE")?,
            month: parse_part(m, s, "DATE")?,
            day: parse_part(d, s, "DATE")?,
        })
    }
}

impl FromStr for DateTime {
    type Err = ParseTemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (date_part, time_part) = match trimmed.split_once([' ', 'T']) {
            Some((d, t)) => (d, Some(t)),
            None => (trimmed, None),
        };
        let date: Date = date_part.parse().map_err(|_| ParseTemporalError {
            input: s.to_string(),
            expected: "DATETIME",
        })?;
        let Some(time_part) = time_part else {
            return Ok(DateTime::from_date(date));
        };
        let time: Time = time_part.parse().map_err(|_| ParseTemporalError {
            input: s.to_string(),
            expected: "DATETIME",
        })?;
        if time.negative || time.hours > 23 {
            return Err(ParseTemporalError {
                input: s.to_string(),
                expected: "DATETIME",
            });
        }
        Ok(DateTime::new(
            date,
            time.hours as u8,
            time.minutes,
            time.seconds,
            time.microseconds,
        ))
    }
}

impl FromStr for Time {
    type Err = ParseTemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (clock, frac) = match body.split_once('.') {
            Some((c, f)) => (c, Some(f)),
            None => (body, None),
        };
        let mut parts = clock.splitn(3, ':');
        let (Some(h), Some(m), Some(sec)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseTemporalError {
                input: s.to_string(),
                expected: "TIME",
            });
        };
        let microseconds = match frac {
            Some(f) => parse_fraction(f, s, "TIME")?,
            None => 0,
        };
        Ok(Time {
            negative,
            hours: parse_part(h, s, "TIME")?,
            minutes: parse_part(m, s, "TIME")?,
            seconds: parse_part(sec, s, "TIME")?,
            microseconds,
        })
    }
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::UTinyInt(_) => "TINYINT UNSIGNED",
            Value::SmallInt(_) => "SMALLINT",
            Value::USmallInt(_) => "SMALLINT UNSIGNED",
            Value::Int(_) => "INT",
            Value::UInt(_) => "INT UNSIGNED",
            Value::BigInt(_) => "BIGINT",
            Value::UBigInt(_) => "BIGINT UNSIGNED",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Year(_) => "YEAR",
            Value::Bit(_) => "BIT",
            Value::Date(_) => "DATE",
            Value::DateTime(_) => "DATETIME",
            Value::Time(_) => "TIME",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Bit(v) => Some(*v != 0),
            other => other.as_i128().map(|v| v != 0),
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Bool(v) => Some(i128::from(*v)),
            Value::TinyInt(v) => Some(i128::from(*v)),
            Value::UTinyInt(v) => Some(i128::from(*v)),
            Value::SmallInt(v) => Some(i128::from(*v)),
            Value::USmallInt(v) => Some(i128::from(*v)),
            Value::Int(v) => Some(i128::from(*v)),
            Value::UInt(v) => Some(i128::from(*v)),
            Value::BigInt(v) => Some(i128::from(*v)),
            Value::UBigInt(v) => Some(i128::from(*v)),
            Value::Year(v) => Some(i128::from(*v)),
            Value::Bit(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an i64. Unsigned values above `i64::MAX` yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Try to convert this value to a u64. Negative values yield `None`.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Length of the payload for variable-length values.
    pub fn payload_len(&self) -> Option<usize> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s.len()),
            Value::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UTinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::USmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UBigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Time(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
