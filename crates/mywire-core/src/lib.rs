//! Core types for the mywire MySQL client.
//!
//! This crate holds what every layer above the wire shares:
//!
//! - `Error` taxonomy with server error classification
//! - `Value` plus the MySQL temporal types `Date`, `DateTime`, `Time`
//! - `Row` / `ColumnInfo` / `FromValue` for result access
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod row;
pub mod value;

pub use error::{Error, Result};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{Date, DateTime, ParseTemporalError, Time, Value};
