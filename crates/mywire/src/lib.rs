//! MySQL wire-protocol client.
//!
//! This crate speaks the MySQL client/server protocol directly over an
//! asupersync byte stream. It provides:
//!
//! - Packet framing with sequence numbers and 16 MiB splitting
//! - Handshake and authentication (mysql_native_password,
//!   caching_sha2_password, sha256_password, mysql_clear_password)
//! - Text and binary query protocols, multi-result chaining
//! - Prepared statements with long data, cursors and fetch
//! - Batch execution with optional pipelining and transaction
//! - Binlog replication stream and event decoder
//! - Connection-string parsing
//!
//! # Protocol overview
//!
//! Every packet is a 3-byte payload length plus a 1-byte sequence number
//! followed by the payload. Each command resets the sequence; the server's
//! replies continue it. Payloads of 16 MiB - 1 or more are split, with an
//! empty trailing packet when the length is an exact multiple.
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire::{MySqlConfig, MySqlSession};
//! use std::sync::Arc;
//!
//! let config: MySqlConfig = "Server=localhost;User ID=root;Database=shop".parse()?;
//! let mut session = MySqlSession::connect(&cx, Arc::new(config)).await?;
//! let rows = session.query_rows(&cx, "SELECT id, name FROM users").await?;
//! ```

pub mod admin;
pub mod auth;
pub mod batch;
pub mod binlog;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod protocol;
pub mod results;
pub mod sql;
pub mod statement;
pub mod stream;
pub mod transport;
pub mod types;

pub use batch::{BatchOptions, BatchParams, BatchPlan};
pub use binlog::{
    BinlogDecoder, BinlogEvent, BinlogRequest, BinlogStream, EventBody, EventFilter, EventHeader,
    RowChange, RowsEvent, RowsKind, TableMap,
};
pub use config::MySqlConfig;
pub use connection::{MySqlSession, SessionState};
pub use protocol::command::ReplicaRegistration;
pub use protocol::{ClientCommand, SetOption};
pub use results::{QueryResults, ResultHeader};
pub use statement::{CursorBatch, PreparedStatement};
pub use stream::{ByteStream, IoStream, Tcp};
pub use types::{ColumnDef, FieldType};

pub use mywire_core::{ColumnInfo, Cx, Date, DateTime, Error, Outcome, Row, Time, Value};
