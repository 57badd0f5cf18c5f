//! Error types for mywire operations.

use std::fmt;

/// MySQL server error codes that indicate a transient condition.
///
/// 1040 too many connections, 1043 bad handshake, 1153 packet too large,
/// 1205 lock wait timeout, 1213 deadlock.
pub const TRANSIENT_SERVER_CODES: [u16; 5] = [1040, 1043, 1153, 1205, 1213];

/// The primary error type for all mywire operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authenticate, disconnect)
    Connection(ConnectionError),
    /// Errors reported by the server for a command
    Query(QueryError),
    /// Value decoding or conversion errors
    Type(TypeError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Protocol errors (malformed or unexpected packets)
    Protocol(ProtocolError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration and connection-string errors
    Config(ConfigError),
    /// I/O errors from the underlying stream
    Io(std::io::Error),
    /// Connect or command deadline elapsed
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// API misuse detected before any I/O took place
    Usage(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    /// Server error code when the server rejected the connection
    pub server_code: Option<u16>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// DNS resolution failed
    DnsResolution,
    /// Connection refused
    Refused,
    /// Session is unusable after an earlier fatal failure
    Broken,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// MySQL error number (e.g. 1062)
    pub code: Option<u16>,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table, column or schema not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Deadlock detected
    Deadlock,
    /// Lock wait or statement timeout
    Timeout,
    /// Too many connections or a rejected handshake
    Capacity,
    /// Statement was killed
    Cancelled,
    /// Other database error
    Database,
}

impl QueryErrorKind {
    /// Classify a MySQL server error number.
    pub fn from_server_code(code: u16) -> Self {
        match code {
            1062 | 1451 | 1452 | 1048 | 1364 | 3819 => QueryErrorKind::Constraint,
            1064 | 1149 => QueryErrorKind::Syntax,
            1049 | 1051 | 1054 | 1146 | 1243 => QueryErrorKind::NotFound,
            1044 | 1045 | 1142 | 1143 | 1227 => QueryErrorKind::Permission,
            1264 | 1406 | 1153 => QueryErrorKind::DataTruncation,
            1213 => QueryErrorKind::Deadlock,
            1205 | 3024 => QueryErrorKind::Timeout,
            1040 | 1043 => QueryErrorKind::Capacity,
            1317 => QueryErrorKind::Cancelled,
            _ => QueryErrorKind::Database,
        }
    }
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// BEGIN issued while a transaction is open
    AlreadyActive,
    /// COMMIT or ROLLBACK issued with no open transaction
    NotActive,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool exhausted (no available connections)
    Exhausted,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (deadlock, lock timeout, pool exhausted, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => {
                q.is_transient()
                    || matches!(q.kind, QueryErrorKind::Deadlock | QueryErrorKind::Timeout)
            }
            Error::Connection(c) => c
                .server_code
                .is_some_and(|code| TRANSIENT_SERVER_CODES.contains(&code)),
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this a server error whose code is in the transient set?
    pub fn is_transient(&self) -> bool {
        self.server_code()
            .is_some_and(|code| TRANSIENT_SERVER_CODES.contains(&code))
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_)
        )
    }

    /// Does this error leave the session unusable?
    ///
    /// Server errors, decode errors and usage errors do not; everything that
    /// may have left the byte stream misaligned does.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Protocol(_)
                | Error::Io(_)
                | Error::Timeout
                | Error::Cancelled
        )
    }

    /// MySQL error number, if the server reported one.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => q.code,
            Error::Connection(c) => c.server_code,
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Is this a duplicate-key server error?
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.is_unique_violation())
    }

    /// Shorthand for a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }
}

impl QueryError {
    /// Is this a unique constraint violation (ER_DUP_ENTRY)?
    pub fn is_unique_violation(&self) -> bool {
        self.code == Some(1062)
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, Some(1451 | 1452))
    }

    /// Is the server code one of the transient ones?
    pub fn is_transient(&self) -> bool {
        self.code
            .is_some_and(|code| TRANSIENT_SERVER_CODES.contains(&code))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Usage(msg) => write!(f, "Usage error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            Error::Protocol(e) => e.source.as_deref(),
            Error::Pool(e) => e.source.as_deref(),
            Error::Config(e) => e.source.as_deref(),
            Error::Io(e) => return Some(e),
            _ => None,
        };
        boxed.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.server_code {
            Some(code) => write!(f, "{} (server error {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.sqlstate) {
            (Some(code), Some(state)) => write!(f, "{} ({}, SQLSTATE {})", self.message, code, state),
            (Some(code), None) => write!(f, "{} ({})", self.message, code),
            (None, Some(state)) => write!(f, "{} (SQLSTATE {})", self.message, state),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for mywire operations.
pub type Result<T> = std::result::Result<T, Error>;
