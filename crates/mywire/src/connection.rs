//! Client session.
//!
//! A [`MySqlSession`] owns one authenticated stream and runs exactly one
//! command exchange at a time. Responses that the caller has not finished
//! reading (rows of the current result, further results of a
//! multi-statement chain) are tracked in a pending state and drained before
//! the next command goes out.
//!
//! # In-flight guard
//!
//! Every operation sets an in-flight marker before touching the stream and
//! clears it when it returns. If the future is dropped part-way through, the
//! marker stays set and the next operation marks the session broken instead
//! of reading a misaligned stream.

#![allow(clippy::cast_possible_truncation)]

use crate::config::MySqlConfig;
use crate::handshake::{self, Negotiated};
use crate::protocol::server_status::{
    SERVER_STATUS_CURSOR_EXISTS, SERVER_STATUS_IN_TRANS, SERVER_STATUS_NO_BACKSLASH_ESCAPES,
};
use crate::protocol::{
    ClientCommand, EofPacket, OkPacket, PacketReader, PacketType, is_eof_packet,
};
use crate::results::{QueryResults, ResultHeader};
use crate::stream::{ByteStream, Tcp, connect_tcp, connection_error};
use crate::transport::{PacketTransport, server_error};
use crate::types::{ColumnDef, parse_column_def};
use asupersync::{Cx, Outcome};
use mywire_core::error::{ConnectionErrorKind, ProtocolError, TransactionError, TransactionErrorKind};
use mywire_core::{ColumnInfo, Error, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for commands
    Ready,
    /// A fatal error left the stream unusable; discard the session
    Broken,
    /// Closed by the caller
    Closed,
}

/// Response data still on the wire.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    Idle,
    Rows {
        columns: Arc<[ColumnDef]>,
        info: Arc<ColumnInfo>,
        binary: bool,
    },
    MoreResults {
        binary: bool,
    },
}

/// One authenticated MySQL connection.
pub struct MySqlSession<S: ByteStream = Tcp> {
    pub(crate) transport: PacketTransport<S>,
    pub(crate) config: Arc<MySqlConfig>,
    pub(crate) negotiated: Negotiated,
    pub(crate) state: SessionState,
    pub(crate) in_flight: bool,
    pub(crate) pending: Pending,
    pub(crate) status_flags: u16,
    pub(crate) affected_rows: u64,
    pub(crate) last_insert_id: u64,
    pub(crate) warnings: u16,
    server_variables: HashMap<String, String>,
    /// Last bound parameter type signature per statement id
    pub(crate) statements: HashMap<u32, Vec<(u8, bool)>>,
    /// Statements to close once the stream is idle
    pub(crate) deferred_close: Vec<u32>,
}

impl<S: ByteStream> std::fmt::Debug for MySqlSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSession")
            .field("state", &self.state)
            .field("connection_id", &self.negotiated.greeting.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

/// Convert an internal result into the public `Outcome`.
///
/// A cancellation observed through `cx` becomes `Outcome::Cancelled`.
pub(crate) fn finish<T>(cx: &Cx, result: Result<T, Error>) -> Outcome<T, Error> {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(Error::Cancelled) => match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => Outcome::Err(Error::Cancelled),
        },
        Err(e) => Outcome::Err(e),
    }
}

pub(crate) fn protocol_error(message: impl Into<String>, raw: Option<&[u8]>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: raw.map(<[u8]>::to_vec),
        source: None,
    })
}

fn broken_error() -> Error {
    connection_error(
        ConnectionErrorKind::Broken,
        "session is broken and must be discarded".to_string(),
        None,
    )
}

fn transaction_error(kind: TransactionErrorKind, message: &str) -> Error {
    Error::Transaction(TransactionError {
        kind,
        message: message.to_string(),
    })
}

impl MySqlSession<Tcp> {
    /// Open a TCP connection and authenticate.
    ///
    /// The configured connect timeout bounds the TCP connect and the
    /// handshake together.
    #[tracing::instrument(level = "debug", skip(cx, config), fields(host = %config.host, port = config.port))]
    pub async fn connect(cx: &Cx, config: Arc<MySqlConfig>) -> Outcome<Self, Error> {
        let deadline = Instant::now() + config.connect_timeout;
        let stream = match connect_tcp(&config.host, config.port, config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => return finish(cx, Err(e)),
        };
        finish(cx, Self::establish(cx, stream, config, deadline).await)
    }
}

impl<S: ByteStream> MySqlSession<S> {
    /// Authenticate over an already-open stream.
    pub async fn from_stream(cx: &Cx, stream: S, config: Arc<MySqlConfig>) -> Outcome<Self, Error> {
        let deadline = Instant::now() + config.connect_timeout;
        finish(cx, Self::establish(cx, stream, config, deadline).await)
    }

    async fn establish(
        cx: &Cx,
        stream: S,
        config: Arc<MySqlConfig>,
        deadline: Instant,
    ) -> Result<Self, Error> {
        let mut transport = PacketTransport::new(stream);
        transport.set_deadline(Some(deadline));
        let negotiated = handshake::perform(cx, &mut transport, &config).await?;
        transport.set_deadline(None);
        transport.set_max_packet_size(config.max_packet_size as usize);
        tracing::debug!(
            connection_id = negotiated.greeting.connection_id,
            server_version = %negotiated.greeting.server_version,
            "session ready"
        );
        Ok(Self {
            transport,
            config,
            status_flags: negotiated.status_flags,
            negotiated,
            state: SessionState::Ready,
            in_flight: false,
            pending: Pending::Idle,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            server_variables: HashMap::new(),
            statements: HashMap::new(),
            deferred_close: Vec::new(),
        })
    }

    pub fn config(&self) -> &Arc<MySqlConfig> {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && !self.in_flight
    }

    pub fn connection_id(&self) -> u32 {
        self.negotiated.greeting.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.negotiated.greeting.server_version
    }

    /// Capability flags both sides agreed on.
    pub fn capabilities(&self) -> u32 {
        self.negotiated.capabilities
    }

    /// Plugin that completed authentication.
    pub fn auth_plugin(&self) -> &str {
        &self.negotiated.auth_plugin
    }

    /// Status flags from the most recent OK or EOF packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & SERVER_STATUS_IN_TRANS != 0
    }

    pub(crate) fn no_backslash_escapes(&self) -> bool {
        self.status_flags & SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    /// Affected rows reported by the most recent OK packet.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Unread results from an earlier command are waiting on the stream.
    pub fn has_pending_results(&self) -> bool {
        !matches!(self.pending, Pending::Idle)
    }

    /// Cached value of a server variable (see [`Self::refresh_server_variables`]).
    pub fn server_variable(&self, name: &str) -> Option<&str> {
        self.server_variables.get(name).map(String::as_str)
    }

    /// Mark the start of an exchange without draining anything.
    pub(crate) fn guard(&mut self, cx: &Cx) -> Result<(), Error> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Broken => return Err(broken_error()),
            SessionState::Closed => return Err(Error::usage("session is closed")),
        }
        if self.in_flight {
            tracing::warn!("previous operation was abandoned mid-exchange; session broken");
            self.state = SessionState::Broken;
            return Err(broken_error());
        }
        if cx.is_cancel_requested() {
            return Err(Error::Cancelled);
        }
        self.in_flight = true;
        self.transport
            .set_deadline(self.config.command_timeout.map(|t| Instant::now() + t));
        Ok(())
    }

    /// Start a new command: guard, drain unread results, close deferred
    /// statements.
    pub(crate) async fn enter(&mut self, cx: &Cx) -> Result<(), Error> {
        self.guard(cx)?;
        self.drain_pending(cx).await?;
        for statement_id in std::mem::take(&mut self.deferred_close) {
            self.statements.remove(&statement_id);
            self.write_command(cx, &ClientCommand::StmtClose { statement_id })
                .await?;
        }
        Ok(())
    }

    /// End an exchange. Fatal errors break the session.
    pub(crate) fn leave<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        let was_in_flight = std::mem::replace(&mut self.in_flight, false);
        if let Err(e) = &result {
            if was_in_flight && e.is_fatal() && self.state == SessionState::Ready {
                tracing::debug!(error = %e, "session broken");
                self.state = SessionState::Broken;
            }
        }
        result
    }

    /// Validate, enter and send `command`.
    pub(crate) async fn start(&mut self, cx: &Cx, command: &ClientCommand<'_>) -> Result<(), Error> {
        command.validate()?;
        self.enter(cx).await?;
        self.write_command(cx, command).await
    }

    pub(crate) async fn write_command(
        &mut self,
        cx: &Cx,
        command: &ClientCommand<'_>,
    ) -> Result<(), Error> {
        tracing::debug!(command = ?command.code(), "dispatch");
        self.transport.reset_sequence();
        let payload = command.encode(self.negotiated.capabilities);
        self.transport.write_packet(cx, &payload).await
    }

    pub(crate) fn apply_ok(&mut self, ok: &OkPacket) {
        self.status_flags = ok.status_flags;
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
    }

    pub(crate) fn apply_eof(&mut self, eof: &EofPacket) {
        self.status_flags = eof.status_flags;
        self.warnings = eof.warnings;
    }

    pub(crate) fn parse_ok(&self, payload: &[u8]) -> Result<OkPacket, Error> {
        PacketReader::new(payload)
            .parse_ok_packet(self.negotiated.capabilities)
            .ok_or_else(|| protocol_error("malformed OK packet", Some(payload)))
    }

    pub(crate) fn parse_eof(payload: &[u8]) -> Result<EofPacket, Error> {
        PacketReader::new(payload)
            .parse_eof_packet()
            .ok_or_else(|| protocol_error("malformed EOF packet", Some(payload)))
    }

    /// Read an OK (or ERR) reply.
    pub(crate) async fn read_ok(&mut self, cx: &Cx, sql: Option<&str>) -> Result<OkPacket, Error> {
        let payload = self.transport.read_packet_raw(cx).await?;
        match PacketType::of(&payload) {
            PacketType::Ok => {
                let ok = self.parse_ok(&payload)?;
                self.apply_ok(&ok);
                Ok(ok)
            }
            PacketType::Error => Err(server_error(&payload, sql)),
            _ => Err(protocol_error("expected OK packet", Some(&payload))),
        }
    }

    /// Read column definitions followed by their EOF terminator.
    pub(crate) async fn read_column_defs(
        &mut self,
        cx: &Cx,
        count: usize,
    ) -> Result<Vec<ColumnDef>, Error> {
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.transport.read_packet(cx).await?;
            columns.push(parse_column_def(&payload)?);
        }
        let payload = self.transport.read_packet(cx).await?;
        if !is_eof_packet(&payload) {
            return Err(protocol_error(
                "expected EOF after column definitions",
                Some(&payload),
            ));
        }
        let eof = Self::parse_eof(&payload)?;
        self.apply_eof(&eof);
        Ok(columns)
    }

    /// Read the header of the next result in a chain.
    pub(crate) async fn read_result_header(
        &mut self,
        cx: &Cx,
        binary: bool,
        sql: Option<&str>,
    ) -> Result<ResultHeader, Error> {
        self.pending = Pending::Idle;
        let payload = self.transport.read_packet_raw(cx).await?;
        match PacketType::of(&payload) {
            PacketType::Ok => {
                let ok = self.parse_ok(&payload)?;
                self.apply_ok(&ok);
                if ok.more_results() {
                    self.pending = Pending::MoreResults { binary };
                }
                Ok(ResultHeader::Ack(ok))
            }
            PacketType::Error => Err(server_error(&payload, sql)),
            PacketType::LocalInfile => {
                self.decline_local_infile(cx, binary).await?;
                Err(Error::usage("LOAD DATA LOCAL INFILE is not supported"))
            }
            PacketType::Eof => Err(protocol_error(
                "unexpected EOF in place of a result",
                Some(&payload),
            )),
            PacketType::Data => {
                let count = PacketReader::new(&payload)
                    .read_lenenc_int()
                    .ok_or_else(|| protocol_error("malformed column count", Some(&payload)))?;
                let columns: Arc<[ColumnDef]> =
                    self.read_column_defs(cx, count as usize).await?.into();
                let info = Arc::new(ColumnInfo::new(
                    columns.iter().map(|c| c.name.clone()).collect(),
                ));
                // A cursor holds the rows server-side until COM_STMT_FETCH.
                if self.status_flags & SERVER_STATUS_CURSOR_EXISTS == 0 {
                    self.pending = Pending::Rows {
                        columns: Arc::clone(&columns),
                        info,
                        binary,
                    };
                }
                Ok(ResultHeader::Rows(columns))
            }
        }
    }

    /// Refuse a LOCAL INFILE request and consume the server's reply.
    async fn decline_local_infile(&mut self, cx: &Cx, binary: bool) -> Result<(), Error> {
        tracing::warn!("server requested LOCAL INFILE; declining");
        self.transport.write_packet(cx, &[]).await?;
        let reply = self.transport.read_packet_raw(cx).await?;
        if PacketType::of(&reply) == PacketType::Ok {
            let ok = self.parse_ok(&reply)?;
            self.apply_ok(&ok);
            if ok.more_results() {
                self.pending = Pending::MoreResults { binary };
            }
        }
        Ok(())
    }

    /// Read the next row packet of the current result.
    ///
    /// Returns `None` at the terminating EOF, which also moves the pending
    /// state on to the next result or to idle.
    pub(crate) async fn read_row_packet(
        &mut self,
        cx: &Cx,
        sql: Option<&str>,
    ) -> Result<Option<Vec<u8>>, Error> {
        let binary = match &self.pending {
            Pending::Rows { binary, .. } => *binary,
            _ => return Ok(None),
        };
        let payload = self.transport.read_packet_raw(cx).await?;
        if payload.first() == Some(&0xFF) {
            self.pending = Pending::Idle;
            return Err(server_error(&payload, sql));
        }
        if is_eof_packet(&payload) {
            let eof = Self::parse_eof(&payload)?;
            self.apply_eof(&eof);
            self.pending = if eof.more_results() {
                Pending::MoreResults { binary }
            } else {
                Pending::Idle
            };
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Discard everything still pending on the stream.
    ///
    /// Server errors met on the way are logged and dropped; transport errors
    /// propagate.
    async fn drain_pending(&mut self, cx: &Cx) -> Result<(), Error> {
        loop {
            let step = match self.pending {
                Pending::Idle => return Ok(()),
                Pending::Rows { .. } => self.read_row_packet(cx, None).await.map(drop),
                Pending::MoreResults { binary } => {
                    self.read_result_header(cx, binary, None).await.map(drop)
                }
            };
            match step {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(error = %e, "discarded error from unread result"),
            }
        }
    }

    /// Run a text query. The first result is read before this returns.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn query(&mut self, cx: &Cx, sql: &str) -> Outcome<QueryResults<'_, S>, Error> {
        let result = self.query_header(cx, sql).await;
        match self.leave(result) {
            Ok(header) => Outcome::Ok(QueryResults::new(self, header, sql, false)),
            Err(e) => finish(cx, Err(e)),
        }
    }

    pub(crate) async fn query_header(&mut self, cx: &Cx, sql: &str) -> Result<ResultHeader, Error> {
        self.start(cx, &ClientCommand::Query { sql }).await?;
        self.read_result_header(cx, false, Some(sql)).await
    }

    /// Run a text query and collect the rows of its first result.
    pub async fn query_rows(&mut self, cx: &Cx, sql: &str) -> Outcome<Vec<Row>, Error> {
        match self.query(cx, sql).await {
            Outcome::Ok(mut results) => results.collect_rows(cx).await,
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a statement (or several) and return the summed affected rows.
    pub async fn execute(&mut self, cx: &Cx, sql: &str) -> Outcome<u64, Error> {
        match self.query(cx, sql).await {
            Outcome::Ok(mut results) => results.drain(cx).await,
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run `sql`, discarding every result, inside one guarded exchange.
    pub(crate) async fn execute_inner(&mut self, cx: &Cx, sql: &str) -> Result<u64, Error> {
        let header = self.query_header(cx, sql).await?;
        self.consume_results(cx, header, Some(sql)).await
    }

    /// Read the rest of a result chain whose first header is `first`,
    /// discarding rows. Returns the summed affected rows.
    pub(crate) async fn consume_results(
        &mut self,
        cx: &Cx,
        first: ResultHeader,
        sql: Option<&str>,
    ) -> Result<u64, Error> {
        let mut total = match first {
            ResultHeader::Ack(ok) => ok.affected_rows,
            ResultHeader::Rows(_) => 0,
        };
        loop {
            match self.pending {
                Pending::Idle => return Ok(total),
                Pending::Rows { .. } => {
                    self.read_row_packet(cx, sql).await?;
                }
                Pending::MoreResults { binary } => {
                    if let ResultHeader::Ack(ok) = self.read_result_header(cx, binary, sql).await? {
                        total += ok.affected_rows;
                    }
                }
            }
        }
    }

    /// Start a transaction.
    pub async fn begin(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.in_transaction() {
            return Outcome::Err(transaction_error(
                TransactionErrorKind::AlreadyActive,
                "a transaction is already active",
            ));
        }
        let result = self.execute_inner(cx, "START TRANSACTION").await;
        finish(cx, self.leave(result).map(drop))
    }

    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.end_transaction(cx, "COMMIT").await
    }

    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.end_transaction(cx, "ROLLBACK").await
    }

    async fn end_transaction(&mut self, cx: &Cx, sql: &str) -> Outcome<(), Error> {
        if !self.in_transaction() {
            return Outcome::Err(transaction_error(
                TransactionErrorKind::NotActive,
                "no active transaction",
            ));
        }
        let result = self.execute_inner(cx, sql).await;
        finish(cx, self.leave(result).map(drop))
    }

    /// Reload the server variable cache with `SHOW VARIABLES` and apply
    /// `max_allowed_packet` to outgoing packets.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn refresh_server_variables(&mut self, cx: &Cx) -> Outcome<usize, Error> {
        let result = self.load_server_variables(cx).await;
        finish(cx, self.leave(result))
    }

    async fn load_server_variables(&mut self, cx: &Cx) -> Result<usize, Error> {
        const SQL: &str = "SHOW VARIABLES";
        let header = self.query_header(cx, SQL).await?;
        let ResultHeader::Rows(columns) = header else {
            return Err(protocol_error("SHOW VARIABLES returned no rows", None));
        };
        let mut variables = HashMap::new();
        while let Some(payload) = self.read_row_packet(cx, Some(SQL)).await? {
            let values = crate::codec::decode_text_row(&columns, &payload)?;
            if let [name, value, ..] = values.as_slice() {
                let text = |v: &mywire_core::Value| match v {
                    mywire_core::Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                    other => other.as_str().map(str::to_string).unwrap_or_default(),
                };
                variables.insert(text(name), text(value));
            }
        }
        if let Some(size) = variables
            .get("max_allowed_packet")
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.transport.set_max_packet_size(size);
        }
        tracing::debug!(count = variables.len(), "server variables loaded");
        self.server_variables = variables;
        Ok(self.server_variables.len())
    }

    /// Send COM_QUIT and release the stream. Errors while quitting are
    /// logged and swallowed.
    pub async fn close(mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.state == SessionState::Ready && !self.in_flight {
            if let Err(e) = self.write_command(cx, &ClientCommand::Quit).await {
                tracing::warn!(error = %e, "error while closing session");
            }
        }
        self.state = SessionState::Closed;
        Outcome::Ok(())
    }
}
