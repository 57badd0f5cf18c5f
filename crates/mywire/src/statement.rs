//! Server-side prepared statements.
//!
//! Prepare once, execute many times with binary parameters. Parameter
//! types are only resent when their signature changes between executions,
//! and values above the configured long-data threshold are streamed ahead
//! of the execute packet.

#![allow(clippy::cast_possible_truncation)]

use crate::codec::decode_binary_row;
use crate::connection::{MySqlSession, finish};
use crate::protocol::prepared::{
    ExecuteRequest, cursor, long_data_packets, parse_stmt_prepare_ok, type_signature,
};
use crate::protocol::server_status::SERVER_STATUS_LAST_ROW_SENT;
use crate::protocol::{ClientCommand, MAX_PACKET_SIZE, is_eof_packet};
use crate::results::{QueryResults, ResultHeader};
use crate::sql;
use crate::stream::ByteStream;
use crate::transport::server_error;
use crate::types::ColumnDef;
use asupersync::{Cx, Outcome};
use mywire_core::{ColumnInfo, Error, Row, Value};
use std::sync::Arc;

/// Bytes of a COM_STMT_SEND_LONG_DATA header (command, statement id, param index).
const LONG_DATA_HEADER: usize = 7;

/// A statement prepared on the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    id: u32,
    sql: String,
    params: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
    cursor: Option<(Arc<[ColumnDef]>, Arc<ColumnInfo>)>,
}

impl PreparedStatement {
    /// Server-assigned statement id.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter descriptors, one per placeholder.
    pub fn params(&self) -> &[ColumnDef] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Result column descriptors (empty for statements without rows).
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// A read-only cursor is open on this statement.
    pub fn has_open_cursor(&self) -> bool {
        self.cursor.is_some()
    }
}

/// Rows returned by one COM_STMT_FETCH.
#[derive(Debug, Clone, Default)]
pub struct CursorBatch {
    pub rows: Vec<Row>,
    /// The server sent the last row; the cursor is closed
    pub exhausted: bool,
}

fn long_data_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Text(s) | Value::Decimal(s) => Some(s.as_bytes().to_vec()),
        Value::Bytes(b) => Some(b.clone()),
        Value::Json(j) => Some(j.to_string().into_bytes()),
        _ => None,
    }
}

fn check_param_count(stmt: &PreparedStatement, params: &[Value]) -> Result<(), Error> {
    if params.len() == stmt.params.len() {
        Ok(())
    } else {
        Err(Error::usage(format!(
            "statement expects {} parameters, got {}",
            stmt.params.len(),
            params.len()
        )))
    }
}

impl<S: ByteStream> MySqlSession<S> {
    /// Prepare `sql` on the server.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn prepare(&mut self, cx: &Cx, sql: &str) -> Outcome<PreparedStatement, Error> {
        let result = self.prepare_inner(cx, sql).await;
        finish(cx, self.leave(result))
    }

    pub(crate) async fn prepare_inner(
        &mut self,
        cx: &Cx,
        sql: &str,
    ) -> Result<PreparedStatement, Error> {
        self.start(cx, &ClientCommand::StmtPrepare { sql }).await?;
        let payload = self.transport.read_packet_raw(cx).await?;
        if payload.first() == Some(&0xFF) {
            return Err(server_error(&payload, Some(sql)));
        }
        let ok = parse_stmt_prepare_ok(&payload)?;
        let params = if ok.num_params > 0 {
            self.read_column_defs(cx, usize::from(ok.num_params)).await?
        } else {
            Vec::new()
        };
        let columns = if ok.num_columns > 0 {
            self.read_column_defs(cx, usize::from(ok.num_columns)).await?
        } else {
            Vec::new()
        };
        tracing::debug!(
            statement_id = ok.statement_id,
            params = params.len(),
            columns = columns.len(),
            "prepared"
        );
        Ok(PreparedStatement {
            id: ok.statement_id,
            sql: sql.to_string(),
            params,
            columns,
            cursor: None,
        })
    }

    /// Stream oversized parameters and send (or queue) the execute packet.
    ///
    /// The caller has already entered the exchange.
    pub(crate) async fn send_execute(
        &mut self,
        cx: &Cx,
        statement_id: u32,
        params: &[Value],
        cursor_flag: u8,
        flush: bool,
    ) -> Result<(), Error> {
        let threshold = self.config.long_data_threshold;
        let chunk = self
            .transport
            .max_packet_size()
            .min(MAX_PACKET_SIZE)
            .saturating_sub(LONG_DATA_HEADER);
        let mut long_data = vec![false; params.len()];
        for (index, param) in params.iter().enumerate() {
            if param.payload_len().is_none_or(|len| len <= threshold) {
                continue;
            }
            let Some(data) = long_data_bytes(param) else {
                continue;
            };
            tracing::debug!(statement_id, index, len = data.len(), "sending long data");
            for packet in long_data_packets(statement_id, index as u16, &data, chunk) {
                self.transport.reset_sequence();
                self.transport.queue_packet(cx, &packet).await?;
            }
            long_data[index] = true;
        }

        let signature = type_signature(params);
        let send_types = self.statements.get(&statement_id) != Some(&signature);
        let request = ExecuteRequest {
            statement_id,
            params,
            cursor: cursor_flag,
            send_types,
            long_data: &long_data,
            query_attributes: self.negotiated.capabilities
                & crate::protocol::capabilities::CLIENT_QUERY_ATTRIBUTES
                != 0,
        };
        let payload = ClientCommand::StmtExecute(request).encode(self.negotiated.capabilities);
        self.transport.reset_sequence();
        self.transport.queue_packet(cx, &payload).await?;
        if flush {
            self.transport.flush().await?;
        }
        self.statements.insert(statement_id, signature);
        Ok(())
    }

    /// Execute a prepared statement. The first result is read before this
    /// returns.
    #[tracing::instrument(level = "debug", skip(self, cx, stmt, params), fields(statement_id = stmt.id))]
    pub async fn execute_statement(
        &mut self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Outcome<QueryResults<'_, S>, Error> {
        let result = self.execute_header(cx, stmt, params).await;
        match self.leave(result) {
            Ok(header) => Outcome::Ok(QueryResults::new(self, header, &stmt.sql, true)),
            Err(e) => finish(cx, Err(e)),
        }
    }

    async fn execute_header(
        &mut self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<ResultHeader, Error> {
        check_param_count(stmt, params)?;
        self.enter(cx).await?;
        self.send_execute(cx, stmt.id, params, cursor::NO_CURSOR, true)
            .await?;
        self.read_result_header(cx, true, Some(&stmt.sql)).await
    }

    /// Execute with a read-only cursor; rows are then pulled with
    /// [`Self::fetch`].
    ///
    /// Returns `false` when the statement produced no result set.
    pub async fn open_cursor(
        &mut self,
        cx: &Cx,
        stmt: &mut PreparedStatement,
        params: &[Value],
    ) -> Outcome<bool, Error> {
        let result = self.open_cursor_inner(cx, stmt, params).await;
        finish(cx, self.leave(result))
    }

    async fn open_cursor_inner(
        &mut self,
        cx: &Cx,
        stmt: &mut PreparedStatement,
        params: &[Value],
    ) -> Result<bool, Error> {
        check_param_count(stmt, params)?;
        self.enter(cx).await?;
        stmt.cursor = None;
        self.send_execute(cx, stmt.id, params, cursor::READ_ONLY, true)
            .await?;
        match self.read_result_header(cx, true, Some(&stmt.sql)).await? {
            ResultHeader::Ack(_) => Ok(false),
            ResultHeader::Rows(columns) => {
                if self.has_pending_results() {
                    tracing::warn!(statement_id = stmt.id, "server streamed rows instead of opening a cursor");
                    while self.read_row_packet(cx, Some(&stmt.sql)).await?.is_some() {}
                    return Ok(false);
                }
                let info = Arc::new(ColumnInfo::new(
                    columns.iter().map(|c| c.name.clone()).collect(),
                ));
                stmt.cursor = Some((columns, info));
                Ok(true)
            }
        }
    }

    /// Fetch up to `rows` rows from the statement's open cursor.
    pub async fn fetch(
        &mut self,
        cx: &Cx,
        stmt: &mut PreparedStatement,
        rows: u32,
    ) -> Outcome<CursorBatch, Error> {
        let result = self.fetch_inner(cx, stmt, rows).await;
        finish(cx, self.leave(result))
    }

    async fn fetch_inner(
        &mut self,
        cx: &Cx,
        stmt: &mut PreparedStatement,
        rows: u32,
    ) -> Result<CursorBatch, Error> {
        let Some((columns, info)) = stmt.cursor.clone() else {
            return Err(Error::usage("statement has no open cursor"));
        };
        let command = ClientCommand::StmtFetch {
            statement_id: stmt.id,
            rows,
        };
        self.start(cx, &command).await?;
        let mut batch = CursorBatch::default();
        let mut decode_error = None;
        loop {
            let payload = self.transport.read_packet_raw(cx).await?;
            if payload.first() == Some(&0xFF) {
                stmt.cursor = None;
                return Err(server_error(&payload, Some(&stmt.sql)));
            }
            if is_eof_packet(&payload) {
                let eof = Self::parse_eof(&payload)?;
                self.apply_eof(&eof);
                batch.exhausted = eof.status_flags & SERVER_STATUS_LAST_ROW_SENT != 0;
                break;
            }
            // Keep reading to the EOF so the stream stays aligned.
            match decode_binary_row(&columns, &payload) {
                Ok(values) => batch.rows.push(Row::with_columns(Arc::clone(&info), values)),
                Err(e) => {
                    decode_error.get_or_insert(e);
                }
            }
        }
        if batch.exhausted {
            stmt.cursor = None;
        }
        match decode_error {
            Some(e) => Err(e),
            None => Ok(batch),
        }
    }

    /// COM_STMT_RESET: discard long data and close any open cursor.
    pub async fn reset_statement(&mut self, cx: &Cx, stmt: &mut PreparedStatement) -> Outcome<(), Error> {
        stmt.cursor = None;
        let result = self.reset_inner(cx, stmt).await;
        finish(cx, self.leave(result))
    }

    async fn reset_inner(&mut self, cx: &Cx, stmt: &PreparedStatement) -> Result<(), Error> {
        let command = ClientCommand::StmtReset {
            statement_id: stmt.id,
        };
        self.start(cx, &command).await?;
        self.read_ok(cx, Some(&stmt.sql)).await.map(drop)
    }

    /// Release the statement on the server. Unread results are drained
    /// first.
    pub async fn close_statement(&mut self, cx: &Cx, stmt: PreparedStatement) -> Outcome<(), Error> {
        let statement_id = stmt.id;
        let result = self
            .start(cx, &ClientCommand::StmtClose { statement_id })
            .await;
        self.statements.remove(&statement_id);
        finish(cx, self.leave(result))
    }

    /// Run `sql` with positional `?` parameters.
    ///
    /// With server-side prepare enabled the statement is prepared, executed
    /// and closed once its results have been read; otherwise the parameters
    /// are escaped into the SQL text, honouring `NO_BACKSLASH_ESCAPES`.
    #[tracing::instrument(level = "debug", skip(self, cx, params))]
    pub async fn query_with_params(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<QueryResults<'_, S>, Error> {
        if self.config.server_side_prepare {
            let result = self.prepare_and_execute(cx, sql, params).await;
            return match self.leave(result) {
                Ok(header) => Outcome::Ok(QueryResults::new(self, header, sql, true)),
                Err(e) => finish(cx, Err(e)),
            };
        }
        let text = match sql::interpolate_params(sql, params, self.no_backslash_escapes()) {
            Ok(text) => text,
            Err(e) => return Outcome::Err(e),
        };
        let result = self.query_header(cx, &text).await;
        match self.leave(result) {
            Ok(header) => Outcome::Ok(QueryResults::new(self, header, &text, false)),
            Err(e) => finish(cx, Err(e)),
        }
    }

    async fn prepare_and_execute(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Result<ResultHeader, Error> {
        let stmt = self.prepare_inner(cx, sql).await?;
        self.deferred_close.push(stmt.id);
        check_param_count(&stmt, params)?;
        self.send_execute(cx, stmt.id, params, cursor::NO_CURSOR, true)
            .await?;
        self.read_result_header(cx, true, Some(sql)).await
    }
}
