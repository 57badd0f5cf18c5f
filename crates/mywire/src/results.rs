//! Multi-result consumption.
//!
//! A command can answer with a chain of results. [`QueryResults`] holds the
//! current one; rows are pulled on demand and [`QueryResults::next_result`]
//! moves along the chain. Dropping it early is fine: the session drains the
//! rest before its next command.

use crate::codec::{decode_binary_row, decode_text_row};
use crate::connection::{MySqlSession, Pending, finish};
use crate::protocol::OkPacket;
use crate::stream::{ByteStream, Tcp};
use crate::types::ColumnDef;
use asupersync::{Cx, Outcome};
use mywire_core::{Error, Row};
use std::sync::Arc;

/// Header of one result in a chain.
#[derive(Debug, Clone)]
pub enum ResultHeader {
    /// Statement without a result set
    Ack(OkPacket),
    /// Result set with these columns
    Rows(Arc<[ColumnDef]>),
}

/// The results of one command, borrowed from its session.
pub struct QueryResults<'a, S: ByteStream = Tcp> {
    session: &'a mut MySqlSession<S>,
    header: ResultHeader,
    sql: String,
    binary: bool,
    affected_rows: u64,
}

impl<S: ByteStream> std::fmt::Debug for QueryResults<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResults")
            .field("header", &self.header)
            .field("binary", &self.binary)
            .field("affected_rows", &self.affected_rows)
            .finish_non_exhaustive()
    }
}

impl<'a, S: ByteStream> QueryResults<'a, S> {
    pub(crate) fn new(
        session: &'a mut MySqlSession<S>,
        header: ResultHeader,
        sql: &str,
        binary: bool,
    ) -> Self {
        let affected_rows = match &header {
            ResultHeader::Ack(ok) => ok.affected_rows,
            ResultHeader::Rows(_) => 0,
        };
        Self {
            session,
            header,
            sql: sql.to_string(),
            binary,
            affected_rows,
        }
    }

    /// The result currently positioned on.
    pub fn current(&self) -> &ResultHeader {
        &self.header
    }

    /// Columns of the current result, if it is a result set.
    pub fn columns(&self) -> Option<&[ColumnDef]> {
        match &self.header {
            ResultHeader::Rows(columns) => Some(columns),
            ResultHeader::Ack(_) => None,
        }
    }

    /// Affected rows summed over the results seen so far.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.session.last_insert_id
    }

    /// Rows were produced by a prepared statement.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Next row of the current result; `None` once it is exhausted.
    ///
    /// A row that fails to decode yields `Error::Type` and the stream stays
    /// usable.
    pub async fn next_row(&mut self, cx: &Cx) -> Outcome<Option<Row>, Error> {
        let result = self.read_row(cx).await;
        finish(cx, result)
    }

    async fn read_row(&mut self, cx: &Cx) -> Result<Option<Row>, Error> {
        let Pending::Rows {
            columns,
            info,
            binary,
        } = &self.session.pending
        else {
            return Ok(None);
        };
        let (columns, info, binary) = (Arc::clone(columns), Arc::clone(info), *binary);
        self.session.guard(cx)?;
        let packet = self.session.read_row_packet(cx, Some(&self.sql)).await;
        let Some(payload) = self.session.leave(packet)? else {
            return Ok(None);
        };
        let values = if binary {
            decode_binary_row(&columns, &payload)?
        } else {
            decode_text_row(&columns, &payload)?
        };
        Ok(Some(Row::with_columns(info, values)))
    }

    /// Collect the remaining rows of the current result.
    pub async fn collect_rows(&mut self, cx: &Cx) -> Outcome<Vec<Row>, Error> {
        let mut rows = Vec::new();
        loop {
            match self.read_row(cx).await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => return Outcome::Ok(rows),
                Err(e) => return finish(cx, Err(e)),
            }
        }
    }

    /// Move to the next result, skipping unread rows of the current one.
    ///
    /// Returns `false` once the chain is exhausted, and keeps returning
    /// `false` on further calls.
    pub async fn next_result(&mut self, cx: &Cx) -> Outcome<bool, Error> {
        if matches!(self.session.pending, Pending::Idle) {
            return Outcome::Ok(false);
        }
        let result = self.advance(cx).await;
        finish(cx, self.session.leave(result))
    }

    async fn advance(&mut self, cx: &Cx) -> Result<bool, Error> {
        self.session.guard(cx)?;
        while matches!(self.session.pending, Pending::Rows { .. }) {
            self.session.read_row_packet(cx, Some(&self.sql)).await?;
        }
        let Pending::MoreResults { binary } = self.session.pending else {
            return Ok(false);
        };
        let header = self
            .session
            .read_result_header(cx, binary, Some(&self.sql))
            .await?;
        if let ResultHeader::Ack(ok) = &header {
            self.affected_rows += ok.affected_rows;
        }
        self.header = header;
        Ok(true)
    }

    /// Consume every remaining result and return the summed affected rows.
    pub async fn drain(&mut self, cx: &Cx) -> Outcome<u64, Error> {
        loop {
            match self.next_result(cx).await {
                Outcome::Ok(true) => {}
                Outcome::Ok(false) => return Outcome::Ok(self.affected_rows),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
    }
}
