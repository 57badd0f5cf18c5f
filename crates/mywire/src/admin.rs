//! Auxiliary commands: schema management, server introspection and
//! connection maintenance.

use crate::connection::{MySqlSession, finish, protocol_error};
use crate::protocol::command::ReplicaRegistration;
use crate::protocol::{ClientCommand, PacketType, SetOption, is_eof_packet};
use crate::results::{QueryResults, ResultHeader};
use crate::stream::ByteStream;
use crate::transport::server_error;
use crate::types::{ColumnDef, parse_column_def};
use asupersync::{Cx, Outcome};
use mywire_core::Error;

impl<S: ByteStream> MySqlSession<S> {
    /// Send a command whose reply is a single OK packet.
    async fn simple_command(&mut self, cx: &Cx, command: &ClientCommand<'_>) -> Outcome<(), Error> {
        let result = self.simple_inner(cx, command).await;
        finish(cx, self.leave(result))
    }

    async fn simple_inner(&mut self, cx: &Cx, command: &ClientCommand<'_>) -> Result<(), Error> {
        self.start(cx, command).await?;
        self.read_ok(cx, None).await.map(drop)
    }

    /// Check that the server is alive.
    pub async fn ping(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::Ping).await
    }

    /// Change the default schema (COM_INIT_DB).
    pub async fn use_database(&mut self, cx: &Cx, schema: &str) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::InitDb { schema }).await
    }

    pub async fn create_database(&mut self, cx: &Cx, schema: &str) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::CreateDb { schema }).await
    }

    pub async fn drop_database(&mut self, cx: &Cx, schema: &str) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::DropDb { schema }).await
    }

    /// Ask the server to terminate connection `connection_id`.
    pub async fn kill(&mut self, cx: &Cx, connection_id: u32) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::ProcessKill { connection_id })
            .await
    }

    /// COM_TIME. Current servers answer with an error.
    pub async fn server_time(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::Time).await
    }

    /// Reset session state without re-authenticating.
    ///
    /// The server drops every prepared statement, so local statement
    /// bookkeeping is cleared as well.
    pub async fn reset_connection(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let outcome = self.simple_command(cx, &ClientCommand::ResetConnection).await;
        if matches!(outcome, Outcome::Ok(())) {
            self.statements.clear();
            self.deferred_close.clear();
        }
        outcome
    }

    /// Register this client as a replica, as sent before a binlog dump.
    pub async fn register_replica(
        &mut self,
        cx: &Cx,
        registration: &ReplicaRegistration,
    ) -> Outcome<(), Error> {
        self.simple_command(cx, &ClientCommand::RegisterSlave(registration))
            .await
    }

    /// Toggle multi-statement support (COM_SET_OPTION).
    pub async fn set_option(&mut self, cx: &Cx, option: SetOption) -> Outcome<(), Error> {
        let result = self.set_option_inner(cx, option).await;
        finish(cx, self.leave(result))
    }

    async fn set_option_inner(&mut self, cx: &Cx, option: SetOption) -> Result<(), Error> {
        self.start(cx, &ClientCommand::SetOption(option)).await?;
        let payload = self.transport.read_packet_raw(cx).await?;
        match PacketType::of(&payload) {
            PacketType::Eof => {
                let eof = Self::parse_eof(&payload)?;
                self.apply_eof(&eof);
                Ok(())
            }
            PacketType::Ok => {
                let ok = self.parse_ok(&payload)?;
                self.apply_ok(&ok);
                Ok(())
            }
            PacketType::Error => Err(server_error(&payload, None)),
            _ => Err(protocol_error("unexpected reply to COM_SET_OPTION", Some(&payload))),
        }
    }

    /// Human-readable server statistics (COM_STATISTICS).
    pub async fn statistics(&mut self, cx: &Cx) -> Outcome<String, Error> {
        let result = self.statistics_inner(cx).await;
        finish(cx, self.leave(result))
    }

    async fn statistics_inner(&mut self, cx: &Cx) -> Result<String, Error> {
        self.start(cx, &ClientCommand::Statistics).await?;
        let payload = self.transport.read_packet(cx).await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Column definitions of `table` matching `wildcard` (COM_FIELD_LIST).
    pub async fn field_list(
        &mut self,
        cx: &Cx,
        table: &str,
        wildcard: &str,
    ) -> Outcome<Vec<ColumnDef>, Error> {
        let result = self.field_list_inner(cx, table, wildcard).await;
        finish(cx, self.leave(result))
    }

    async fn field_list_inner(
        &mut self,
        cx: &Cx,
        table: &str,
        wildcard: &str,
    ) -> Result<Vec<ColumnDef>, Error> {
        self.start(cx, &ClientCommand::FieldList { table, wildcard })
            .await?;
        let mut columns = Vec::new();
        loop {
            let payload = self.transport.read_packet(cx).await?;
            if is_eof_packet(&payload) {
                let eof = Self::parse_eof(&payload)?;
                self.apply_eof(&eof);
                return Ok(columns);
            }
            columns.push(parse_column_def(&payload)?);
        }
    }

    /// Thread list as a result set (COM_PROCESS_INFO).
    pub async fn process_info(&mut self, cx: &Cx) -> Outcome<QueryResults<'_, S>, Error> {
        let result = self.process_info_header(cx).await;
        match self.leave(result) {
            Ok(header) => Outcome::Ok(QueryResults::new(self, header, "SHOW PROCESSLIST", false)),
            Err(e) => finish(cx, Err(e)),
        }
    }

    async fn process_info_header(&mut self, cx: &Cx) -> Result<ResultHeader, Error> {
        self.start(cx, &ClientCommand::ProcessInfo).await?;
        self.read_result_header(cx, false, None).await
    }
}
