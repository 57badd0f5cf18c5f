//! Client commands as a closed set.
//!
//! Every command the session can send is a [`ClientCommand`] variant with
//! an exact payload encoding and a fixed [`ResponseShape`] describing what
//! the server sends back.

#![allow(clippy::cast_possible_truncation)]

use super::capabilities::CLIENT_QUERY_ATTRIBUTES;
use super::prepared::ExecuteRequest;
use super::{Command, PacketWriter, SetOption};
use mywire_core::Error;

/// What the server replies to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// No reply at all
    None,
    /// OK or ERR
    Ok,
    /// EOF or ERR (COM_SET_OPTION)
    Eof,
    /// OK, or a result set, possibly followed by more results
    ResultSet,
    /// A single human-readable text packet
    Text,
    /// Column definitions terminated by EOF
    ColumnList,
    /// COM_STMT_PREPARE_OK plus parameter and column definitions
    PrepareOk,
    /// Binary rows of an open cursor terminated by EOF
    Rows,
    /// An open-ended stream of binlog event packets
    EventStream,
}

/// Slave registration sent before a binlog dump.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicaRegistration {
    pub server_id: u32,
    pub hostname: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

/// A command sent to the server.
#[derive(Debug, Clone, Copy)]
pub enum ClientCommand<'a> {
    Quit,
    InitDb { schema: &'a str },
    Query { sql: &'a str },
    FieldList { table: &'a str, wildcard: &'a str },
    CreateDb { schema: &'a str },
    DropDb { schema: &'a str },
    Statistics,
    ProcessInfo,
    ProcessKill { connection_id: u32 },
    Ping,
    Time,
    SetOption(SetOption),
    ResetConnection,
    StmtPrepare { sql: &'a str },
    StmtExecute(ExecuteRequest<'a>),
    StmtClose { statement_id: u32 },
    StmtReset { statement_id: u32 },
    StmtFetch { statement_id: u32, rows: u32 },
    RegisterSlave(&'a ReplicaRegistration),
    BinlogDump {
        position: u32,
        flags: u16,
        server_id: u32,
        file: &'a str,
    },
}

impl ClientCommand<'_> {
    pub fn code(&self) -> Command {
        match self {
            ClientCommand::Quit => Command::Quit,
            ClientCommand::InitDb { .. } => Command::InitDb,
            ClientCommand::Query { .. } => Command::Query,
            ClientCommand::FieldList { .. } => Command::FieldList,
            ClientCommand::CreateDb { .. } => Command::CreateDb,
            ClientCommand::DropDb { .. } => Command::DropDb,
            ClientCommand::Statistics => Command::Statistics,
            ClientCommand::ProcessInfo => Command::ProcessInfo,
            ClientCommand::ProcessKill { .. } => Command::ProcessKill,
            ClientCommand::Ping => Command::Ping,
            ClientCommand::Time => Command::Time,
            ClientCommand::SetOption(_) => Command::SetOption,
            ClientCommand::ResetConnection => Command::ResetConnection,
            ClientCommand::StmtPrepare { .. } => Command::StmtPrepare,
            ClientCommand::StmtExecute(_) => Command::StmtExecute,
            ClientCommand::StmtClose { .. } => Command::StmtClose,
            ClientCommand::StmtReset { .. } => Command::StmtReset,
            ClientCommand::StmtFetch { .. } => Command::StmtFetch,
            ClientCommand::RegisterSlave(_) => Command::RegisterSlave,
            ClientCommand::BinlogDump { .. } => Command::BinlogDump,
        }
    }

    pub fn response_shape(&self) -> ResponseShape {
        match self {
            ClientCommand::Quit | ClientCommand::StmtClose { .. } => ResponseShape::None,
            ClientCommand::InitDb { .. }
            | ClientCommand::CreateDb { .. }
            | ClientCommand::DropDb { .. }
            | ClientCommand::ProcessKill { .. }
            | ClientCommand::Ping
            | ClientCommand::Time
            | ClientCommand::ResetConnection
            | ClientCommand::StmtReset { .. }
            | ClientCommand::RegisterSlave(_) => ResponseShape::Ok,
            ClientCommand::SetOption(_) => ResponseShape::Eof,
            ClientCommand::Query { .. }
            | ClientCommand::ProcessInfo
            | ClientCommand::StmtExecute(_) => ResponseShape::ResultSet,
            ClientCommand::Statistics => ResponseShape::Text,
            ClientCommand::FieldList { .. } => ResponseShape::ColumnList,
            ClientCommand::StmtPrepare { .. } => ResponseShape::PrepareOk,
            ClientCommand::StmtFetch { .. } => ResponseShape::Rows,
            ClientCommand::BinlogDump { .. } => ResponseShape::EventStream,
        }
    }

    /// Reject arguments the server would refuse, before any I/O.
    pub fn validate(&self) -> Result<(), Error> {
        let required = |what: &str, value: &str| {
            if value.trim().is_empty() {
                Err(Error::usage(format!("{what} must not be empty")))
            } else {
                Ok(())
            }
        };
        match self {
            ClientCommand::InitDb { schema }
            | ClientCommand::CreateDb { schema }
            | ClientCommand::DropDb { schema } => required("database name", schema),
            ClientCommand::FieldList { table, .. } => required("table name", table),
            ClientCommand::Query { sql } | ClientCommand::StmtPrepare { sql } => {
                required("SQL text", sql)
            }
            _ => Ok(()),
        }
    }

    /// Encode the command payload.
    pub fn encode(&self, capabilities: u32) -> Vec<u8> {
        let mut w = PacketWriter::command(self.code());
        match self {
            ClientCommand::Quit
            | ClientCommand::Statistics
            | ClientCommand::ProcessInfo
            | ClientCommand::Ping
            | ClientCommand::Time
            | ClientCommand::ResetConnection => {}
            ClientCommand::InitDb { schema }
            | ClientCommand::CreateDb { schema }
            | ClientCommand::DropDb { schema } => w.write_bytes(schema.as_bytes()),
            ClientCommand::Query { sql } => {
                if capabilities & CLIENT_QUERY_ATTRIBUTES != 0 {
                    // parameter_count = 0, parameter_set_count = 1
                    w.write_lenenc_int(0);
                    w.write_lenenc_int(1);
                }
                w.write_bytes(sql.as_bytes());
            }
            ClientCommand::StmtPrepare { sql } => w.write_bytes(sql.as_bytes()),
            ClientCommand::FieldList { table, wildcard } => {
                w.write_null_string(table);
                w.write_bytes(wildcard.as_bytes());
            }
            ClientCommand::ProcessKill { connection_id } => w.write_u32_le(*connection_id),
            ClientCommand::SetOption(option) => w.write_u16_le(*option as u16),
            ClientCommand::StmtExecute(request) => request.write_body(&mut w),
            ClientCommand::StmtClose { statement_id }
            | ClientCommand::StmtReset { statement_id } => w.write_u32_le(*statement_id),
            ClientCommand::StmtFetch { statement_id, rows } => {
                w.write_u32_le(*statement_id);
                w.write_u32_le(*rows);
            }
            ClientCommand::RegisterSlave(reg) => {
                w.write_u32_le(reg.server_id);
                w.write_pascal_string(&reg.hostname);
                w.write_pascal_string(&reg.user);
                w.write_pascal_string(&reg.password);
                w.write_u16_le(reg.port);
                // replication rank, master id
                w.write_u32_le(0);
                w.write_u32_le(0);
            }
            ClientCommand::BinlogDump {
                position,
                flags,
                server_id,
                file,
            } => {
                w.write_u32_le(*position);
                w.write_u16_le(*flags);
                w.write_u32_le(*server_id);
                w.write_bytes(file.as_bytes());
            }
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::prepared::cursor;

    #[test]
    fn test_query_encoding() {
        let cmd = ClientCommand::Query { sql: "SELECT 1" };
        assert_eq!(cmd.encode(0), b"\x03SELECT 1");
        assert_eq!(
            cmd.encode(CLIENT_QUERY_ATTRIBUTES),
            b"\x03\x00\x01SELECT 1"
        );
        assert_eq!(cmd.response_shape(), ResponseShape::ResultSet);
    }

    #[test]
    fn test_field_list_encoding() {
        let cmd = ClientCommand::FieldList {
            table: "users",
            wildcard: "%",
        };
        assert_eq!(cmd.encode(0), b"\x04users\0%");
        assert_eq!(cmd.response_shape(), ResponseShape::ColumnList);
    }

    #[test]
    fn test_fixed_argument_commands() {
        assert_eq!(
            ClientCommand::ProcessKill { connection_id: 5 }.encode(0),
            vec![0x0c, 5, 0, 0, 0]
        );
        assert_eq!(
            ClientCommand::SetOption(SetOption::MultiStatementsOff).encode(0),
            vec![0x1b, 1, 0]
        );
        assert_eq!(
            ClientCommand::StmtFetch {
                statement_id: 2,
                rows: 100
            }
            .encode(0),
            vec![0x1c, 2, 0, 0, 0, 100, 0, 0, 0]
        );
        assert_eq!(ClientCommand::Ping.encode(0), vec![0x0e]);
        assert_eq!(ClientCommand::StmtClose { statement_id: 1 }.response_shape(), ResponseShape::None);
    }

    #[test]
    fn test_binlog_dump_encoding() {
        let cmd = ClientCommand::BinlogDump {
            position: 4,
            flags: 0,
            server_id: 77,
            file: "binlog.000001",
        };
        let bytes = cmd.encode(0);
        assert_eq!(&bytes[..11], &[0x12, 4, 0, 0, 0, 0, 0, 77, 0, 0, 0]);
        assert_eq!(&bytes[11..], b"binlog.000001");
        assert_eq!(cmd.response_shape(), ResponseShape::EventStream);
    }

    #[test]
    fn test_register_slave_encoding() {
        let reg = ReplicaRegistration {
            server_id: 9,
            hostname: "h".into(),
            user: String::new(),
            password: String::new(),
            port: 3306,
        };
        let bytes = ClientCommand::RegisterSlave(&reg).encode(0);
        assert_eq!(
            bytes,
            vec![0x15, 9, 0, 0, 0, 1, b'h', 0, 0, 0xEA, 0x0C, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_execute_goes_through_request() {
        let req = ExecuteRequest {
            statement_id: 3,
            params: &[],
            cursor: cursor::NO_CURSOR,
            send_types: true,
            long_data: &[],
            query_attributes: false,
        };
        assert_eq!(
            ClientCommand::StmtExecute(req).encode(0),
            vec![0x17, 3, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        assert!(matches!(
            ClientCommand::InitDb { schema: "" }.validate(),
            Err(Error::Usage(_))
        ));
        assert!(ClientCommand::FieldList { table: " ", wildcard: "" }.validate().is_err());
        assert!(ClientCommand::CreateDb { schema: "x" }.validate().is_ok());
        assert!(ClientCommand::Ping.validate().is_ok());
    }
}
