//! Prepared statement (binary protocol) payloads.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: COM_STMT_PREPARE with SQL. The server answers with
//!    statement id, column count and parameter count, then the parameter
//!    definitions and the column definitions, each block EOF-terminated.
//! 2. **Long data** (optional): COM_STMT_SEND_LONG_DATA per chunk; no reply.
//! 3. **Execute**: COM_STMT_EXECUTE with the NULL bitmap, type pairs and
//!    binary values. The reply is an OK or a binary result set.
//! 4. **Fetch** (cursor): COM_STMT_FETCH for the next batch of rows.
//! 5. **Close**: COM_STMT_CLOSE; no reply.

#![allow(clippy::cast_possible_truncation)]

use super::{Command, PacketReader, PacketWriter};
use crate::codec;
use mywire_core::error::ProtocolError;
use mywire_core::{Error, Value};

/// COM_STMT_EXECUTE flag byte.
pub mod cursor {
    pub const NO_CURSOR: u8 = 0x00;
    pub const READ_ONLY: u8 = 0x01;
    /// Parameter count is present (query attributes)
    pub const PARAMETER_COUNT_AVAILABLE: u8 = 0x08;
}

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders
    pub num_params: u16,
    pub warnings: u16,
}

/// Parse a COM_STMT_PREPARE_OK payload.
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Result<StmtPrepareOk, Error> {
    let mut reader = PacketReader::new(data);
    let malformed = || {
        Error::Protocol(ProtocolError {
            message: "malformed COM_STMT_PREPARE response".to_string(),
            raw_data: Some(data.to_vec()),
            source: None,
        })
    };
    if reader.read_u8() != Some(0x00) {
        return Err(malformed());
    }
    let statement_id = reader.read_u32_le().ok_or_else(malformed)?;
    let num_columns = reader.read_u16_le().ok_or_else(malformed)?;
    let num_params = reader.read_u16_le().ok_or_else(malformed)?;
    reader.skip(1);
    let warnings = reader.read_u16_le().unwrap_or(0);
    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Arguments of one COM_STMT_EXECUTE.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
    pub statement_id: u32,
    pub params: &'a [Value],
    /// [`cursor::NO_CURSOR`] or [`cursor::READ_ONLY`]
    pub cursor: u8,
    /// Send the type pairs (first execution or changed types)
    pub send_types: bool,
    /// Parameters already streamed with COM_STMT_SEND_LONG_DATA
    pub long_data: &'a [bool],
    /// `CLIENT_QUERY_ATTRIBUTES` was negotiated
    pub query_attributes: bool,
}

impl ExecuteRequest<'_> {
    /// Append the execute body (everything after the command byte).
    pub fn write_body(&self, writer: &mut PacketWriter) {
        let mut flags = self.cursor;
        if self.query_attributes {
            flags |= cursor::PARAMETER_COUNT_AVAILABLE;
        }
        writer.write_u32_le(self.statement_id);
        writer.write_u8(flags);
        // Iteration count: always 1
        writer.write_u32_le(1);

        if self.params.is_empty() && !self.query_attributes {
            return;
        }
        if self.query_attributes {
            writer.write_lenenc_int(self.params.len() as u64);
        }
        if self.params.is_empty() {
            return;
        }

        let mut null_bitmap = vec![0u8; self.params.len().div_ceil(8)];
        for (i, param) in self.params.iter().enumerate() {
            if param.is_null() {
                null_bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        writer.write_bytes(&null_bitmap);

        writer.write_u8(u8::from(self.send_types));
        if self.send_types {
            for param in self.params {
                codec::write_param_type(writer, param);
                if self.query_attributes {
                    // Positional parameters carry an empty name.
                    writer.write_lenenc_int(0);
                }
            }
        }

        for (i, param) in self.params.iter().enumerate() {
            if self.long_data.get(i).copied().unwrap_or(false) {
                continue;
            }
            codec::write_param_value(writer, param);
        }
    }
}

/// Type signature used to decide whether types must be resent.
pub fn type_signature(params: &[Value]) -> Vec<(u8, bool)> {
    params
        .iter()
        .map(|p| {
            let (field_type, unsigned) = codec::param_type(p);
            (field_type.code(), unsigned)
        })
        .collect()
}

/// COM_STMT_SEND_LONG_DATA payloads for one parameter, split into chunks
/// of at most `chunk_size` data bytes.
pub fn long_data_packets(
    statement_id: u32,
    param_index: u16,
    data: &[u8],
    chunk_size: usize,
) -> Vec<Vec<u8>> {
    let chunk_size = chunk_size.max(1);
    let mut packets = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut chunks = data.chunks(chunk_size).peekable();
    if chunks.peek().is_none() {
        packets.push(long_data_header(statement_id, param_index).into_bytes());
    }
    for chunk in chunks {
        let mut writer = long_data_header(statement_id, param_index);
        writer.write_bytes(chunk);
        packets.push(writer.into_bytes());
    }
    packets
}

fn long_data_header(statement_id: u32, param_index: u16) -> PacketWriter {
    let mut writer = PacketWriter::command(Command::StmtSendLongData);
    writer.write_u32_le(statement_id);
    writer.write_u16_le(param_index);
    writer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn body(req: &ExecuteRequest<'_>) -> Vec<u8> {
        let mut w = PacketWriter::new();
        req.write_body(&mut w);
        w.into_bytes()
    }

    fn request(params: &[Value]) -> ExecuteRequest<'_> {
        ExecuteRequest {
            statement_id: 1,
            params,
            cursor: cursor::NO_CURSOR,
            send_types: true,
            long_data: &[],
            query_attributes: false,
        }
    }

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let data = [0x00, 0x01, 0, 0, 0, 0x02, 0, 0x03, 0, 0x00, 0x00, 0x00];
        let ok = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(ok.statement_id, 1);
        assert_eq!(ok.num_columns, 2);
        assert_eq!(ok.num_params, 3);
        assert!(parse_stmt_prepare_ok(&[0xFF, 1, 2]).is_err());
        assert!(parse_stmt_prepare_ok(&[0x00, 1]).is_err());
    }

    #[test]
    fn test_execute_no_params() {
        assert_eq!(body(&request(&[])), vec![1, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_execute_with_params() {
        let params = [Value::Text("Tom".into()), Value::Int(25)];
        let bytes = body(&request(&params));
        let mut r = PacketReader::new(&bytes);
        assert!(r.skip(9));
        assert_eq!(r.read_u8(), Some(0), "null bitmap");
        assert_eq!(r.read_u8(), Some(1), "new params bound");
        assert_eq!(r.read_bytes(2), Some(&[FieldType::VarString.code(), 0][..]));
        assert_eq!(r.read_bytes(2), Some(&[FieldType::Long.code(), 0][..]));
        assert_eq!(r.read_lenenc_string().as_deref(), Some("Tom"));
        assert_eq!(r.read_u32_le(), Some(25));
        assert!(r.is_empty());
    }

    #[test]
    fn test_execute_null_is_typed_and_skipped() {
        let params = [Value::Null, Value::UBigInt(7)];
        let bytes = body(&request(&params));
        assert_eq!(bytes[9], 0b01);
        assert_eq!(&bytes[11..13], &[FieldType::Null.code(), 0]);
        assert_eq!(&bytes[13..15], &[FieldType::LongLong.code(), 0x80]);
        assert_eq!(bytes.len(), 15 + 8);
    }

    #[test]
    fn test_execute_types_omitted_when_unchanged() {
        let params = [Value::Int(1)];
        let mut req = request(&params);
        req.send_types = false;
        assert_eq!(&body(&req)[9..], &[0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_execute_long_data_value_omitted() {
        let params = [Value::Bytes(vec![0; 100]), Value::Int(3)];
        let mut req = request(&params);
        req.long_data = &[true, false];
        let bytes = body(&req);
        // header 9, bitmap 1, flag 1, types 4, then only the INT
        assert_eq!(bytes.len(), 9 + 1 + 1 + 4 + 4);
    }

    #[test]
    fn test_execute_query_attributes() {
        let params = [Value::Int(1)];
        let mut req = request(&params);
        req.query_attributes = true;
        let bytes = body(&req);
        assert_eq!(bytes[4], cursor::PARAMETER_COUNT_AVAILABLE);
        assert_eq!(bytes[9], 1, "parameter count");
        assert_eq!(&bytes[12..15], &[FieldType::Long.code(), 0, 0]);
    }

    #[test]
    fn test_type_signature_changes() {
        assert_eq!(
            type_signature(&[Value::Null]),
            vec![(FieldType::Null.code(), false)]
        );
        assert_ne!(
            type_signature(&[Value::Int(1)]),
            type_signature(&[Value::UInt(1)])
        );
    }

    #[test]
    fn test_long_data_chunks() {
        let packets = long_data_packets(9, 2, &[1, 2, 3, 4, 5], 2);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], vec![0x18, 9, 0, 0, 0, 2, 0, 1, 2]);
        assert_eq!(packets[2], vec![0x18, 9, 0, 0, 0, 2, 0, 5]);
        assert_eq!(long_data_packets(9, 0, &[], 2).len(), 1);
    }
}
