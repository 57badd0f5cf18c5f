mod common;

use common::*;
use mywire::binlog::{HEADER_LEN, event_type};
use mywire::{BinlogRequest, EventBody, EventFilter, FieldType, RowsKind, Value};

const COM_REGISTER_SLAVE: u8 = 0x15;
const COM_BINLOG_DUMP: u8 = 0x12;

fn event(event_type: u8, next_position: u32, body: &[u8]) -> Vec<u8> {
    let len = (HEADER_LEN + body.len()) as u32;
    let mut data = vec![0x00];
    data.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    data.push(event_type);
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&next_position.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(body);
    data
}

fn rotate(file: &str, position: u64) -> Vec<u8> {
    let mut body = position.to_le_bytes().to_vec();
    body.extend_from_slice(file.as_bytes());
    event(event_type::ROTATE, 0, &body)
}

fn format_description(checksum: u8) -> Vec<u8> {
    let mut body = 4u16.to_le_bytes().to_vec();
    let mut version = b"8.0.36".to_vec();
    version.resize(50, 0);
    body.extend_from_slice(&version);
    body.extend_from_slice(&[0; 4]);
    body.push(19);
    body.extend_from_slice(&[0; 40]);
    body.push(checksum);
    body.extend_from_slice(&[0; 4]);
    event(event_type::FORMAT_DESCRIPTION, 120, &body)
}

fn table_map(table_id: u8, schema: &str, table: &str) -> Vec<u8> {
    let mut body = vec![table_id, 0, 0, 0, 0, 0, 1, 0];
    body.push(schema.len() as u8);
    body.extend_from_slice(schema.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    body.push(0);
    // id INT, name VARCHAR(40)
    body.extend_from_slice(&[2, FieldType::Long.code(), FieldType::VarChar.code()]);
    body.extend_from_slice(&[2, 40, 0]);
    body.push(0b10);
    event(event_type::TABLE_MAP, 200, &body)
}

fn write_rows(table_id: u8, id: u32, name: &str) -> Vec<u8> {
    let mut body = vec![table_id, 0, 0, 0, 0, 0, 0, 0, 2, 0, 2, 0b11, 0b00];
    body.extend_from_slice(&id.to_le_bytes());
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    event(event_type::WRITE_ROWS_V2, 260, &body)
}

/// Append a CRC32 trailer (its value is not checked) to a framed event.
fn with_checksum(mut data: Vec<u8>) -> Vec<u8> {
    let len = u32::from_le_bytes(data[10..14].try_into().unwrap()) + 4;
    data[10..14].copy_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    data
}

/// Replies to the checksum SET and SELECT, then the replica registration.
fn dump_preamble(checksum: &str) -> Server {
    Server::authenticated()
        .reply()
        .ok(0, 0, AUTOCOMMIT)
        .reply()
        .result_set("@@global.binlog_checksum", &[checksum], AUTOCOMMIT)
        .reply()
        .ok(0, 0, AUTOCOMMIT)
}

fn dump_server_with(checksum: &str, events: &[Vec<u8>]) -> Server {
    let mut server = dump_preamble(checksum).reply();
    for e in events {
        server = server.packet(e);
    }
    server.eof(AUTOCOMMIT)
}

fn dump_server(events: &[Vec<u8>]) -> Server {
    dump_server_with("NONE", events)
}

#[test]
fn stream_decodes_events_until_eof() {
    let server = dump_server(&[
        rotate("binlog.000007", 4),
        format_description(0),
        event(0xEE, 150, &[1, 2, 3]),
        table_map(12, "shop", "pets"),
        write_rows(12, 1, "Tom"),
        event(event_type::XID, 291, &99u64.to_le_bytes()),
    ]);
    run(|cx| async move {
        let (session, log) = open(&cx, server, config()).await;
        let request = BinlogRequest::new("binlog.000007", 4, 1001).non_blocking(true);
        let mut stream = unwrap_outcome(session.into_binlog_stream(&cx, request).await);

        let mut events = Vec::new();
        while let Some(event) = unwrap_outcome(stream.next_event(&cx).await) {
            events.push(event);
        }
        assert!(stream.is_finished());
        assert!(unwrap_outcome(stream.next_event(&cx).await).is_none());

        // The unknown 0xEE event is skipped.
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0].body, EventBody::Rotate { .. }));
        assert!(matches!(events[1].body, EventBody::FormatDescription { .. }));
        let EventBody::Rows(rows) = &events[3].body else {
            panic!("expected rows event");
        };
        assert_eq!(rows.kind, RowsKind::Write);
        assert_eq!(rows.schema.as_deref(), Some("shop"));
        assert_eq!(
            rows.rows[0].after.as_deref(),
            Some(&[Value::Int(1), Value::Text("Tom".into())][..])
        );
        assert_eq!(events[4].body, EventBody::Xid(99));
        assert_eq!(stream.position(), ("binlog.000007", 291));
        assert_eq!(stream.stop(), ("binlog.000007".to_string(), 291));

        let packets = written_packets(&log);
        assert_eq!(&packets[2].1[1..], b"SELECT @@global.binlog_checksum");
        assert_eq!(packets[3].1[0], COM_REGISTER_SLAVE);
        assert_eq!(packets[4].1[0], COM_BINLOG_DUMP);
        assert_eq!(&packets[4].1[1..5], &4u32.to_le_bytes());
        // Non-blocking flag
        assert_eq!(&packets[4].1[5..7], &1u16.to_le_bytes());
        assert_eq!(&packets[4].1[7..11], &1001u32.to_le_bytes());
        assert_eq!(&packets[4].1[11..], b"binlog.000007");
    });
}

#[test]
fn checksummed_rotate_ahead_of_format_description() {
    let server = dump_server_with(
        "CRC32",
        &[
            with_checksum(rotate("binlog.000007", 4)),
            format_description(1),
            with_checksum(table_map(12, "shop", "pets")),
            with_checksum(write_rows(12, 3, "Spike")),
        ],
    );
    run(|cx| async move {
        let (session, _log) = open(&cx, server, config()).await;
        let request = BinlogRequest::new("binlog.000007", 4, 1001).non_blocking(true);
        let mut stream = unwrap_outcome(session.into_binlog_stream(&cx, request).await);
        assert!(stream.decoder().checksum_enabled());

        let mut events = Vec::new();
        while let Some(event) = unwrap_outcome(stream.next_event(&cx).await) {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0].body,
            EventBody::Rotate {
                position: 4,
                file: "binlog.000007".to_string(),
            }
        );
        let EventBody::Rows(rows) = &events[3].body else {
            panic!("expected rows event");
        };
        assert_eq!(
            rows.rows[0].after.as_deref(),
            Some(&[Value::Int(3), Value::Text("Spike".into())][..])
        );
        assert_eq!(stream.stop(), ("binlog.000007".to_string(), 260));
    });
}

#[test]
fn checksum_off_when_server_rejects_variable() {
    let server = Server::authenticated()
        .reply()
        .err(1193, "HY000", "Unknown system variable 'binlog_checksum'")
        .reply()
        .ok(0, 0, AUTOCOMMIT)
        .reply()
        .packet(&rotate("binlog.000002", 4))
        .eof(AUTOCOMMIT);
    run(|cx| async move {
        let (session, log) = open(&cx, server, config()).await;
        let request = BinlogRequest::new("binlog.000002", 4, 9).non_blocking(true);
        let mut stream = unwrap_outcome(session.into_binlog_stream(&cx, request).await);
        assert!(!stream.decoder().checksum_enabled());
        let event = unwrap_outcome(stream.next_event(&cx).await);
        assert!(event.is_some());
        assert_eq!(stream.position(), ("binlog.000002", 4));

        let packets = written_packets(&log);
        assert_eq!(packets[2].1[0], COM_REGISTER_SLAVE);
        assert_eq!(packets[3].1[0], COM_BINLOG_DUMP);
    });
}

#[test]
fn stream_applies_table_filter() {
    let server = dump_server(&[
        table_map(12, "shop", "pets"),
        table_map(13, "shop", "audit"),
        write_rows(13, 5, "x"),
        write_rows(12, 2, "Jerry"),
    ]);
    run(|cx| async move {
        let (session, _log) = open(&cx, server, config()).await;
        let filter = EventFilter {
            schemas: vec![],
            tables: vec!["pets".into()],
        };
        let request = BinlogRequest::new("binlog.000001", 4, 7)
            .non_blocking(true)
            .filter(filter);
        let mut stream = unwrap_outcome(session.into_binlog_stream(&cx, request).await);
        let mut tables = Vec::new();
        while let Some(event) = unwrap_outcome(stream.next_event(&cx).await) {
            if let Some((_, table)) = event.table_ref() {
                tables.push(table.unwrap_or_default().to_string());
            }
        }
        assert_eq!(tables, vec!["pets", "pets"]);
        // The filtered map is still known to the decoder.
        assert!(stream.decoder().table(13).is_some());
    });
}

#[test]
fn server_error_ends_stream() {
    let server = dump_preamble("NONE")
        .reply()
        .err(1236, "HY000", "Could not find first log file name in binary log index file");
    run(|cx| async move {
        let (session, _log) = open(&cx, server, config()).await;
        let request = BinlogRequest::new("missing.000001", 4, 7);
        let mut stream = unwrap_outcome(session.into_binlog_stream(&cx, request).await);
        let err = expect_err(stream.next_event(&cx).await);
        assert_eq!(err.server_code(), Some(1236));
        assert!(stream.is_finished());
    });
}
