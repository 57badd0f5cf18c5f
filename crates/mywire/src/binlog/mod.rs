//! Binlog replication.
//!
//! A session is turned into a [`BinlogStream`] by registering as a replica
//! and sending a binlog dump request. From then on the server pushes one
//! event per packet; [`BinlogDecoder`] parses them, keeps the table-map
//! cache and tracks the `(file, position)` cursor. The decoder can also be
//! used on its own over binlog bytes read from elsewhere.

mod event;
mod rows;

pub use event::{
    BinlogEvent, CHECKSUM_LEN, ChecksumAlgorithm, EventBody, EventHeader, HEADER_LEN, TableMap,
    event_type,
};
pub use rows::{RowChange, RowsEvent, RowsKind, decode_decimal, decode_value, rows_kind};

use crate::connection::{MySqlSession, SessionState, finish, protocol_error};
use crate::protocol::command::ReplicaRegistration;
use crate::protocol::{ClientCommand, PacketReader, is_eof_packet};
use crate::results::ResultHeader;
use crate::stream::{ByteStream, Tcp};
use crate::transport::server_error;
use asupersync::{Cx, Outcome};
use mywire_core::{Error, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Flags of the binlog dump command.
pub mod dump_flags {
    /// End the stream with an EOF packet instead of waiting for new events
    pub const NON_BLOCK: u16 = 0x01;
}

/// Schema and table allow-lists applied to row and table-map events.
///
/// An empty list allows everything. Other event kinds always pass. Rows
/// events whose table could not be resolved only pass an empty filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub schemas: Vec<String>,
    pub tables: Vec<String>,
}

impl EventFilter {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.tables.is_empty()
    }

    pub fn allows(&self, event: &BinlogEvent) -> bool {
        let Some((schema, table)) = event.table_ref() else {
            return true;
        };
        let listed = |list: &[String], name: Option<&str>| {
            list.is_empty() || name.is_some_and(|n| list.iter().any(|allowed| allowed == n))
        };
        listed(&self.schemas, schema) && listed(&self.tables, table)
    }
}

/// Stateful event decoder.
#[derive(Debug, Default)]
pub struct BinlogDecoder {
    tables: HashMap<u64, Arc<TableMap>>,
    checksum: bool,
    file: String,
    position: u64,
    filter: EventFilter,
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: EventFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Seed the cursor, e.g. with the coordinates a dump started from.
    pub fn starting_at(mut self, file: impl Into<String>, position: u64) -> Self {
        self.file = file.into();
        self.position = position;
        self
    }

    /// Current `(file, position)` cursor.
    pub fn position(&self) -> (&str, u64) {
        (&self.file, self.position)
    }

    pub fn table(&self, table_id: u64) -> Option<&Arc<TableMap>> {
        self.tables.get(&table_id)
    }

    pub fn checksum_enabled(&self) -> bool {
        self.checksum
    }

    /// Set checksum stripping ahead of the format description event, or
    /// for input that lacks one.
    pub fn set_checksum(&mut self, enabled: bool) {
        self.checksum = enabled;
    }

    /// Decode one event (header included, without the packet's 0x00
    /// marker).
    ///
    /// Returns `None` for events that are skipped: unknown types, bodies
    /// shorter than their layout, and events rejected by the filter.
    pub fn decode(&mut self, data: &[u8]) -> Option<BinlogEvent> {
        let Some(header) = EventHeader::parse(data) else {
            tracing::debug!(len = data.len(), "skipping event shorter than its header");
            return None;
        };
        let declared = header.event_length as usize;
        if declared < HEADER_LEN || declared > data.len() {
            tracing::debug!(declared, available = data.len(), "skipping truncated event");
            return None;
        }
        let event = &data[..declared];

        if header.next_position != 0 && header.event_type != event_type::HEARTBEAT {
            self.position = u64::from(header.next_position);
        }

        let body = if header.event_type == event_type::FORMAT_DESCRIPTION {
            &event[HEADER_LEN..]
        } else {
            let end = if self.checksum { declared.checked_sub(CHECKSUM_LEN)? } else { declared };
            event.get(HEADER_LEN..end)?
        };

        let Some(body) = self.decode_body(&header, body) else {
            tracing::trace!(event_type = header.event_type, "skipping event");
            return None;
        };
        let event = BinlogEvent { header, body };
        if !self.filter.allows(&event) {
            return None;
        }
        Some(event)
    }

    fn decode_body(&mut self, header: &EventHeader, body: &[u8]) -> Option<EventBody> {
        match header.event_type {
            event_type::ROTATE => {
                let rotate = event::parse_rotate(body)?;
                if let EventBody::Rotate { position, file } = &rotate {
                    tracing::debug!(file = %file, position, "binlog rotate");
                    self.file.clone_from(file);
                    self.position = *position;
                }
                Some(rotate)
            }
            event_type::QUERY => event::parse_query(body),
            event_type::FORMAT_DESCRIPTION => {
                let description = event::parse_format_description(body)?;
                if let EventBody::FormatDescription { checksum, .. } = &description {
                    self.checksum = *checksum == ChecksumAlgorithm::Crc32;
                }
                Some(description)
            }
            event_type::TABLE_MAP => {
                let map = Arc::new(event::parse_table_map(body)?);
                self.tables.insert(map.table_id, Arc::clone(&map));
                Some(EventBody::TableMap(map))
            }
            event_type::XID => PacketReader::new(body).read_u64_le().map(EventBody::Xid),
            event_type::HEARTBEAT => Some(EventBody::Heartbeat),
            code if rows_kind(code).is_some() => {
                rows::parse_rows(code, body, &self.tables).map(EventBody::Rows)
            }
            _ => None,
        }
    }

    /// Decode every event in `buf`, advancing by each header's declared
    /// length. Stops at a trailing partial event.
    pub fn decode_all(&mut self, buf: &[u8]) -> Vec<BinlogEvent> {
        let mut events = Vec::new();
        let mut offset = 0;
        while let Some(header) = EventHeader::parse(&buf[offset..]) {
            let len = header.event_length as usize;
            if len < HEADER_LEN || offset + len > buf.len() {
                break;
            }
            if let Some(event) = self.decode(&buf[offset..offset + len]) {
                events.push(event);
            }
            offset += len;
        }
        events
    }
}

/// Where and how to start a binlog dump.
#[derive(Debug, Clone)]
pub struct BinlogRequest {
    pub file: String,
    pub position: u32,
    /// Replica server id; must be unique among the source's replicas
    pub server_id: u32,
    pub non_blocking: bool,
    pub registration: ReplicaRegistration,
    pub filter: EventFilter,
}

impl BinlogRequest {
    pub fn new(file: impl Into<String>, position: u32, server_id: u32) -> Self {
        Self {
            file: file.into(),
            position,
            server_id,
            non_blocking: false,
            registration: ReplicaRegistration {
                server_id,
                ..ReplicaRegistration::default()
            },
            filter: EventFilter::default(),
        }
    }

    pub fn non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    fn flags(&self) -> u16 {
        if self.non_blocking { dump_flags::NON_BLOCK } else { 0 }
    }
}

impl<S: ByteStream> MySqlSession<S> {
    /// Register as a replica, request a binlog dump and hand the session to
    /// a [`BinlogStream`].
    #[tracing::instrument(level = "debug", skip(self, cx, request), fields(file = %request.file, position = request.position))]
    pub async fn into_binlog_stream(
        mut self,
        cx: &Cx,
        request: BinlogRequest,
    ) -> Outcome<BinlogStream<S>, Error> {
        let checksum = match self.open_binlog(cx, &request).await {
            Ok(checksum) => checksum,
            Err(e) => return finish(cx, Err(e)),
        };
        // The rotate event sent ahead of the format description already
        // carries a checksum, so detection cannot wait for that event.
        let mut decoder = BinlogDecoder::with_filter(request.filter)
            .starting_at(request.file, u64::from(request.position));
        decoder.set_checksum(checksum);
        Outcome::Ok(BinlogStream {
            session: self,
            decoder,
            finished: false,
        })
    }

    /// Prepare the dump and send it. Returns whether events will carry a
    /// CRC32 trailer.
    async fn open_binlog(&mut self, cx: &Cx, request: &BinlogRequest) -> Result<bool, Error> {
        // Ask for checksummed events; servers without checksums reject the
        // variable, which is harmless.
        let announced = self
            .execute_inner(cx, "SET @master_binlog_checksum = @@global.binlog_checksum")
            .await;
        let checksum = match self.leave(announced) {
            Ok(_) => {
                let algorithm = self.binlog_checksum_inner(cx).await;
                self.leave(algorithm)?
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "server does not support binlog checksums");
                false
            }
        };

        let registered = self.register_inner(cx, &request.registration).await;
        self.leave(registered)?;

        let dump = ClientCommand::BinlogDump {
            position: request.position,
            flags: request.flags(),
            server_id: request.server_id,
            file: &request.file,
        };
        let sent = self.start(cx, &dump).await;
        self.leave(sent)?;
        Ok(checksum)
    }

    async fn binlog_checksum_inner(&mut self, cx: &Cx) -> Result<bool, Error> {
        const SQL: &str = "SELECT @@global.binlog_checksum";
        let ResultHeader::Rows(columns) = self.query_header(cx, SQL).await? else {
            return Ok(false);
        };
        let mut crc32 = false;
        while let Some(payload) = self.read_row_packet(cx, Some(SQL)).await? {
            let values = crate::codec::decode_text_row(&columns, &payload)?;
            crc32 = match values.first() {
                Some(Value::Text(name)) => name.eq_ignore_ascii_case("CRC32"),
                Some(Value::Bytes(name)) => name.eq_ignore_ascii_case(b"CRC32"),
                _ => false,
            };
        }
        tracing::debug!(crc32, "binlog checksum");
        Ok(crc32)
    }

    async fn register_inner(&mut self, cx: &Cx, registration: &ReplicaRegistration) -> Result<(), Error> {
        self.start(cx, &ClientCommand::RegisterSlave(registration))
            .await?;
        self.read_ok(cx, None).await.map(drop)
    }
}

/// Pull-based event stream. Owns the session; dropping or stopping the
/// stream closes the connection.
#[derive(Debug)]
pub struct BinlogStream<S: ByteStream = Tcp> {
    session: MySqlSession<S>,
    decoder: BinlogDecoder,
    finished: bool,
}

impl<S: ByteStream> BinlogStream<S> {
    /// Next event, or `None` once the server ends the stream.
    ///
    /// No command timeout applies; the server may hold the stream open
    /// indefinitely while waiting for new events.
    pub async fn next_event(&mut self, cx: &Cx) -> Outcome<Option<BinlogEvent>, Error> {
        if self.finished {
            return Outcome::Ok(None);
        }
        let result = self.next_inner(cx).await;
        finish(cx, result)
    }

    async fn next_inner(&mut self, cx: &Cx) -> Result<Option<BinlogEvent>, Error> {
        loop {
            self.session.guard(cx)?;
            self.session.transport.set_deadline(None);
            let read = self.session.transport.read_packet_raw(cx).await;
            let payload = self.session.leave(read)?;
            match payload.first() {
                Some(0x00) => {
                    if let Some(event) = self.decoder.decode(&payload[1..]) {
                        return Ok(Some(event));
                    }
                }
                Some(0xFF) => {
                    self.finished = true;
                    return Err(server_error(&payload, None));
                }
                _ if is_eof_packet(&payload) => {
                    tracing::debug!("binlog stream ended");
                    self.finished = true;
                    return Ok(None);
                }
                _ => {
                    self.session.state = SessionState::Broken;
                    return Err(protocol_error("unexpected packet in binlog stream", Some(&payload)));
                }
            }
        }
    }

    /// Current `(file, position)` cursor.
    pub fn position(&self) -> (&str, u64) {
        self.decoder.position()
    }

    pub fn decoder(&self) -> &BinlogDecoder {
        &self.decoder
    }

    pub fn session(&self) -> &MySqlSession<S> {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Close the connection and return the cursor to resume from.
    pub fn stop(self) -> (String, u64) {
        let (file, position) = self.decoder.position();
        (file.to_string(), position)
    }
}
