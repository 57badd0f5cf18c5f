//! Scripted server for protocol tests.
//!
//! The server side of a conversation is written up front as framed
//! packets; the client reads them in order and everything it writes is
//! captured for inspection.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use mywire::protocol::PacketWriter;
use mywire::protocol::capabilities::{
    ALWAYS, CLIENT_LONG_FLAG, CLIENT_PLUGIN_AUTH, CLIENT_PS_MULTI_RESULTS,
    CLIENT_SECURE_CONNECTION,
};
use mywire::transport::{frame_payload, unframe_payload};
use mywire::{ByteStream, Error, FieldType, MySqlConfig, MySqlSession};
use std::future::{Future, ready};
use std::io;
use std::sync::{Arc, Mutex};

pub const SEED: [u8; 20] = [
    0x3a, 0x17, 0x5c, 0x61, 0x2b, 0x44, 0x70, 0x0e, 0x19, 0x52, 0x33, 0x6d, 0x08, 0x27, 0x4f,
    0x11, 0x6a, 0x2c, 0x55, 0x3e,
];

pub const AUTOCOMMIT: u16 = 0x0002;
pub const IN_TRANS: u16 = 0x0001;
pub const MORE_RESULTS: u16 = 0x0008;

pub type WriteLog = Arc<Mutex<Vec<u8>>>;

pub fn server_capabilities() -> u32 {
    ALWAYS | CLIENT_LONG_FLAG | CLIENT_SECURE_CONNECTION | CLIENT_PS_MULTI_RESULTS | CLIENT_PLUGIN_AUTH
}

/// In-memory stream replaying scripted server bytes.
#[derive(Debug)]
pub struct ScriptedStream {
    input: Vec<u8>,
    pos: usize,
    written: WriteLog,
    secure: bool,
}

impl ScriptedStream {
    pub fn log(&self) -> WriteLog {
        Arc::clone(&self.written)
    }
}

impl ByteStream for ScriptedStream {
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        let n = buf.len().min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        ready(Ok(n))
    }

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        self.written.lock().unwrap().extend_from_slice(buf);
        ready(Ok(()))
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        ready(Ok(()))
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Builder for the server half of a conversation.
#[derive(Debug, Default)]
pub struct Server {
    bytes: Vec<u8>,
    seq: u8,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard greeting plus OK for `plugin`, with no auth exchange.
    pub fn authenticated() -> Self {
        Self::new().greeting("mysql_native_password").seq(2).ok(0, 0, AUTOCOMMIT)
    }

    /// Following packets answer a new client command.
    pub fn reply(self) -> Self {
        self.seq(1)
    }

    pub fn seq(mut self, seq: u8) -> Self {
        self.seq = seq;
        self
    }

    pub fn packet(mut self, payload: &[u8]) -> Self {
        let (wire, next) = frame_payload(payload, self.seq);
        self.bytes.extend_from_slice(&wire);
        self.seq = next;
        self
    }

    pub fn greeting(self, plugin: &str) -> Self {
        let caps = server_capabilities();
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_string("8.0.36");
        w.write_u32_le(42);
        w.write_bytes(&SEED[..8]);
        w.write_u8(0);
        w.write_u16_le(caps as u16);
        w.write_u8(45);
        w.write_u16_le(AUTOCOMMIT);
        w.write_u16_le((caps >> 16) as u16);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(&SEED[8..]);
        w.write_u8(0);
        w.write_null_string(plugin);
        self.seq(0).packet(&w.into_bytes())
    }

    pub fn ok(self, affected_rows: u64, last_insert_id: u64, status: u16) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        w.write_lenenc_int(affected_rows);
        w.write_lenenc_int(last_insert_id);
        w.write_u16_le(status);
        w.write_u16_le(0);
        self.packet(&w.into_bytes())
    }

    pub fn err(self, code: u16, state: &str, message: &str) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0xFF);
        w.write_u16_le(code);
        w.write_u8(b'#');
        w.write_bytes(state.as_bytes());
        w.write_bytes(message.as_bytes());
        self.packet(&w.into_bytes())
    }

    pub fn eof(self, status: u16) -> Self {
        let mut payload = vec![0xFE, 0, 0];
        payload.extend_from_slice(&status.to_le_bytes());
        self.packet(&payload)
    }

    pub fn column(self, name: &str, column_type: FieldType) -> Self {
        let mut w = PacketWriter::new();
        for part in ["def", "test", "t", "t", name, name] {
            w.write_lenenc_string(part);
        }
        w.write_lenenc_int(0x0c);
        w.write_u16_le(45);
        w.write_u32_le(255);
        w.write_u8(column_type.code());
        w.write_u16_le(0);
        w.write_u8(0);
        w.write_zeros(2);
        self.packet(&w.into_bytes())
    }

    pub fn text_row(self, values: &[Option<&str>]) -> Self {
        let mut w = PacketWriter::new();
        for value in values {
            match value {
                Some(text) => w.write_lenenc_string(text),
                None => w.write_u8(0xFB),
            }
        }
        self.packet(&w.into_bytes())
    }

    /// A result set of text rows with the given single-column values.
    pub fn result_set(mut self, column: &str, rows: &[&str], final_status: u16) -> Self {
        self = self
            .packet(&[1])
            .column(column, FieldType::VarString)
            .eof(AUTOCOMMIT);
        for row in rows {
            self = self.text_row(&[Some(row)]);
        }
        self.eof(final_status)
    }

    pub fn prepare_ok(mut self, statement_id: u32, params: u16, columns: u16) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        w.write_u32_le(statement_id);
        w.write_u16_le(columns);
        w.write_u16_le(params);
        w.write_u8(0);
        w.write_u16_le(0);
        self = self.packet(&w.into_bytes());
        if params > 0 {
            for i in 0..params {
                self = self.column(&format!("?{i}"), FieldType::VarString);
            }
            self = self.eof(AUTOCOMMIT);
        }
        if columns > 0 {
            for i in 0..columns {
                self = self.column(&format!("c{i}"), FieldType::VarString);
            }
            self = self.eof(AUTOCOMMIT);
        }
        self
    }

    pub fn into_stream(self, secure: bool) -> ScriptedStream {
        ScriptedStream {
            input: self.bytes,
            pos: 0,
            written: Arc::default(),
            secure,
        }
    }
}

/// Client packets as `(sequence, payload)`.
pub fn written_packets(log: &WriteLog) -> Vec<(u8, Vec<u8>)> {
    let wire = log.lock().unwrap().clone();
    let mut packets = Vec::new();
    let mut rest = wire.as_slice();
    while let Some((payload, seq, used)) = unframe_payload(rest) {
        packets.push((seq, payload));
        rest = &rest[used..];
    }
    packets
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

pub fn config() -> MySqlConfig {
    MySqlConfig::new().user("app").password("secret")
}

pub async fn open(
    cx: &Cx,
    server: Server,
    config: MySqlConfig,
) -> (MySqlSession<ScriptedStream>, WriteLog) {
    let stream = server.into_stream(false);
    let log = stream.log();
    let session = unwrap_outcome(MySqlSession::from_stream(cx, stream, Arc::new(config)).await);
    (session, log)
}

pub fn run<F: Future>(test: impl FnOnce(Cx) -> F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(test(cx))
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}
