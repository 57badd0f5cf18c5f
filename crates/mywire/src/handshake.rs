//! Connection phase: greeting, handshake response and authentication.
//!
//! ```text
//! AwaitGreeting -> SendAuthResponse -> AwaitOk | AwaitAuthSwitch | AwaitMoreData -> Ready
//! ```
//!
//! The server may switch plugins once. `caching_sha2_password` may ask for
//! full authentication, which sends the password in clear on a secure
//! stream or RSA-encrypted otherwise.

#![allow(clippy::cast_possible_truncation)]

use crate::auth::{self, AuthPlugin, caching_sha2};
use crate::config::MySqlConfig;
use crate::protocol::capabilities::{
    CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_SECURE_CONNECTION,
};
use crate::protocol::{PacketReader, PacketWriter};
use crate::stream::ByteStream;
use crate::transport::PacketTransport;
use asupersync::Cx;
use mywire_core::Error;
use mywire_core::error::{ConnectionError, ConnectionErrorKind, ProtocolError};

/// Name reported in the `_client_name` connection attribute.
pub const CLIENT_NAME: &str = "mywire";

/// Parsed initial handshake (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Scramble, both parts concatenated, trailing NUL removed
    pub auth_data: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

impl Greeting {
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let mut reader = PacketReader::new(payload);
        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("empty greeting"))?;
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "unsupported protocol version: {protocol_version}"
            )));
        }
        let server_version = reader.read_null_string();
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("greeting missing connection id"))?;
        let part1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("greeting missing scramble"))?;
        reader.skip(1);
        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("greeting missing capability flags"))?;

        let charset = reader.read_u8().unwrap_or(0);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);
        let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
        reader.skip(10);

        let mut auth_data = part1.to_vec();
        if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let len2 = auth_data_len.saturating_sub(8).max(13);
            let part2 = reader
                .read_bytes(len2.min(reader.remaining()))
                .unwrap_or_default();
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }

        let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string()
        } else {
            auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_data,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }
}

/// What the connection phase settled on.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub greeting: Greeting,
    /// Capabilities both sides agreed on
    pub capabilities: u32,
    /// Status flags from the final OK
    pub status_flags: u16,
    /// Plugin that completed authentication
    pub auth_plugin: String,
}

/// Attributes sent with `CLIENT_CONNECT_ATTRS`, fixed ones first.
pub fn connection_attributes(config: &MySqlConfig) -> Vec<(String, String)> {
    let mut attrs = vec![
        ("_client_name".to_string(), CLIENT_NAME.to_string()),
        (
            "_client_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        ("_os".to_string(), std::env::consts::OS.to_string()),
        ("_pid".to_string(), std::process::id().to_string()),
        ("_platform".to_string(), std::env::consts::ARCH.to_string()),
    ];
    attrs.extend(
        config
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    attrs
}

/// Build the HandshakeResponse41 payload.
pub fn build_handshake_response(
    config: &MySqlConfig,
    client_caps: u32,
    auth_response: &[u8],
    auth_plugin: &str,
) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.write_u32_le(client_caps);
    writer.write_u32_le(config.max_packet_size);
    writer.write_u8(config.charset);
    writer.write_zeros(23);
    writer.write_null_string(&config.user);

    if client_caps & CLIENT_SECURE_CONNECTION != 0 {
        writer.write_u8(auth_response.len() as u8);
        writer.write_bytes(auth_response);
    } else {
        writer.write_bytes(auth_response);
        writer.write_u8(0);
    }

    if client_caps & CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(config.database.as_deref().unwrap_or(""));
    }

    if client_caps & CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(auth_plugin);
    }

    if client_caps & CLIENT_CONNECT_ATTRS != 0 {
        let mut attrs = PacketWriter::new();
        for (key, value) in connection_attributes(config) {
            attrs.write_pascal_string(&key);
            attrs.write_pascal_string(&value);
        }
        writer.write_lenenc_bytes(attrs.as_bytes());
    }

    writer.into_bytes()
}

/// Run the connection phase on a freshly opened stream.
pub async fn perform<S: ByteStream>(
    cx: &Cx,
    transport: &mut PacketTransport<S>,
    config: &MySqlConfig,
) -> Result<Negotiated, Error> {
    transport.reset_sequence();
    let payload = transport.read_packet_raw(cx).await?;
    if payload.first() == Some(&0xFF) {
        return Err(rejected(&payload, ConnectionErrorKind::Connect));
    }
    let greeting = Greeting::parse(&payload)?;
    tracing::debug!(
        server_version = %greeting.server_version,
        connection_id = greeting.connection_id,
        plugin = %greeting.auth_plugin,
        "received server greeting"
    );

    let client_caps = config.capability_flags(greeting.capabilities);
    let secure = transport.is_secure();
    let password = config.password_str();

    // Unknown plugins get a native scramble; the server is expected to switch.
    let mut plugin = match AuthPlugin::from_name(&greeting.auth_plugin) {
        AuthPlugin::Other(_) => AuthPlugin::NativePassword,
        known => known,
    };
    let mut seed = greeting.auth_data.clone();
    let response = plugin.initial_response(password, &seed, secure)?;
    let packet = build_handshake_response(config, client_caps, &response, plugin.name());
    transport.write_packet(cx, &packet).await?;

    let mut switched = false;
    loop {
        let payload = transport.read_packet_raw(cx).await?;
        match payload.first().copied() {
            Some(0x00) => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet(client_caps)
                    .ok_or_else(|| protocol_error("malformed OK after authentication"))?;
                tracing::debug!(plugin = plugin.name(), "authenticated");
                return Ok(Negotiated {
                    greeting,
                    capabilities: client_caps,
                    status_flags: ok.status_flags,
                    auth_plugin: plugin.name().to_string(),
                });
            }
            Some(0xFF) => return Err(rejected(&payload, ConnectionErrorKind::Authentication)),
            Some(0xFE) => {
                if switched {
                    return Err(protocol_error("server requested a second auth switch"));
                }
                switched = true;
                let mut reader = PacketReader::new(&payload[1..]);
                if reader.is_empty() {
                    return Err(auth::auth_error(
                        "server requested the pre-4.1 password scheme",
                        None,
                    ));
                }
                let name = reader.read_null_string();
                let data = reader.read_rest();
                seed = data.strip_suffix(&[0]).unwrap_or(data).to_vec();
                plugin = AuthPlugin::from_name(&name);
                tracing::debug!(plugin = plugin.name(), "auth switch");
                let response = plugin.initial_response(password, &seed, secure)?;
                transport.write_packet(cx, &response).await?;
            }
            Some(0x01) => {
                let data = &payload[1..];
                let reply = more_data_reply(&plugin, data, password, &seed, secure)?;
                if let Some(reply) = reply {
                    transport.write_packet(cx, &reply).await?;
                }
            }
            _ => return Err(protocol_error("unexpected packet during authentication")),
        }
    }
}

/// Answer an auth-more-data packet. `None` means "keep reading".
fn more_data_reply(
    plugin: &AuthPlugin,
    data: &[u8],
    password: &str,
    seed: &[u8],
    secure: bool,
) -> Result<Option<Vec<u8>>, Error> {
    match (plugin, data) {
        (AuthPlugin::CachingSha2Password, [caching_sha2::FAST_AUTH_SUCCESS]) => Ok(None),
        (AuthPlugin::CachingSha2Password, [caching_sha2::PERFORM_FULL_AUTH]) => {
            if secure {
                let mut clear = password.as_bytes().to_vec();
                clear.push(0);
                Ok(Some(clear))
            } else {
                tracing::debug!("requesting server public key for full authentication");
                Ok(Some(vec![caching_sha2::REQUEST_PUBLIC_KEY]))
            }
        }
        (AuthPlugin::CachingSha2Password | AuthPlugin::Sha256Password, pem)
            if pem.starts_with(b"-----BEGIN") =>
        {
            auth::rsa_encrypt_password(password, seed, pem).map(Some)
        }
        _ => Err(protocol_error(format!(
            "unexpected auth-more-data for {}",
            plugin.name()
        ))),
    }
}

fn rejected(payload: &[u8], kind: ConnectionErrorKind) -> Error {
    let err = PacketReader::new(payload).parse_err_packet();
    let (code, message) = err.map_or((None, "server rejected the connection".to_string()), |e| {
        (Some(e.error_code), e.error_message)
    });
    Error::Connection(ConnectionError {
        kind,
        message,
        server_code: code,
        source: None,
    })
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}
