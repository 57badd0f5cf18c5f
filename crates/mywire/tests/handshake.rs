mod common;

use common::*;
use mywire::auth::{native_password_scramble, sha256_scramble};
use mywire::{Error, MySqlSession};
use mywire_core::error::ConnectionErrorKind;
use std::sync::Arc;

#[test]
fn native_password_handshake() {
    run(|cx| async move {
        let (session, log) = open(&cx, Server::authenticated(), config()).await;
        assert!(session.is_ready());
        assert_eq!(session.connection_id(), 42);
        assert_eq!(session.server_version(), "8.0.36");
        assert_eq!(session.auth_plugin(), "mysql_native_password");

        let packets = written_packets(&log);
        assert_eq!(packets.len(), 1);
        let (seq, response) = &packets[0];
        assert_eq!(*seq, 1);
        assert!(contains(response, b"app\0"));
        assert!(contains(response, &native_password_scramble("secret", &SEED)));
        // Capabilities never exceed what the server offered.
        let caps = u32::from_le_bytes(response[..4].try_into().unwrap());
        assert_eq!(caps & !server_capabilities(), 0);
    });
}

#[test]
fn caching_sha2_fast_path() {
    let server = Server::new()
        .greeting("caching_sha2_password")
        .seq(2)
        .packet(&[0x01, 0x03])
        .ok(0, 0, AUTOCOMMIT);
    run(|cx| async move {
        let (session, log) = open(&cx, server, config()).await;
        assert_eq!(session.auth_plugin(), "caching_sha2_password");
        let packets = written_packets(&log);
        assert_eq!(packets.len(), 1);
        assert!(contains(&packets[0].1, &sha256_scramble("secret", &SEED)));
    });
}

#[test]
fn caching_sha2_full_auth_over_secure_stream() {
    let server = Server::new()
        .greeting("caching_sha2_password")
        .seq(2)
        .packet(&[0x01, 0x04])
        .seq(4)
        .ok(0, 0, AUTOCOMMIT);
    run(|cx| async move {
        let stream = server.into_stream(true);
        let log = stream.log();
        let session = unwrap_outcome(MySqlSession::from_stream(&cx, stream, Arc::new(config())).await);
        assert!(session.is_ready());
        let packets = written_packets(&log);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1], (3, b"secret\0".to_vec()));
    });
}

#[test]
fn full_auth_over_plain_stream_requests_public_key() {
    let server = Server::new()
        .greeting("caching_sha2_password")
        .seq(2)
        .packet(&[0x01, 0x04])
        .seq(4)
        .err(1045, "28000", "Access denied");
    run(|cx| async move {
        let stream = server.into_stream(false);
        let log = stream.log();
        let err = expect_err(MySqlSession::from_stream(&cx, stream, Arc::new(config())).await);
        assert!(matches!(err, Error::Connection(ref c) if c.kind == ConnectionErrorKind::Authentication));
        let packets = written_packets(&log);
        assert_eq!(packets[1], (3, vec![0x02]));
    });
}

#[test]
fn auth_switch_to_native_password() {
    let new_seed: Vec<u8> = (1..=20).collect();
    let mut switch = vec![0xFE];
    switch.extend_from_slice(b"mysql_native_password\0");
    switch.extend_from_slice(&new_seed);
    switch.push(0);
    let server = Server::new()
        .greeting("caching_sha2_password")
        .seq(2)
        .packet(&switch)
        .seq(4)
        .ok(0, 0, AUTOCOMMIT);
    run(|cx| async move {
        let (session, log) = open(&cx, server, config()).await;
        assert_eq!(session.auth_plugin(), "mysql_native_password");
        let packets = written_packets(&log);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1], (3, native_password_scramble("secret", &new_seed)));
    });
}

#[test]
fn rejected_credentials_are_an_authentication_error() {
    let server = Server::new()
        .greeting("mysql_native_password")
        .seq(2)
        .err(1045, "28000", "Access denied for user 'app'");
    run(|cx| async move {
        let stream = server.into_stream(false);
        let err = expect_err(MySqlSession::from_stream(&cx, stream, Arc::new(config())).await);
        let Error::Connection(conn) = err else {
            panic!("expected connection error");
        };
        assert_eq!(conn.kind, ConnectionErrorKind::Authentication);
        assert_eq!(conn.server_code, Some(1045));
    });
}

#[test]
fn empty_password_sends_empty_auth_response() {
    run(|cx| async move {
        let config = mywire::MySqlConfig::new().user("app");
        let (_session, log) = open(&cx, Server::authenticated(), config).await;
        let packets = written_packets(&log);
        // user NUL, then a zero-length auth response
        assert!(contains(&packets[0].1, b"app\0\0"));
    });
}
