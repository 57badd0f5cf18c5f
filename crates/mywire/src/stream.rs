//! Byte streams the packet transport runs over.
//!
//! The transport only needs "read some bytes", "write all bytes" and
//! "flush". [`IoStream`] adapts any asupersync `AsyncRead + AsyncWrite`
//! (a TCP socket, or a stream already wrapped in TLS by the caller);
//! tests implement [`ByteStream`] directly with scripted server bytes.

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use mywire_core::Error;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::time::Duration;

/// A bidirectional byte stream.
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Whether the stream is already encrypted or otherwise private, which
    /// allows cleartext password exchange.
    fn is_secure(&self) -> bool {
        false
    }
}

/// [`ByteStream`] over an asupersync I/O object.
#[derive(Debug)]
pub struct IoStream<S> {
    inner: S,
    secure: bool,
}

/// The default session stream.
pub type Tcp = IoStream<TcpStream>;

impl<S> IoStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            secure: false,
        }
    }

    /// Wrap a stream the caller has already secured (TLS, Unix socket).
    pub fn secure(inner: S) -> Self {
        Self {
            inner,
            secure: true,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> ByteStream for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read_buf = ReadBuf::new(buf);
        std::future::poll_fn(|cx| Pin::new(&mut self.inner).poll_read(cx, &mut read_buf)).await?;
        Ok(read_buf.filled().len())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let written =
                std::future::poll_fn(|cx| Pin::new(&mut self.inner).poll_write(cx, &buf[pos..]))
                    .await?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write data",
                ));
            }
            pos += written;
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| Pin::new(&mut self.inner).poll_flush(cx)).await
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Resolve `host:port`. Literal addresses skip the resolver.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| connection_error(ConnectionErrorKind::DnsResolution, format!("failed to resolve {host}: {e}"), Some(e)))?
        .next()
        .ok_or_else(|| {
            connection_error(
                ConnectionErrorKind::DnsResolution,
                format!("{host} resolved to no addresses"),
                None,
            )
        })
}

/// Open a TCP connection with a deadline.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<Tcp, Error> {
    let addr = resolve(host, port)?;
    let stream = TcpStream::connect_timeout(addr, timeout).await.map_err(|e| {
        let kind = match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
            io::ErrorKind::TimedOut => return Error::Timeout,
            _ => ConnectionErrorKind::Connect,
        };
        connection_error(kind, format!("failed to connect to {addr}: {e}"), Some(e))
    })?;
    stream.set_nodelay(true).ok();
    Ok(IoStream::new(stream))
}

pub(crate) fn connection_error(
    kind: ConnectionErrorKind,
    message: String,
    source: Option<io::Error>,
) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message,
        server_code: None,
        source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal() {
        let addr = resolve("127.0.0.1", 3306).unwrap();
        assert_eq!(addr.port(), 3306);
        assert!(addr.ip().is_loopback());
        let v6 = resolve("::1", 3307).unwrap();
        assert!(v6.is_ipv6());
    }
}
