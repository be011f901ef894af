//! Egress dialing: TCP connect over pre-resolved addresses, optional TLS.
//!
//! The dialer never resolves names. It receives the exact addresses the
//! policy classifier vetted and tries them in order, each under the connect
//! timeout. TLS, when requested, handshakes with SNI set to the original
//! hostname and the verification mode the settings dictate, presenting a
//! client identity when one was selected.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use super::error::{DialErrorKind, ProxyError, TlsErrorKind};
use super::tls::{host_to_server_name, TlsSettings};

/// An upstream stream, plain or TLS.
pub enum MaybeTlsStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Establish a TCP connection to the first reachable address.
///
/// Each attempt runs under `connect_timeout`; the error of the last attempt
/// wins when all fail.
pub async fn connect_tcp(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<TcpStream, ProxyError> {
    let mut last_err = None;

    for addr in addrs {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                debug!("connected to {}", addr);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(ProxyError::Dial {
                    addr: addr.to_string(),
                    kind: categorize_io(&e),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                debug!("connect to {} timed out", addr);
                last_err = Some(ProxyError::Dial {
                    addr: addr.to_string(),
                    kind: DialErrorKind::Timeout,
                    message: format!("no connection within {:?}", connect_timeout),
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProxyError::Dial {
        addr: String::new(),
        kind: DialErrorKind::Dns,
        message: "no addresses to dial".to_string(),
    }))
}

/// Dial the target, optionally upgrading to TLS.
///
/// `tls_host` carries the hostname for SNI and verification when the hop is
/// TLS; `None` means a plain connection. `client_cert_id` selects a client
/// identity for the handshake.
pub async fn dial(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
    tls: &TlsSettings,
    tls_host: Option<&str>,
    client_cert_id: Option<&str>,
) -> Result<MaybeTlsStream, ProxyError> {
    let stream = connect_tcp(addrs, connect_timeout).await?;

    let Some(host) = tls_host else {
        return Ok(MaybeTlsStream::Plain(stream));
    };

    let connector = tls.connector(client_cert_id)?;
    let server_name = host_to_server_name(host)?;

    let handshake = connector.connect(server_name, stream);
    let tls_stream = tokio::time::timeout(connect_timeout, handshake)
        .await
        .map_err(|_| ProxyError::Tls {
            host: host.to_string(),
            kind: TlsErrorKind::Handshake,
            message: format!("handshake not complete within {:?}", connect_timeout),
        })?
        .map_err(|e| ProxyError::Tls {
            host: host.to_string(),
            kind: categorize_tls(&e),
            message: e.to_string(),
        })?;

    debug!("TLS established with {}", host);
    Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
}

fn categorize_io(err: &io::Error) -> DialErrorKind {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => DialErrorKind::Refused,
        io::ErrorKind::TimedOut => DialErrorKind::Timeout,
        _ => DialErrorKind::Refused,
    }
}

/// Distinguish verification failures from other handshake problems.
///
/// tokio-rustls reports handshake errors as `io::Error`s wrapping
/// `rustls::Error`; certificate problems arrive as `InvalidCertificate`.
fn categorize_tls(err: &io::Error) -> TlsErrorKind {
    let rustls_err = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match rustls_err {
        Some(rustls::Error::InvalidCertificate(_)) => TlsErrorKind::Verify,
        _ => TlsErrorKind::Handshake,
    }
}
