//! CONNECT tunneling.
//!
//! The flow is:
//!
//! 1. Client sends `CONNECT host:port HTTP/1.1`
//! 2. The egress policy classifies the target with the same deny-list as
//!    the forward path, or CONNECT would be a trivial bypass
//! 3. If allowed: dial raw TCP, return `200 Connection Established`, and
//!    splice the two sockets until either side closes or a deadline fires
//! 4. If denied: `403 Forbidden`
//!
//! The proxy never terminates TLS here; the client handshakes end-to-end
//! with the target through the tunnel. Because the relayed bytes are opaque,
//! the response-size cap does not apply; only the deadline clocks do.

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, info, warn};

use super::deadline::DeadlineStream;
use super::dial;
use super::error::ProxyError;
use super::forward::{status_response, ProxyBody};
use super::request::TunnelTarget;
use super::server::ProxyConfig;
use crate::telemetry::{AuditEvent, AuditLogger, DenyCause};

/// Handle a CONNECT request: policy check, dial, upgrade, splice.
pub async fn handle_connect(
    req: Request<Incoming>,
    target: TunnelTarget,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
) -> Response<ProxyBody> {
    let TunnelTarget { host, port } = target;

    debug!("CONNECT request to {}:{}", host, port);

    let addrs = match config.policy.classify(&host, port).await {
        Ok(addrs) => addrs,
        Err(ProxyError::PolicyDenied { reason, .. }) => {
            info!("CONNECT to {}:{} denied: {}", host, port, reason);
            audit.log(AuditEvent::EgressDeny {
                host: host.clone(),
                port,
                cause: DenyCause::Policy,
            });
            return status_response(StatusCode::FORBIDDEN);
        }
        Err(e) => {
            warn!("CONNECT resolution failed for {}:{}: {}", host, port, e);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    audit.log(AuditEvent::EgressAllow {
        host: host.clone(),
        port,
    });

    // Dial before answering 200 so an unreachable target fails the CONNECT
    // itself instead of a dead tunnel.
    let upstream = match dial::connect_tcp(&addrs, config.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("CONNECT dial failed for {}:{}: {}", host, port, e);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    let upstream = DeadlineStream::new(upstream, config.connection_lifetime, config.read_timeout);

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                splice(upgraded, upstream).await;
                debug!("tunnel to {}:{} closed", host, port);
            }
            Err(e) => {
                warn!("CONNECT upgrade failed for {}:{}: {}", host, port, e);
            }
        }
    });

    status_response(StatusCode::OK)
}

/// Bidirectional byte relay between the upgraded inbound connection and the
/// upstream socket. Returns when either direction finishes; resets and
/// deadline closures are the normal way tunnels end.
async fn splice<S>(upgraded: Upgraded, upstream: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let client = TokioIo::new(upgraded);

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream =
        async { tokio::io::copy(&mut client_read, &mut upstream_write).await };
    let upstream_to_client =
        async { tokio::io::copy(&mut upstream_read, &mut client_write).await };

    tokio::select! {
        result = client_to_upstream => {
            if let Err(e) = result {
                debug!("client->upstream copy ended: {}", e);
            }
        }
        result = upstream_to_client => {
            if let Err(e) = result {
                debug!("upstream->client copy ended: {}", e);
            }
        }
    }
}
