//! The forward engine: the non-CONNECT proxy path.
//!
//! Sequence: classify the target address → dial (plain or TLS) → send the
//! rewritten request → relay the response through the body limiter, with
//! both deadline clocks running on the upstream socket.
//!
//! Failure mapping is deterministic and never retried:
//!
//! | Upstream condition                         | Client result            |
//! |--------------------------------------------|--------------------------|
//! | policy denied                              | 403, empty body          |
//! | dial / TLS / DNS failure                   | 502, empty body          |
//! | fixed-length response over the cap         | 502, empty body          |
//! | deadline before response headers           | 502, empty body          |
//! | deadline after response headers            | truncated body, close    |

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, info, warn};

use super::deadline::DeadlineStream;
use super::dial;
use super::error::ProxyError;
use super::limit::{fits_fixed_length, LimitedBody};
use super::request::{strip_hop_by_hop, ForwardTarget};
use super::server::ProxyConfig;
use crate::telemetry::{AuditEvent, AuditLogger, DenyCause};

/// Proxy response body type.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Drive a rewritten request to its target and relay the response.
pub async fn handle_forward(
    target: ForwardTarget<Incoming>,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
) -> Response<ProxyBody> {
    let host = target.host.clone();
    let port = target.port;

    if let Some(id) = target.client_cert_id.as_deref() {
        if config.tls.client_identity(id).is_none() {
            debug!("unknown client cert id '{}' requested for {}", id, host);
            return status_response(StatusCode::BAD_REQUEST);
        }
    }

    let addrs = match config.policy.classify(&host, port).await {
        Ok(addrs) => addrs,
        Err(ProxyError::PolicyDenied { reason, .. }) => {
            info!("egress denied for {}:{}: {}", host, port, reason);
            audit.log(AuditEvent::EgressDeny {
                host: host.clone(),
                port,
                cause: DenyCause::Policy,
            });
            return status_response(StatusCode::FORBIDDEN);
        }
        Err(e) => {
            warn!("resolution failed for {}:{}: {}", host, port, e);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    audit.log(AuditEvent::EgressAllow {
        host: host.clone(),
        port,
    });

    let tls_host = target.use_tls.then_some(host.as_str());
    let stream = match dial::dial(
        &addrs,
        config.connect_timeout,
        &config.tls,
        tls_host,
        target.client_cert_id.as_deref(),
    )
    .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!("dial failed for {}:{}: {}", host, port, e);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    let stream = DeadlineStream::new(stream, config.connection_lifetime, config.read_timeout);

    let (mut sender, conn) = match hyper::client::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await
    {
        Ok(parts) => parts,
        Err(e) => {
            warn!("upstream handshake failed for {}:{}: {}", host, port, e);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    // The driver owns the socket; it ends when the exchange completes, a
    // deadline fires, or either side closes.
    let driver_host = host.clone();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("upstream connection to {} ended: {}", driver_host, e);
        }
    });

    let response = match sender.send_request(target.request).await {
        Ok(response) => response,
        Err(e) => {
            // Everything that goes wrong before response headers lands here:
            // write failures, protocol garbage, and deadline expiry.
            let err = classify_exchange_error(e);
            warn!("upstream exchange failed for {}:{}: {}", host, port, err);
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    match relay_response(response, &host, &config) {
        Ok(response) => response,
        Err(err) => {
            info!("refusing response from {}:{}: {}", host, port, err);
            if let ProxyError::SizeExceeded { declared, limit } = err {
                audit.log(AuditEvent::ResponseSizeRefused {
                    host: host.clone(),
                    declared,
                    limit,
                });
            }
            status_response(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Distinguish a deadline firing from other upstream exchange failures.
///
/// Deadlines surface as `TimedOut` I/O errors inside hyper's error chain.
fn classify_exchange_error(err: hyper::Error) -> ProxyError {
    let mut source = std::error::Error::source(&err);
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                return ProxyError::DeadlineExpired(io_err.to_string());
            }
        }
        source = inner.source();
    }
    ProxyError::Http(err)
}

/// Apply response-side rewriting and size enforcement.
///
/// Fails only when a fixed-length response declares a body over the cap;
/// that decision is made before any body bytes are copied.
fn relay_response(
    response: Response<Incoming>,
    host: &str,
    config: &ProxyConfig,
) -> Result<Response<ProxyBody>, ProxyError> {
    let cap = config.max_response_body_size;
    let (mut parts, body) = response.into_parts();

    let chunked = parts
        .headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    strip_hop_by_hop(&mut parts.headers);

    match declared {
        // Fixed-length framing: the size is known up front.
        Some(length) if !chunked => {
            if !fits_fixed_length(length, cap) {
                debug!("{}-byte response from {} over cap {}", length, host, cap);
                return Err(ProxyError::SizeExceeded {
                    declared: length,
                    limit: cap,
                });
            }
            parts.headers.insert(CONTENT_LENGTH, length.into());
            Ok(Response::from_parts(parts, body.boxed()))
        }
        // Chunked or unknown length: stream under the cap. The client gets
        // a well-formed message that simply ends at the limit.
        _ => {
            parts.headers.remove(CONTENT_LENGTH);
            Ok(Response::from_parts(
                parts,
                LimitedBody::new(body, cap).boxed(),
            ))
        }
    }
}

/// An empty response body.
pub(crate) fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// A response with the given status and an empty body.
///
/// The client never sees error detail beyond the status line.
pub(crate) fn status_response(status: StatusCode) -> Response<ProxyBody> {
    Response::builder().status(status).body(empty_body()).unwrap()
}
