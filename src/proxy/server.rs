//! Proxy server: listener management and request dispatch.
//!
//! Each configured listener runs its own accept loop, plain or
//! TLS-terminating. Accepted connections are served with hyper's HTTP/1.1
//! connection driver (with upgrade support for CONNECT) and dispatched into
//! the same pipeline regardless of listener transport: classify → policy →
//! dial → relay.
//!
//! # Shutdown
//!
//! A `watch` channel signals shutdown. Accept loops exit on the signal, so
//! no new connections are taken; in-flight connection tasks run to
//! completion or are cut off by their own deadlines.
//!
//! # Example
//!
//! ```ignore
//! use webhook_sentry::proxy::{ProxyConfig, ProxyServer};
//! use webhook_sentry::telemetry::AuditLogger;
//! use std::sync::Arc;
//!
//! let config = ProxyConfig::from_config(&file_config)?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::new(config, Arc::new(AuditLogger::new_null()), shutdown_rx);
//! server.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::connect::handle_connect;
use super::error::{ProxyError, ProxyResult};
use super::forward::{handle_forward, status_response, ProxyBody};
use super::policy::EgressPolicy;
use super::request::{classify, Classified};
use super::tls::{self, TlsSettings, DEFAULT_CLIENT_CERT_ID};
use crate::config::{Config, ListenerProtocol};
use crate::telemetry::{AuditEvent, AuditLogger};

/// A bound-ready listener description.
pub struct ListenerSpec {
    /// Address to bind.
    pub addr: SocketAddr,
    /// TLS acceptor for TLS-terminating listeners; `None` for plain.
    pub tls: Option<TlsAcceptor>,
}

/// Runtime proxy configuration, immutable after construction and shared by
/// every connection.
///
/// Any reload path must build a fresh `ProxyConfig` and swap the `Arc`; the
/// value is never mutated in place.
pub struct ProxyConfig {
    /// Listeners to run.
    pub listeners: Vec<ListenerSpec>,
    /// Egress policy (deny-list).
    pub policy: EgressPolicy,
    /// Upstream TLS behavior.
    pub tls: TlsSettings,
    /// Response body cap in bytes; zero means unlimited.
    pub max_response_body_size: u64,
    /// Wall-clock cap on any single upstream connection.
    pub connection_lifetime: Option<Duration>,
    /// Per-read idle cap on upstream sockets.
    pub read_timeout: Option<Duration>,
    /// Cap on TCP connect and TLS handshake, per attempt.
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    /// Build the runtime configuration from the file schema, loading all
    /// TLS material up front so per-connection work stays allocation-light.
    pub fn from_config(config: &Config) -> ProxyResult<Self> {
        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            let addr: SocketAddr = listener.address.parse().map_err(|_| {
                ProxyError::Config(format!("invalid listener address '{}'", listener.address))
            })?;
            let acceptor = match listener.protocol {
                ListenerProtocol::Http => None,
                ListenerProtocol::Https => {
                    let cert = listener.cert_file.as_deref().ok_or_else(|| {
                        ProxyError::Config(format!("listener {addr} missing cert_file"))
                    })?;
                    let key = listener.key_file.as_deref().ok_or_else(|| {
                        ProxyError::Config(format!("listener {addr} missing key_file"))
                    })?;
                    Some(tls::server_acceptor(cert, key)?)
                }
            };
            listeners.push(ListenerSpec {
                addr,
                tls: acceptor,
            });
        }

        let root_store = config
            .security
            .root_ca_file
            .as_deref()
            .map(tls::load_root_store)
            .transpose()?
            .map(Arc::new);

        let mut client_certs = std::collections::HashMap::new();
        if let (Some(cert), Some(key)) = (
            config.security.client_cert_file.as_deref(),
            config.security.client_key_file.as_deref(),
        ) {
            let identity = tls::load_client_identity(cert, key)?;
            client_certs.insert(DEFAULT_CLIENT_CERT_ID.to_string(), Arc::new(identity));
        }

        Ok(Self {
            listeners,
            policy: EgressPolicy::new(config.security.insecure_skip_cidr_deny_list),
            tls: TlsSettings {
                insecure_skip_verify: config.security.insecure_skip_cert_verification,
                root_store,
                client_certs,
            },
            max_response_body_size: config.limits.max_response_body_size,
            connection_lifetime: duration_or_none(config.limits.connection_lifetime_secs),
            read_timeout: duration_or_none(config.limits.read_timeout_secs),
            connect_timeout: Duration::from_secs(config.limits.connect_timeout_secs.max(1)),
        })
    }
}

fn duration_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// The proxy server.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Create a new proxy server.
    pub fn new(
        config: ProxyConfig,
        audit: Arc<AuditLogger>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            audit,
            shutdown_rx,
        }
    }

    /// Bind every listener and serve until the shutdown signal.
    ///
    /// Binding happens before any accept loop starts; a bind failure is
    /// fatal and surfaces here. All other per-connection errors are logged
    /// and absorbed.
    pub async fn run(self) -> ProxyResult<()> {
        let mut bound = Vec::with_capacity(self.config.listeners.len());
        for (index, spec) in self.config.listeners.iter().enumerate() {
            let listener = TcpListener::bind(spec.addr).await.map_err(|e| {
                ProxyError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to bind {}: {}", spec.addr, e),
                ))
            })?;
            let local = listener.local_addr()?;
            info!(
                "listening on {} ({})",
                local,
                if spec.tls.is_some() { "https" } else { "http" }
            );
            self.audit.log(AuditEvent::ListenerStart {
                address: local.to_string(),
                tls: spec.tls.is_some(),
            });
            bound.push((index, listener));
        }

        let mut tasks = Vec::with_capacity(bound.len());
        for (index, listener) in bound {
            let config = self.config.clone();
            let audit = self.audit.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            tasks.push(tokio::spawn(accept_loop(
                listener,
                index,
                config,
                audit,
                shutdown_rx,
            )));
        }

        for task in tasks {
            let _ = task.await;
        }

        info!("proxy shut down");
        Ok(())
    }
}

/// Accept connections on one listener until shutdown.
async fn accept_loop(
    listener: TcpListener,
    listener_index: usize,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        spawn_connection(stream, listener_index, config.clone(), audit.clone());
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                // A dropped sender means the server owner is gone; treat it
                // as shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn a task serving one inbound connection.
fn spawn_connection(
    stream: TcpStream,
    listener_index: usize,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
) {
    tokio::spawn(async move {
        let acceptor = config.listeners[listener_index].tls.clone();
        let result = match acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => serve_http(TokioIo::new(tls_stream), config, audit).await,
                Err(e) => {
                    debug!("inbound TLS handshake failed: {}", e);
                    return;
                }
            },
            None => serve_http(TokioIo::new(stream), config, audit).await,
        };

        if let Err(e) = result {
            // Resets and broken pipes are routine; keep them off the warn log.
            match classify_serve_error(e) {
                ProxyError::ClientGone => debug!("connection ended: client disconnected"),
                other => warn!("connection error: {}", other),
            }
        }
    });
}

/// Fold the routine ways an inbound client vanishes into `ClientGone`.
fn classify_serve_error(err: ProxyError) -> ProxyError {
    let text = err.to_string();
    if text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("Connection reset")
    {
        ProxyError::ClientGone
    } else {
        err
    }
}

/// Serve HTTP/1.1 on one (possibly TLS-decrypted) inbound stream.
async fn serve_http<I>(
    io: I,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
) -> Result<(), ProxyError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let config = config.clone();
        let audit = audit.clone();
        async move { dispatch(req, config, audit).await }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Route one request through the pipeline.
async fn dispatch(
    req: Request<Incoming>,
    config: Arc<ProxyConfig>,
    audit: Arc<AuditLogger>,
) -> Result<Response<ProxyBody>, ProxyError> {
    match classify(req) {
        Ok(Classified::Tunnel { target, request }) => {
            Ok(handle_connect(request, target, config, audit).await)
        }
        Ok(Classified::Forward(target)) => Ok(handle_forward(*target, config, audit).await),
        Err(ProxyError::BadRequest(reason)) => {
            debug!("rejecting malformed proxy request: {}", reason);
            Ok(status_response(StatusCode::BAD_REQUEST))
        }
        Err(e) => Err(e),
    }
}
