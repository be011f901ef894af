//! TLS material and configuration builders.
//!
//! This module covers both TLS roles the proxy plays:
//! - **Connector** (proxy as client): upstream handshakes with SNI, applying
//!   one of three verification modes (system roots, operator-supplied roots,
//!   or no verification) and optionally presenting a client identity.
//! - **Acceptor** (proxy as server): TLS-terminating listeners using a
//!   configured certificate and key.
//!
//! All PEM decoding happens here, at startup. Per-connection work is limited
//! to cloning `Arc`s.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use super::error::{ProxyError, TlsErrorKind};

/// The identity name selectable via `X-WHSentry-ClientCert`.
pub const DEFAULT_CLIENT_CERT_ID: &str = "default";

/// A client certificate chain with its private key.
pub struct ClientIdentity {
    /// Certificate chain, leaf first.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key for the leaf.
    pub key: PrivateKeyDer<'static>,
}

/// Upstream TLS behavior shared by all connections.
pub struct TlsSettings {
    /// Disable upstream certificate verification entirely.
    pub insecure_skip_verify: bool,
    /// Trust anchors. `None` means the system pool.
    pub root_store: Option<Arc<RootCertStore>>,
    /// Client identities selectable by id. Only `"default"` is populated
    /// from configuration today, but lookup is by name.
    pub client_certs: HashMap<String, Arc<ClientIdentity>>,
}

impl TlsSettings {
    /// Settings that verify against the system pool and hold no identities.
    pub fn verify_with_system_roots() -> Self {
        Self {
            insecure_skip_verify: false,
            root_store: None,
            client_certs: HashMap::new(),
        }
    }

    /// Look up a client identity by id.
    pub fn client_identity(&self, id: &str) -> Option<Arc<ClientIdentity>> {
        self.client_certs.get(id).cloned()
    }

    /// Build a connector for one upstream handshake.
    ///
    /// `client_cert_id` is the identity requested via the control header,
    /// already validated by the request classifier.
    pub fn connector(&self, client_cert_id: Option<&str>) -> Result<TlsConnector, ProxyError> {
        let roots = if self.insecure_skip_verify {
            // The verifier below ignores roots; an empty store keeps the
            // builder happy without touching the system pool.
            Arc::new(RootCertStore::empty())
        } else {
            match &self.root_store {
                Some(store) => store.clone(),
                None => system_root_store()?,
            }
        };

        let builder = ClientConfig::builder().with_root_certificates(roots);

        let mut config = match client_cert_id.and_then(|id| self.client_identity(id)) {
            Some(identity) => builder
                .with_client_auth_cert(identity.cert_chain.clone(), identity.key.clone_key())
                .map_err(|e| tls_error("", TlsErrorKind::Handshake, &e.to_string()))?,
            None => builder.with_no_client_auth(),
        };

        if self.insecure_skip_verify {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertificateVerification));
        }

        // The forward engine speaks HTTP/1.1; never negotiate h2.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

/// Load the system root certificates into a store.
fn system_root_store() -> Result<Arc<RootCertStore>, ProxyError> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    for err in native_certs.errors {
        debug!("warning loading native cert: {}", err);
    }
    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("warning adding cert to store: {}", e);
        }
    }

    if root_store.is_empty() {
        return Err(tls_error(
            "",
            TlsErrorKind::Handshake,
            "no system root certificates found",
        ));
    }

    Ok(Arc::new(root_store))
}

/// Load trust anchors from a PEM file, replacing the system pool.
pub fn load_root_store(path: &Path) -> Result<RootCertStore, ProxyError> {
    let certs = read_cert_chain(path)?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| tls_error("", TlsErrorKind::Handshake, &e.to_string()))?;
    }
    if store.is_empty() {
        return Err(ProxyError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(store)
}

/// Load a client identity from PEM certificate and key files.
pub fn load_client_identity(
    cert_path: &Path,
    key_path: &Path,
) -> Result<ClientIdentity, ProxyError> {
    let cert_chain = read_cert_chain(cert_path)?;
    if cert_chain.is_empty() {
        return Err(ProxyError::Config(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }
    let key = read_private_key(key_path)?;
    Ok(ClientIdentity { cert_chain, key })
}

/// Build a TLS acceptor for a TLS-terminating listener.
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ProxyError> {
    let cert_chain = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| tls_error("", TlsErrorKind::Handshake, &e.to_string()))?;

    // Inbound is HTTP/1.1 only; the request pipeline has no h2 support.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Convert a hostname to a `ServerName` for SNI.
pub fn host_to_server_name(host: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(host.to_string())
        .map_err(|_| tls_error(host, TlsErrorKind::Handshake, "invalid server name"))
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let file = File::open(path).map_err(|e| {
        ProxyError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open {}: {}", path.display(), e),
        ))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let file = File::open(path).map_err(|e| {
        ProxyError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open {}: {}", path.display(), e),
        ))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            ProxyError::Config(format!("no private key found in {}", path.display()))
        })
}

fn tls_error(host: &str, kind: TlsErrorKind, message: &str) -> ProxyError {
    ProxyError::Tls {
        host: host.to_string(),
        kind,
        message: message.to_string(),
    }
}

/// Verifier that accepts every certificate.
///
/// Only installed when `insecure_skip_cert_verification` is set.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
