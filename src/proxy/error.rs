//! Error types for proxy operations.
//!
//! This module defines structured error types for the egress proxy:
//! - Policy errors (deny-list hits, resolution failures)
//! - Dial errors (DNS, refused, timeout)
//! - TLS errors (verification, handshake)
//! - Protocol and I/O errors on either hop

use thiserror::Error;

/// Sub-category for dial failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialErrorKind {
    /// Name resolution failed or returned no usable addresses.
    Dns,
    /// The target actively refused the connection.
    Refused,
    /// The connect attempt (or handshake) exceeded the connect timeout.
    Timeout,
}

impl std::fmt::Display for DialErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialErrorKind::Dns => write!(f, "dns"),
            DialErrorKind::Refused => write!(f, "refused"),
            DialErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Sub-category for TLS failures on the upstream hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    /// Certificate verification failed (name mismatch, unknown issuer, expiry).
    Verify,
    /// Any other handshake failure.
    Handshake,
}

impl std::fmt::Display for TlsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsErrorKind::Verify => write!(f, "verify"),
            TlsErrorKind::Handshake => write!(f, "handshake"),
        }
    }
}

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The egress policy refused the target.
    #[error("egress denied for '{host}': {reason}")]
    PolicyDenied {
        /// Target host that was refused.
        host: String,
        /// Human-readable denial reason.
        reason: String,
    },

    /// Failed to establish a TCP connection to the target.
    #[error("dial failed for '{addr}' ({kind}): {message}")]
    Dial {
        /// The address we tried to connect to.
        addr: String,
        /// Failure category.
        kind: DialErrorKind,
        /// Error message.
        message: String,
    },

    /// TLS handshake with the target failed.
    #[error("TLS {kind} failure for '{host}': {message}")]
    Tls {
        /// Target hostname used for SNI and verification.
        host: String,
        /// Failure category.
        kind: TlsErrorKind,
        /// Error message.
        message: String,
    },

    /// The inbound proxy request is malformed.
    #[error("malformed proxy request: {0}")]
    BadRequest(String),

    /// Runtime configuration could not be built (bad addresses, unreadable
    /// or invalid TLS material).
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream response (or request exchange) violated HTTP framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A fixed-length response declared a body larger than the configured cap.
    #[error("response body of {declared} bytes exceeds cap of {limit} bytes")]
    SizeExceeded {
        /// Declared Content-Length.
        declared: u64,
        /// Configured cap.
        limit: u64,
    },

    /// A connection lifetime or read deadline fired.
    #[error("deadline expired: {0}")]
    DeadlineExpired(String),

    /// The inbound client went away mid-exchange.
    #[error("client disconnected")]
    ClientGone,

    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls {
            host: String::new(),
            kind: TlsErrorKind::Handshake,
            message: err.to_string(),
        }
    }
}

impl From<hyper::http::Error> for ProxyError {
    fn from(err: hyper::http::Error) -> Self {
        ProxyError::Protocol(err.to_string())
    }
}
