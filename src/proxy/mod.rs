//! Egress proxy engine.
//!
//! This module implements the proxy pipeline:
//! - Request classification and rewriting (absolute-form vs CONNECT,
//!   control-header handling)
//! - Egress policy enforcement (CIDR deny-list, resolve-once semantics)
//! - Upstream dialing with TLS upgrade and client-certificate presentation
//! - Response size caps and connection deadlines
//! - Plain and TLS-terminating listeners
//!
//! # Architecture
//!
//! ```text
//!             ┌────────────────────────────────────────────────┐
//!             │                 ProxyServer                     │
//!  inbound ──▶│ listener ─▶ classify ─▶ policy ─▶ dial ─▶ relay │──▶ target
//!             │     (plain/TLS)          │                      │
//!             │                          └── CONNECT ─▶ splice  │
//!             └────────────────────────────────────────────────┘
//! ```
//!
//! Every inbound connection gets its own task; within a connection the
//! pipeline is sequential. `ProxyConfig` is immutable and shared.

pub mod connect;
pub mod deadline;
pub mod dial;
pub mod error;
pub mod forward;
pub mod limit;
pub mod policy;
pub mod request;
pub mod server;
pub mod tls;

// Re-export main types for convenient access
pub use deadline::DeadlineStream;
pub use error::{DialErrorKind, ProxyError, ProxyResult, TlsErrorKind};
pub use limit::LimitedBody;
pub use policy::{DenyReason, EgressPolicy};
pub use request::{Classified, ForwardTarget, TunnelTarget};
pub use server::{ListenerSpec, ProxyConfig, ProxyServer};
pub use tls::{ClientIdentity, TlsSettings, DEFAULT_CLIENT_CERT_ID};
