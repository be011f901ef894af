//! webhook-sentry: egress proxy for outbound webhook delivery
//!
//! This crate implements a forwarding HTTP proxy that sits between a trusted
//! internal webhook sender and arbitrary third-party endpoints. It enforces
//! the guarantees the sender cannot: SSRF containment via a CIDR deny-list,
//! TLS hygiene on the upstream hop (verification modes, custom trust anchors,
//! client identities), strict response-size caps, and connection lifetime
//! control.
//!
//! # Security Model
//!
//! The proxy is **fail-closed** towards the network: a target that resolves
//! into the deny-list is refused with `403`, a target that cannot be dialed
//! or verified yields `502`, and an upstream that outstays its welcome is cut
//! off at the socket. The inbound side is trusted and unauthenticated.
//!
//! # Architecture
//!
//! - **Proxy**: request classification, egress policy, dialing, forwarding,
//!   CONNECT tunneling, response limiting
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod proxy;
pub mod telemetry;
