//! Configuration system for webhook-sentry.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/webhook-sentry/config.toml`
//! 3. User config: `~/.config/webhook-sentry/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! The proxy runs on embedded defaults when no file exists: one plain
//! listener on `127.0.0.1:9090` with the deny-list enforced.
//!
//! # Merge Behavior
//!
//! - **Listeners** are **merged** (appended); the default listener applies
//!   only when no source names one
//! - **Scalars** (timeouts, caps, flags) are **overridden**
//!
//! # Example
//!
//! ```toml
//! [[listeners]]
//! address = "0.0.0.0:11090"
//!
//! [[listeners]]
//! address = "0.0.0.0:11091"
//! protocol = "https"
//! cert_file = "/etc/webhook-sentry/cert.pem"
//! key_file = "/etc/webhook-sentry/key.pem"
//!
//! [security]
//! client_cert_file = "/etc/webhook-sentry/client.pem"
//! client_key_file = "/etc/webhook-sentry/client-key.pem"
//!
//! [limits]
//! max_response_body_size = 1048576
//! connection_lifetime_secs = 60
//! read_timeout_secs = 10
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    Config, GeneralConfig, LimitsConfig, ListenerConfig, ListenerProtocol, SecurityConfig,
};
