//! Configuration schema definitions.
//!
//! This module defines the structure of the webhook-sentry configuration
//! files. Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into binary)
//! 2. System config: `/etc/webhook-sentry/config.toml`
//! 3. User config: `~/.config/webhook-sentry/config.toml`
//! 4. Additional config file (via `--config` flag)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default listener address.
fn default_listener_address() -> String {
    "127.0.0.1:9090".to_string()
}

/// Default log level.
fn default_log_level() -> String {
    "info".to_string()
}

/// Default connection lifetime (seconds).
const fn default_connection_lifetime() -> u64 {
    60
}

/// Default upstream read timeout (seconds).
const fn default_read_timeout() -> u64 {
    10
}

/// Default connect timeout (seconds).
const fn default_connect_timeout() -> u64 {
    10
}

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listeners to run. Empty until a config source names one; the loader
    /// falls back to the default listener when no source does.
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,

    /// Egress security settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Listener lists are merged (appended); scalars are overridden when
    /// they differ from the defaults.
    pub fn merge(&mut self, other: Config) {
        self.listeners.extend(other.listeners);
        self.security.merge(other.security);
        self.limits.merge(other.limits);
        self.general.merge(other.general);
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), super::ConfigError> {
        if self.listeners.is_empty() {
            return Err(super::ConfigError::InvalidValue {
                field: "listeners".to_string(),
                message: "at least one listener is required".to_string(),
            });
        }

        for listener in &self.listeners {
            if listener.address.parse::<std::net::SocketAddr>().is_err() {
                return Err(super::ConfigError::InvalidValue {
                    field: "listeners.address".to_string(),
                    message: format!("'{}' is not a socket address", listener.address),
                });
            }
            if listener.protocol == ListenerProtocol::Https
                && (listener.cert_file.is_none() || listener.key_file.is_none())
            {
                return Err(super::ConfigError::InvalidValue {
                    field: "listeners".to_string(),
                    message: format!(
                        "https listener {} requires cert_file and key_file",
                        listener.address
                    ),
                });
            }
        }

        let cert = self.security.client_cert_file.is_some();
        let key = self.security.client_key_file.is_some();
        if cert != key {
            return Err(super::ConfigError::InvalidValue {
                field: "security.client_cert_file".to_string(),
                message: "client_cert_file and client_key_file must be set together".to_string(),
            });
        }

        Ok(())
    }
}

/// Transport mode for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerProtocol {
    /// Plain TCP; the inbound side speaks cleartext HTTP.
    #[default]
    Http,
    /// TLS-terminating; requires `cert_file` and `key_file`.
    Https,
}

/// One listener descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:9090`.
    #[serde(default = "default_listener_address")]
    pub address: String,

    /// Transport mode.
    #[serde(default)]
    pub protocol: ListenerProtocol,

    /// Server certificate chain (PEM) for https listeners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// Server private key (PEM) for https listeners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_listener_address(),
            protocol: ListenerProtocol::Http,
            cert_file: None,
            key_file: None,
        }
    }
}

/// Egress security settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Disable the CIDR deny-list. Targets on loopback and private networks
    /// become reachable; only ever set this in test environments.
    #[serde(default)]
    pub insecure_skip_cidr_deny_list: bool,

    /// Disable upstream certificate verification.
    #[serde(default)]
    pub insecure_skip_cert_verification: bool,

    /// PEM file of trust anchors replacing the system pool for upstream TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca_file: Option<PathBuf>,

    /// Client certificate chain (PEM), loaded as identity `"default"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_file: Option<PathBuf>,

    /// Client private key (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_file: Option<PathBuf>,
}

impl SecurityConfig {
    fn merge(&mut self, other: SecurityConfig) {
        if other.insecure_skip_cidr_deny_list {
            self.insecure_skip_cidr_deny_list = true;
        }
        if other.insecure_skip_cert_verification {
            self.insecure_skip_cert_verification = true;
        }
        if other.root_ca_file.is_some() {
            self.root_ca_file = other.root_ca_file;
        }
        if other.client_cert_file.is_some() {
            self.client_cert_file = other.client_cert_file;
        }
        if other.client_key_file.is_some() {
            self.client_key_file = other.client_key_file;
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Byte cap on upstream response bodies. Zero means unlimited.
    #[serde(default)]
    pub max_response_body_size: u64,

    /// Wall-clock cap on any single upstream connection, in seconds.
    /// Zero disables the cap.
    #[serde(default = "default_connection_lifetime")]
    pub connection_lifetime_secs: u64,

    /// Per-read idle cap on upstream sockets, in seconds. Zero disables.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Cap on TCP connect and TLS handshake, in seconds, per attempt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_response_body_size: 0,
            connection_lifetime_secs: default_connection_lifetime(),
            read_timeout_secs: default_read_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl LimitsConfig {
    fn merge(&mut self, other: LimitsConfig) {
        if other.max_response_body_size != 0 {
            self.max_response_body_size = other.max_response_body_size;
        }
        if other.connection_lifetime_secs != default_connection_lifetime() {
            self.connection_lifetime_secs = other.connection_lifetime_secs;
        }
        if other.read_timeout_secs != default_read_timeout() {
            self.read_timeout_secs = other.read_timeout_secs;
        }
        if other.connect_timeout_secs != default_connect_timeout() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level != default_log_level() {
            self.log_level = other.log_level;
        }
    }
}
