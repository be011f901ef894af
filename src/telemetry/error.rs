//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur in the telemetry subsystem.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to connect to the syslog daemon.
    #[error("Syslog connection failed: {0}")]
    SyslogConnection(String),
}
