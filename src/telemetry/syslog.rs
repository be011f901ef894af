//! Syslog integration for audit logging.
//!
//! All audit events are logged to syslog with the `WEBHOOK_SENTRY` tag for
//! SIEM integration. Audit logging and `tracing` diagnostics are separate
//! concerns: events go to syslog, debug logs go to stderr.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "WEBHOOK_SENTRY";

/// Audit logger that writes structured JSON events to syslog.
///
/// Uses interior mutability (Mutex) so events can be logged from the shared
/// reference every connection task holds.
pub struct AuditLogger {
    /// Syslog writer protected by a mutex for interior mutability.
    /// None indicates a null logger (for testing).
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to syslog.
    ///
    /// Uses Unix socket connection to the local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter).map_err(|e| {
            TelemetryError::SyslogConnection(format!("failed to connect to syslog: {e}"))
        })?;

        debug!("connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    ///
    /// Useful for testing when syslog is not available.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event to syslog.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp.
    /// If this is a null logger, the event is silently discarded.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let timestamped = event.with_timestamp();

        match serde_json::to_string(&timestamped) {
            Ok(json) => {
                match writer.lock() {
                    Ok(mut writer) => {
                        if let Err(e) = writer.info(&json) {
                            error!("failed to write to syslog: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("failed to acquire syslog writer lock: {}", e);
                    }
                }
                debug!("logged audit event: {}", json);
            }
            Err(e) => {
                error!("failed to serialize audit event: {}", e);
            }
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}
