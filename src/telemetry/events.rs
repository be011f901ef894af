//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `WEBHOOK_SENTRY` tag for SIEM
//! integration. Every egress decision leaves a trace: what was dialed, what
//! was refused, and which resource caps fired.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for security logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A listener came up.
    ListenerStart {
        /// Bound address.
        address: String,
        /// Whether the listener terminates TLS.
        tls: bool,
    },

    /// Egress to a target was allowed.
    EgressAllow {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// Egress to a target was refused.
    EgressDeny {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Why it was refused.
        cause: DenyCause,
    },

    /// A fixed-length response was refused for exceeding the body cap.
    ResponseSizeRefused {
        /// Target host.
        host: String,
        /// Declared Content-Length.
        declared: u64,
        /// Configured cap.
        limit: u64,
    },
}

/// Reasons for refusing egress.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCause {
    /// The target fell to the egress policy (deny-list, localhost literal,
    /// or failed resolution under an enforced deny-list).
    Policy,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
