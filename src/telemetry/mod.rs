//! Telemetry and audit logging for webhook-sentry.
//!
//! This module provides structured logging to syslog with the
//! `WEBHOOK_SENTRY` tag. All security-relevant egress decisions are logged
//! for SIEM integration and audit trails.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): egress decisions go to syslog, never
//!   stdout/stderr
//! - **Debug logging** (tracing): development logs go to stderr via
//!   `tracing`
//! - These are completely separate concerns
//!
//! # Event Format
//!
//! Events are logged as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-07-12T14:32:01Z","event":"egress_deny","host":"localhost","port":12080,"cause":"policy"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, DenyCause};
pub use syslog::{AuditLogger, SYSLOG_TAG};
