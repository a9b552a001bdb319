//! Structured audit events for session lifecycle milestones.
//!
//! One JSON object per line, appended to the per-session audit sink at the
//! moment each milestone occurs. The field names and the line framing are
//! a persisted contract - consumers of historical logs parse them.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::constants::UNKNOWN_USER;
use crate::sink::ByteSink;

/// Lifecycle milestone recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Identity resolved for a connection.
    Auth,
    /// Interactive (PTY) session became live.
    SessionStart,
    /// Interactive session ended.
    SessionStop,
    /// One-shot command execution.
    Exec,
    /// File-copy invocation detected.
    Scp,
    /// Window-size change applied to the PTY.
    Resize,
    /// Log tampering detected (emitted by log consumers, reserved here).
    Tamper,
}

/// One audit record as written to the wire.
///
/// Empty fields are omitted on serialization and absent on parse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Raw command at the time of emission.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login: String,
    /// RFC3339 UTC timestamp.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datetime: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

impl AuditEventType {
    /// Wire value for the `event_type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Auth => "auth",
            AuditEventType::SessionStart => "session_start",
            AuditEventType::SessionStop => "session_stop",
            AuditEventType::Exec => "exec",
            AuditEventType::Scp => "scp",
            AuditEventType::Resize => "resize",
            AuditEventType::Tamper => "tamper",
        }
    }
}

/// Per-session audit emitter.
///
/// Owns the session's audit sink and the snapshot inputs (session id,
/// remote address, raw command, username). Each `emit` writes one line
/// synchronously, so events land in milestone order. An emit failure is
/// logged and the event dropped; it never aborts the session.
pub struct AuditLog {
    sink: ByteSink,
    session_id: String,
    remote_addr: String,
    raw_command: String,
    username: String,
}

impl AuditLog {
    /// Create an emitter for one session.
    ///
    /// The username starts as `"unknown"` until identity resolution.
    pub fn new(
        sink: ByteSink,
        session_id: impl Into<String>,
        remote_addr: impl Into<String>,
        raw_command: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            session_id: session_id.into(),
            remote_addr: remote_addr.into(),
            raw_command: raw_command.into(),
            username: UNKNOWN_USER.to_string(),
        }
    }

    /// Record the resolved username for all subsequent events.
    pub fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
    }

    /// Emit one event for a lifecycle milestone.
    pub async fn emit(&mut self, event_type: AuditEventType) {
        let event = AuditEvent {
            event: self.raw_command.clone(),
            event_type: event_type.as_str().to_string(),
            session_id: self.session_id.clone(),
            user: self.username.clone(),
            login: self.username.clone(),
            datetime: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ip_address: self.remote_addr.clone(),
        };

        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize audit event");
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.sink.write_all(line.as_bytes()).await {
            warn!(error = %e, event_type = event_type.as_str(), "Failed to write audit event");
            return;
        }
        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "Failed to flush audit sink");
        }
    }
}
