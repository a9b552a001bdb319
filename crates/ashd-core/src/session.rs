//! Session metadata types shared by the orchestrator and the boundaries.

use serde::{Deserialize, Serialize};

use crate::constants::{AUDIT_LOG_SUFFIX, TRANSCRIPT_LOG_SUFFIX};

/// A peer's request for an interactive terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyRequest {
    /// Terminal type reported by the peer, forced into the child's `TERM`.
    pub term: String,
    /// Initial width in columns.
    pub cols: u16,
    /// Initial height in rows.
    pub rows: u16,
}

/// A window-size change signalled by the peer.
///
/// Applied to the PTY and then discarded; no history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// Name of the audit event log for a session.
///
/// Both sink names derive from the same session id so events and
/// transcript can be correlated offline.
pub fn audit_log_name(session_id: &str) -> String {
    format!("{}{}", session_id, AUDIT_LOG_SUFFIX)
}

/// Name of the raw transcript log for a session.
pub fn transcript_log_name(session_id: &str) -> String {
    format!("{}{}", session_id, TRANSCRIPT_LOG_SUFFIX)
}

/// Whether a raw command looks like a file-copy invocation.
///
/// Prefix match only, matching what historical log consumers expect.
pub fn is_file_transfer(raw_command: &str) -> bool {
    raw_command.starts_with("scp")
}
