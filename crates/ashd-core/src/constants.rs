//! Shared constants for ashd.

use std::time::Duration;

/// Default port for the trusted-socket transport adapter.
pub const DEFAULT_PORT: u16 = 2222;

/// Read buffer size for relay copies.
pub const RELAY_BUF_SIZE: usize = 4096;

/// Depth of the transcript conduit in chunks. Chunks beyond this are
/// dropped rather than stalling delivery to the peer.
pub const TRANSCRIPT_CONDUIT_DEPTH: usize = 256;

/// Suffix appended to a session id to name its audit event log.
pub const AUDIT_LOG_SUFFIX: &str = "-event.log";

/// Suffix appended to a session id to name its transcript log.
pub const TRANSCRIPT_LOG_SUFFIX: &str = "-session.log";

/// Username recorded on audit events before identity resolution.
pub const UNKNOWN_USER: &str = "unknown";

/// Default deadline for the hello line at the transport boundary.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_suffixes_share_no_prefix() {
        // Both sinks for a session are keyed by the same id; the suffixes
        // are what keep the two files apart.
        assert_ne!(AUDIT_LOG_SUFFIX, TRANSCRIPT_LOG_SUFFIX);
        assert!(AUDIT_LOG_SUFFIX.ends_with(".log"));
        assert!(TRANSCRIPT_LOG_SUFFIX.ends_with(".log"));
    }
}
