//! Error types for ashd.
//!
//! Errors carry their failure scope: some are fatal to a single session,
//! some deliberately take the whole server down (see `is_fail_fast`).

use thiserror::Error;

/// Main error type for ashd operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server's own operating identity lacks required privilege.
    #[error("privilege error: {message}")]
    Privilege { message: String },

    /// Missing or malformed resolved identity. The message is sent to the
    /// peer verbatim (e.g. "Invalid user"), so keep it actionable and free
    /// of internal detail.
    #[error("{message}")]
    Identity { message: String },

    /// Per-session setup failure (sink allocation, session bookkeeping).
    #[error("session error: {message}")]
    Session { message: String },

    /// PTY allocation or control failure.
    #[error("pty error: {message}")]
    Pty { message: String },

    /// Pipe setup failure for a non-PTY session.
    #[error("pipe error: {message}")]
    Pipe { message: String },

    /// Failure to start the supervised process.
    #[error("spawn error: {message}")]
    Spawn { message: String },

    /// Audit record could not be produced.
    #[error("audit error: {message}")]
    Audit { message: String },

    /// Transport boundary error.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl Error {
    /// Returns true if this failure escalates to a server-wide shutdown.
    ///
    /// PTY, pipe, and spawn failures indicate a host-level resource or
    /// kernel-interface problem unlikely to be session-specific, so one
    /// such failure closes the whole server rather than the one session.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Error::Pty { .. } | Error::Pipe { .. } | Error::Spawn { .. }
        )
    }

    /// Returns true if this failure terminates only the one session.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, Error::Identity { .. } | Error::Session { .. })
    }
}

/// Convenience result type for ashd operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_error_displays_peer_message_verbatim() {
        let err = Error::Identity {
            message: "Invalid user".into(),
        };
        assert_eq!(err.to_string(), "Invalid user");
    }

    #[test]
    fn fail_fast_errors() {
        assert!(Error::Pty {
            message: "openpty failed".into()
        }
        .is_fail_fast());
        assert!(Error::Pipe {
            message: "pipe failed".into()
        }
        .is_fail_fast());
        assert!(Error::Spawn {
            message: "exec failed".into()
        }
        .is_fail_fast());

        assert!(!Error::Identity {
            message: "Invalid user".into()
        }
        .is_fail_fast());
        assert!(!Error::Session {
            message: "no sink".into()
        }
        .is_fail_fast());
    }

    #[test]
    fn connection_scoped_errors() {
        assert!(Error::Identity {
            message: "Invalid user".into()
        }
        .is_connection_scoped());
        assert!(Error::Session {
            message: "no sink".into()
        }
        .is_connection_scoped());

        assert!(!Error::Pty {
            message: "openpty failed".into()
        }
        .is_connection_scoped());
        assert!(!Error::Privilege {
            message: "not root".into()
        }
        .is_connection_scoped());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
