//! ashd-core: shared library for the audited shell daemon.
//!
//! This crate provides:
//! - Error taxonomy with failure-scope classification
//! - Audit event model and the per-session emitter
//! - Resolved identities and the credential-resolver boundary
//! - Session channel types at the transport boundary
//! - Sink factory boundary for audit and transcript logs
//! - Logging setup and the server-wide shutdown signal

pub mod audit;
pub mod channel;
pub mod constants;
pub mod error;
pub mod identity;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod sink;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
pub use shutdown::ShutdownSignal;
