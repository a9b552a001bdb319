//! Write-only sinks for audit events and session transcripts.
//!
//! Durable storage and rotation belong to an external log manager; the
//! core only needs a factory that yields one write-only sink per name.
//! Names are derived from the session id (see [`crate::session`]).

use std::future::Future;
use std::path::PathBuf;

use tokio::io::AsyncWrite;

use crate::error::{Error, Result};

/// A write-only, closable byte sink.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Factory boundary to the log manager.
///
/// Allocation failure is fatal to the requesting session only; the
/// orchestrator reports it to the peer and keeps serving others.
pub trait SinkFactory: Send + Sync {
    /// Open the structured audit event sink for `name`.
    fn audit_sink(&self, name: &str) -> impl Future<Output = Result<ByteSink>> + Send;

    /// Open the raw transcript sink for `name`.
    fn transcript_sink(&self, name: &str) -> impl Future<Output = Result<ByteSink>> + Send;
}

/// Sink factory writing append-only files into one directory.
#[derive(Debug, Clone)]
pub struct DirSinkFactory {
    dir: PathBuf,
}

impl DirSinkFactory {
    /// Create a factory rooted at `dir`. The directory is created on first
    /// sink allocation if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn open(&self, name: &str) -> Result<ByteSink> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| Error::Session {
            message: format!("failed to create log directory: {}", e),
        })?;
        let path = self.dir.join(name);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Session {
                message: format!("failed to open {}: {}", path.display(), e),
            })?;
        Ok(Box::new(file))
    }
}

impl SinkFactory for DirSinkFactory {
    async fn audit_sink(&self, name: &str) -> Result<ByteSink> {
        self.open(name).await
    }

    async fn transcript_sink(&self, name: &str) -> Result<ByteSink> {
        self.open(name).await
    }
}
