//! In-memory sink factory with failure injection.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use ashd_core::audit::AuditEvent;
use ashd_core::error::{Error, Result};
use ashd_core::sink::{ByteSink, SinkFactory};

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Sink factory that keeps every named sink's bytes in memory.
///
/// Clones share the same store, so a factory handed to the server can be
/// inspected from the test afterwards. Failure injection makes sink
/// allocation fail, which is how log-manager outages are simulated.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    store: Arc<Mutex<HashMap<String, SharedBuf>>>,
    fail_audit: Arc<Mutex<bool>>,
    fail_transcript: Arc<Mutex<bool>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent audit sink allocations fail.
    pub fn fail_audit_sinks(&self) {
        *self.fail_audit.lock().unwrap() = true;
    }

    /// Make subsequent transcript sink allocations fail.
    pub fn fail_transcript_sinks(&self) {
        *self.fail_transcript.lock().unwrap() = true;
    }

    /// Bytes written to the named sink, if it was ever allocated.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.store
            .lock()
            .unwrap()
            .get(name)
            .map(|buf| buf.lock().unwrap().clone())
    }

    /// Names of every sink allocated so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse the named sink as one audit event per line.
    ///
    /// # Panics
    ///
    /// Panics if the sink is missing or a line is not a valid event.
    pub fn audit_events(&self, name: &str) -> Vec<AuditEvent> {
        let bytes = self
            .contents(name)
            .unwrap_or_else(|| panic!("no sink named {}", name));
        String::from_utf8(bytes)
            .expect("audit sink holds valid UTF-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is one audit event"))
            .collect()
    }

    fn open(&self, name: &str) -> ByteSink {
        let buf = Arc::clone(
            self.store
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default(),
        );
        Box::new(MemorySink { buf })
    }
}

impl SinkFactory for MemorySinkFactory {
    async fn audit_sink(&self, name: &str) -> Result<ByteSink> {
        if *self.fail_audit.lock().unwrap() {
            return Err(Error::Session {
                message: "audit sink unavailable".to_string(),
            });
        }
        Ok(self.open(name))
    }

    async fn transcript_sink(&self, name: &str) -> Result<ByteSink> {
        if *self.fail_transcript.lock().unwrap() {
            return Err(Error::Session {
                message: "transcript sink unavailable".to_string(),
            });
        }
        Ok(self.open(name))
    }
}

struct MemorySink {
    buf: SharedBuf,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
