//! The transport boundary: authenticated session channels.
//!
//! The wire protocol (key exchange, encryption, channel framing) lives
//! outside the core. What arrives here is an already-authenticated,
//! already-multiplexed byte stream plus the session metadata the peer
//! negotiated, with the resolved identity attached up front - no runtime
//! context lookups.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::identity::ResolvedUser;
use crate::session::{PtyRequest, WindowSize};

/// Byte stream of a session channel.
pub trait ChannelStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelStream for T {}

/// One authenticated session as delivered by the transport boundary.
pub struct SessionChannel {
    stream: Option<Box<dyn ChannelStream>>,
    window_changes: Option<mpsc::Receiver<WindowSize>>,
    exit_tx: Option<oneshot::Sender<u32>>,
    /// Peer address as reported by the transport.
    pub remote_addr: SocketAddr,
    /// Raw command string; empty means interactive login shell.
    pub raw_command: String,
    /// Peer-supplied environment variables.
    pub env: Vec<(String, String)>,
    /// PTY request, present when the peer asked for interactive mode.
    pub pty: Option<PtyRequest>,
    /// Identity attached by the credential resolver before dispatch.
    pub identity: Option<ResolvedUser>,
}

impl SessionChannel {
    /// Wrap a transport stream into a session channel with no command, no
    /// PTY, no identity, and a closed window-change stream.
    pub fn new(stream: Box<dyn ChannelStream>, remote_addr: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            window_changes: None,
            exit_tx: None,
            remote_addr,
            raw_command: String::new(),
            env: Vec::new(),
            pty: None,
            identity: None,
        }
    }

    /// Set the raw command string.
    pub fn with_command(mut self, raw_command: impl Into<String>) -> Self {
        self.raw_command = raw_command.into();
        self
    }

    /// Set the peer-supplied environment.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Set the PTY request.
    pub fn with_pty(mut self, pty: Option<PtyRequest>) -> Self {
        self.pty = pty;
        self
    }

    /// Attach the resolved identity.
    pub fn with_identity(mut self, identity: Option<ResolvedUser>) -> Self {
        self.identity = identity;
        self
    }

    /// Attach the stream of window-size changes.
    pub fn with_window_changes(mut self, rx: mpsc::Receiver<WindowSize>) -> Self {
        self.window_changes = Some(rx);
        self
    }

    /// Attach a hook that reports the exit status back to the transport.
    pub fn with_exit_hook(mut self, tx: oneshot::Sender<u32>) -> Self {
        self.exit_tx = Some(tx);
        self
    }

    /// Take the window-change stream. Transports without window-change
    /// signalling leave it unset; the returned receiver then yields nothing.
    pub fn take_window_changes(&mut self) -> mpsc::Receiver<WindowSize> {
        self.window_changes.take().unwrap_or_else(|| {
            let (_, rx) = mpsc::channel(1);
            rx
        })
    }

    /// Take the byte stream for splitting into relay halves.
    ///
    /// # Panics
    ///
    /// Panics if the stream was already taken.
    pub fn take_stream(&mut self) -> Box<dyn ChannelStream> {
        self.stream.take().expect("session stream already taken")
    }

    /// Best-effort error line to the peer. No-op once the stream is taken.
    pub async fn send_error(&mut self, message: &str) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(message.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;
        }
        Ok(())
    }

    /// Report the session's exit status to the transport. First call wins.
    pub fn exit(&mut self, code: u32) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(code);
        }
    }
}

/// Source of authenticated session channels (the listener side of the
/// transport boundary).
pub trait SessionSource: Send {
    /// Wait for the next session. An error means the listener is gone.
    fn accept(&mut self) -> impl Future<Output = Result<SessionChannel>> + Send;
}
