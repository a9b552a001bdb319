//! In-memory session channels and a scripted session source.

use std::net::SocketAddr;

use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};

use ashd_core::channel::{SessionChannel, SessionSource};
use ashd_core::error::{Error, Result};
use ashd_core::session::WindowSize;

/// The peer-side handles of a mocked session channel.
pub struct MockPeer {
    /// Peer end of the byte stream.
    pub stream: DuplexStream,
    /// Sends window-size changes into the session.
    pub winch_tx: mpsc::Sender<WindowSize>,
    /// Resolves with the exit status the server reported.
    pub exit_rx: oneshot::Receiver<u32>,
}

/// Build an in-memory session channel plus the peer-side handles.
///
/// The channel carries no command, PTY request, or identity; attach those
/// with the `SessionChannel` builders before handing it to the server.
pub fn mock_session_channel(remote_addr: SocketAddr) -> (SessionChannel, MockPeer) {
    let (server_side, peer_side) = tokio::io::duplex(64 * 1024);
    let (winch_tx, winch_rx) = mpsc::channel(8);
    let (exit_tx, exit_rx) = oneshot::channel();

    let channel = SessionChannel::new(Box::new(server_side), remote_addr)
        .with_window_changes(winch_rx)
        .with_exit_hook(exit_tx);

    (
        channel,
        MockPeer {
            stream: peer_side,
            winch_tx,
            exit_rx,
        },
    )
}

/// Session source fed from a channel of pre-built sessions.
///
/// Yields each queued session in order; once the sender side is dropped,
/// `accept` fails the way a closed listener would.
pub struct MockSessionSource {
    rx: mpsc::Receiver<SessionChannel>,
}

impl MockSessionSource {
    /// Create a source and the handle used to feed it sessions.
    pub fn new() -> (mpsc::Sender<SessionChannel>, Self) {
        let (tx, rx) = mpsc::channel(8);
        (tx, Self { rx })
    }
}

impl SessionSource for MockSessionSource {
    async fn accept(&mut self) -> Result<SessionChannel> {
        self.rx.recv().await.ok_or(Error::Transport {
            message: "session source closed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn peer_and_channel_share_a_stream() {
        let (mut channel, mut peer) = mock_session_channel(test_addr());

        let mut stream = channel.take_stream();
        stream.write_all(b"from server").await.unwrap();
        drop(stream);

        let mut out = Vec::new();
        peer.stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"from server");
    }

    #[tokio::test]
    async fn source_yields_queued_sessions_then_fails() {
        let (tx, mut source) = MockSessionSource::new();
        let (channel, _peer) = mock_session_channel(test_addr());
        tx.send(channel).await.unwrap();
        drop(tx);

        assert!(source.accept().await.is_ok());
        assert!(matches!(
            source.accept().await,
            Err(Error::Transport { .. })
        ));
    }
}
