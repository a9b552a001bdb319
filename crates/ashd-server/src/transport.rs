//! Trusted-socket transport adapter.
//!
//! Stand-in for the external transport boundary when running standalone:
//! accepts connections on a trusted (loopback or tunnelled) socket, reads
//! one JSON hello line describing the session, resolves the login, and
//! hands the remaining byte stream to the core. The real deployment sits
//! behind an authenticating transport that performs key exchange and
//! produces the same `SessionChannel`s.
//!
//! This adapter carries no in-band control channel, so it never delivers
//! window-change events; transports with channel framing do.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use ashd_core::channel::{SessionChannel, SessionSource};
use ashd_core::error::{Error, Result};
use ashd_core::identity::CredentialResolver;
use ashd_core::session::PtyRequest;

/// First line a peer sends on the trusted socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHello {
    /// Verified login to resolve into an OS identity.
    pub login: String,
    /// Raw command; empty for an interactive login shell.
    #[serde(default)]
    pub command: String,
    /// Peer environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Interactive-mode request.
    #[serde(default)]
    pub pty: Option<PtyRequest>,
}

/// Session source accepting hello-prefixed byte streams on a TCP socket.
pub struct TcpSessionSource {
    listener: TcpListener,
    local_addr: SocketAddr,
    resolver: Arc<dyn CredentialResolver>,
    hello_timeout: Duration,
}

impl TcpSessionSource {
    /// Bind the trusted socket.
    pub async fn bind(
        addr: SocketAddr,
        resolver: Arc<dyn CredentialResolver>,
        hello_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Trusted socket bound");
        Ok(Self {
            listener,
            local_addr,
            resolver,
            hello_timeout,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn read_hello(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<SessionChannel> {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        tokio::time::timeout(self.hello_timeout, stream.read_line(&mut line))
            .await
            .map_err(|_| Error::Transport {
                message: format!("hello timed out from {}", peer_addr),
            })??;

        let hello: SessionHello =
            serde_json::from_str(line.trim_end()).map_err(|e| Error::Transport {
                message: format!("malformed hello from {}: {}", peer_addr, e),
            })?;

        let identity = self.resolver.resolve(&hello.login);

        Ok(SessionChannel::new(Box::new(stream), peer_addr)
            .with_command(hello.command)
            .with_env(hello.env)
            .with_pty(hello.pty)
            .with_identity(identity))
    }
}

impl SessionSource for TcpSessionSource {
    /// Wait for the next connection that completes the hello exchange.
    ///
    /// A bad peer (malformed hello, hello timeout) is connection-scoped:
    /// the connection is logged and dropped and the loop keeps accepting.
    /// Only a failure of the listener itself is returned.
    async fn accept(&mut self) -> Result<SessionChannel> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!(addr = %peer_addr, "Connection on trusted socket");

            match self.read_hello(stream, peer_addr).await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    warn!(addr = %peer_addr, error = %e, "Rejecting connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ashd_core::identity::ResolvedUser;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    struct StubResolver;

    impl CredentialResolver for StubResolver {
        fn resolve(&self, login: &str) -> Option<ResolvedUser> {
            (login == "alice").then(|| ResolvedUser {
                username: "alice".into(),
                uid: "1000".into(),
                gid: "1000".into(),
                home_dir: "/home/alice".into(),
                shell: "/bin/bash".into(),
            })
        }
    }

    async fn bound_source() -> TcpSessionSource {
        TcpSessionSource::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(StubResolver),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn hello_produces_resolved_session_channel() {
        let mut source = bound_source().await;
        let addr = source.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let hello = r#"{"login":"alice","command":"ls","pty":{"term":"xterm","cols":80,"rows":24}}"#;
            stream.write_all(hello.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
            stream
        });

        let channel = source.accept().await.unwrap();
        assert_eq!(channel.raw_command, "ls");
        assert_eq!(channel.pty.as_ref().unwrap().term, "xterm");
        assert_eq!(channel.identity.as_ref().unwrap().username, "alice");
        let _ = client.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_login_yields_channel_without_identity() {
        let mut source = bound_source().await;
        let addr = source.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\"login\":\"mallory\"}\n")
                .await
                .unwrap();
            stream
        });

        let channel = source.accept().await.unwrap();
        assert!(channel.identity.is_none());
        assert_eq!(channel.raw_command, "");
        assert!(channel.pty.is_none());
        let _ = client.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_hello_drops_the_connection_and_keeps_accepting() {
        let mut source = bound_source().await;
        let addr = source.local_addr();

        let clients = tokio::spawn(async move {
            let mut garbage = TcpStream::connect(addr).await.unwrap();
            garbage.write_all(b"not json\n").await.unwrap();

            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\"login\":\"alice\"}\n")
                .await
                .unwrap();
            (garbage, stream)
        });

        // The garbage connection never surfaces; the next good hello does.
        let channel = source.accept().await.unwrap();
        assert_eq!(channel.identity.as_ref().unwrap().username, "alice");
        let _ = clients.await.unwrap();
    }

    #[tokio::test]
    async fn silent_peer_times_out_without_closing_the_listener() {
        let mut source = TcpSessionSource::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(StubResolver),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let addr = source.local_addr();

        let clients = tokio::spawn(async move {
            let silent = TcpStream::connect(addr).await.unwrap();
            // Give the silent peer a head start in the accept queue.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\"login\":\"alice\"}\n")
                .await
                .unwrap();
            (silent, stream)
        });

        let channel = source.accept().await.unwrap();
        assert_eq!(channel.identity.as_ref().unwrap().username, "alice");
        let _ = clients.await.unwrap();
    }
}
