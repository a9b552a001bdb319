//! Session orchestration: the accept loop and the per-session lifecycle.
//!
//! `SshServer` owns the server-wide shutdown signal and dispatches one
//! task per accepted session. Within a session the flow is
//! `Init -> Authenticated -> Running{PTY|NonPTY} -> Draining -> Closed`,
//! with one audit event per milestone.
//!
//! Failure scoping follows `Error::is_fail_fast`: PTY, pipe, and spawn
//! failures close the whole server on the rationale that they indicate a
//! host-level problem; identity and sink failures terminate only the one
//! session. Narrowing the fail-fast set to session scope is a deliberate
//! operational change - adjust the predicate, not the call sites.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ashd_core::audit::{AuditEventType, AuditLog};
use ashd_core::channel::{SessionChannel, SessionSource};
use ashd_core::error::{Error, Result};
use ashd_core::session::{audit_log_name, is_file_transfer, transcript_log_name, PtyRequest};
use ashd_core::sink::SinkFactory;
use ashd_core::ShutdownSignal;

use crate::pty::Pty;
use crate::relay;
use crate::supervisor::{self, SpawnSpec};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Version string reported in startup logs.
    pub version: String,
    /// Refuse to construct unless running as root. The server must drop to
    /// arbitrary per-session uids, which requires root. Disable for tests
    /// only, where sessions resolve to the current user.
    pub require_root: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            require_root: true,
        }
    }
}

/// The session server: accepts channels from the transport boundary and
/// runs each as an audited, privilege-dropped shell session.
pub struct SshServer<F: SinkFactory> {
    config: ServerConfig,
    sinks: Arc<F>,
    shutdown: ShutdownSignal,
}

impl<F: SinkFactory + 'static> SshServer<F> {
    /// Create a server. Fails unless the effective uid is root (the
    /// startup precondition for per-session privilege drops).
    pub fn new(config: ServerConfig, sinks: F) -> Result<Self> {
        if config.require_root && !nix::unistd::geteuid().is_root() {
            return Err(Error::Privilege {
                message: "ashd server needs to run as root".to_string(),
            });
        }
        Ok(Self {
            config,
            sinks: Arc::new(sinks),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Handle to the server-wide shutdown signal. Triggering it closes the
    /// accept loop and cancels every active session.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the accept loop until shutdown or listener failure.
    ///
    /// Every accepted channel gets an independent task; active sessions
    /// are cancelled when the shutdown signal fires.
    pub async fn serve<S: SessionSource>(&self, mut source: S) -> Result<()> {
        info!(version = %self.config.version, "ashd server starting");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.wait() => {
                    info!("Shutdown signal received, closing listener");
                    return Ok(());
                }

                accepted = source.accept() => {
                    match accepted {
                        Ok(channel) => {
                            let sinks = Arc::clone(&self.sinks);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                let session_shutdown = shutdown.clone();
                                tokio::select! {
                                    _ = handle_session(channel, sinks, shutdown) => {}
                                    _ = session_shutdown.wait() => {
                                        debug!("Session cancelled by server shutdown");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            if self.shutdown.is_triggered() {
                                return Ok(());
                            }
                            warn!(error = %e, "Listener failed");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// Per-session state machine.
async fn handle_session<F: SinkFactory>(
    mut channel: SessionChannel,
    sinks: Arc<F>,
    shutdown: ShutdownSignal,
) {
    // Init: derive the session id and open the audit sink. A sink failure
    // is fatal to this session only and leaves no audit record at all.
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, addr = %channel.remote_addr, "Session accepted");

    let audit_sink = match sinks.audit_sink(&audit_log_name(&session_id)).await {
        Ok(sink) => sink,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to create event log");
            fail_session(&mut channel, "Failed to create event log").await;
            return;
        }
    };
    let mut audit = AuditLog::new(
        audit_sink,
        session_id.clone(),
        channel.remote_addr.to_string(),
        channel.raw_command.clone(),
    );

    // Authenticated: the resolver must have attached an identity.
    let Some(user) = channel.identity.clone() else {
        error!(session_id = %session_id, "No resolved identity on session");
        fail_session(&mut channel, "Error retrieving credentials from session").await;
        return;
    };
    audit.set_username(&user.username);
    audit.emit(AuditEventType::Auth).await;

    // A non-numeric uid/gid never spawns a process.
    let spec = match SpawnSpec::for_session(&user, &channel.raw_command, &channel.env) {
        Ok(spec) => spec,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Rejecting malformed identity");
            let message = e.to_string();
            fail_session(&mut channel, &message).await;
            return;
        }
    };

    let transcript_name = transcript_log_name(&session_id);
    match channel.pty.take() {
        Some(req) => {
            run_pty_session(channel, spec, req, audit, sinks, &transcript_name, &shutdown).await
        }
        None => {
            run_piped_session(channel, spec, audit, sinks, &transcript_name, &shutdown).await
        }
    }
    debug!(session_id = %session_id, "Session closed");
}

/// Running (PTY branch) through Draining and Closed.
#[allow(clippy::too_many_arguments)]
async fn run_pty_session<F: SinkFactory>(
    mut channel: SessionChannel,
    mut spec: SpawnSpec,
    req: PtyRequest,
    audit: AuditLog,
    sinks: Arc<F>,
    transcript_name: &str,
    shutdown: &ShutdownSignal,
) {
    spec.push_env("TERM", &req.term);

    let pty = match Pty::spawn(&spec, req.cols, req.rows) {
        Ok(pty) => Arc::new(pty),
        Err(e) => {
            error!(error = %e, "Failed to start pty session");
            shutdown.trigger();
            return;
        }
    };

    let audit = Arc::new(AsyncMutex::new(audit));
    audit.lock().await.emit(AuditEventType::SessionStart).await;

    // Apply window-size changes for the life of the session, one resize
    // audit event per applied change.
    let mut winch = channel.take_window_changes();
    let resize_pty = Arc::clone(&pty);
    let resize_audit = Arc::clone(&audit);
    let resize_shutdown = shutdown.clone();
    let resize_task = tokio::spawn(async move {
        while let Some(size) = winch.recv().await {
            if let Err(e) = resize_pty.resize(size.cols, size.rows) {
                error!(error = %e, "Failed to set pty window size");
                resize_shutdown.trigger();
                return;
            }
            resize_audit.lock().await.emit(AuditEventType::Resize).await;
        }
    });

    let transcript = match sinks.transcript_sink(transcript_name).await {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "Failed to create session log");
            fail_session(&mut channel, "Failed to create log").await;
            resize_task.abort();
            let _ = pty.kill();
            audit.lock().await.emit(AuditEventType::SessionStop).await;
            return;
        }
    };

    let (peer_read, peer_write) = tokio::io::split(channel.take_stream());
    let inbound = relay::spawn_inbound_copy(peer_read, pty.writer());

    if let Err(e) = relay::forward_copy(pty.reader(), peer_write, transcript).await {
        warn!(error = %e, "Failed to write session output to peer");
        let _ = pty.kill();
    }

    // Draining: reap the shell. A non-zero status is not escalated.
    match pty.wait().await {
        Ok(code) if code != 0 => debug!(code, "Shell did not close cleanly"),
        Err(e) => debug!(error = %e, "Failed to reap shell"),
        _ => {}
    }

    inbound.abort();
    resize_task.abort();
    audit.lock().await.emit(AuditEventType::SessionStop).await;
}

/// Running (non-PTY branch) through Draining and Closed.
async fn run_piped_session<F: SinkFactory>(
    mut channel: SessionChannel,
    spec: SpawnSpec,
    mut audit: AuditLog,
    sinks: Arc<F>,
    transcript_name: &str,
    shutdown: &ShutdownSignal,
) {
    let process = match supervisor::spawn_piped(&spec) {
        Ok(process) => process,
        Err(e) => {
            error!(error = %e, "Failed to start non-pty session");
            shutdown.trigger();
            return;
        }
    };

    let event = if is_file_transfer(&channel.raw_command) {
        AuditEventType::Scp
    } else {
        AuditEventType::Exec
    };
    audit.emit(event).await;

    let supervisor::PipedProcess {
        mut child,
        stdin,
        output,
    } = process;

    let transcript = match sinks.transcript_sink(transcript_name).await {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "Failed to create session log");
            fail_session(&mut channel, "Failed to create log").await;
            let _ = child.start_kill();
            return;
        }
    };

    let (peer_read, peer_write) = tokio::io::split(channel.take_stream());
    let inbound = relay::spawn_inbound_copy(peer_read, stdin);

    if let Err(e) = relay::forward_copy(output, peer_write, transcript).await {
        warn!(error = %e, "Failed to write command output to peer");
        let _ = child.start_kill();
    }

    match child.wait().await {
        Ok(status) if !status.success() => debug!(%status, "Command did not close cleanly"),
        Err(e) => debug!(error = %e, "Failed to reap command"),
        _ => {}
    }

    inbound.abort();
}

/// Report a session-fatal condition to the peer and terminate the session
/// with a non-zero status.
async fn fail_session(channel: &mut SessionChannel, message: &str) {
    if let Err(e) = channel.send_error(message).await {
        debug!(error = %e, "Failed to write error to peer");
    }
    channel.exit(1);
}
