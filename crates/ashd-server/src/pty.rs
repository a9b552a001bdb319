//! PTY allocation and supervision for interactive sessions.
//!
//! Handles:
//! - Opening the pseudo-terminal pair with the peer's initial window size
//! - Forking the shell with the slave as its controlling terminal, under
//!   the resolved identity's uid/gid
//! - Async I/O on the master via `AsyncFd` (tokio reactor integration)
//! - Window-size changes via `TIOCSWINSZ`
//!
//! Uses the `nix` crate for Unix PTY support.

use std::convert::Infallible;
use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{chdir, close, dup2, execvpe, fork, setgid, setsid, setuid, ForkResult, Gid,
    Pid, Uid};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

use ashd_core::error::{Error, Result};

use crate::supervisor::SpawnSpec;

/// A supervised process attached to a pseudo-terminal.
pub struct Pty {
    /// Master side wrapped for async I/O.
    master: Arc<AsyncFd<std::fs::File>>,
    /// Child process PID.
    child_pid: Pid,
    /// Last applied terminal size.
    size: Mutex<(u16, u16)>,
    /// Raw master fd for ioctl operations.
    master_fd: RawFd,
}

impl Pty {
    /// Open a PTY and start `spec` under it with privileges dropped.
    ///
    /// The child becomes its own session leader with the slave as its
    /// controlling terminal, switches to the spec's gid then uid, chdirs
    /// into the working directory, and execs the shell with exactly the
    /// spec's environment.
    pub fn spawn(spec: &SpawnSpec, cols: u16, rows: u16) -> Result<Self> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pty_result = openpty(&winsize, None).map_err(|e| Error::Pty {
            message: format!("failed to open pty: {}", e),
        })?;

        let master_fd = pty_result.master.as_raw_fd();
        let slave_fd = pty_result.slave.as_raw_fd();

        let shell = CString::new(spec.shell.clone()).map_err(|e| Error::Spawn {
            message: format!("invalid shell path: {}", e),
        })?;
        let mut args = vec![shell.clone()];
        for arg in &spec.args {
            args.push(CString::new(arg.clone()).map_err(|e| Error::Spawn {
                message: format!("invalid argument: {}", e),
            })?);
        }
        let mut env = Vec::with_capacity(spec.env.len());
        for (key, value) in &spec.env {
            env.push(
                CString::new(format!("{}={}", key, value)).map_err(|e| Error::Spawn {
                    message: format!("invalid environment entry {}: {}", key, e),
                })?,
            );
        }

        info!(shell = %spec.shell, uid = spec.uid, "Spawning shell on pty");

        // SAFETY: the child only calls async-signal-safe operations before
        // exec (setsid/ioctl/dup2/set*id/chdir/execvpe).
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(pty_result.slave);

                // Hand the master fd to a File for AsyncFd wrapping.
                let master_owned: OwnedFd = pty_result.master;
                let std_file = unsafe { std::fs::File::from_raw_fd(master_owned.as_raw_fd()) };
                std::mem::forget(master_owned);

                set_nonblocking(master_fd)?;
                let async_fd = AsyncFd::new(std_file).map_err(|e| Error::Pty {
                    message: format!("failed to register pty with reactor: {}", e),
                })?;

                Ok(Self {
                    master: Arc::new(async_fd),
                    child_pid: child,
                    size: Mutex::new((cols, rows)),
                    master_fd,
                })
            }
            Ok(ForkResult::Child) => {
                // A failure here must terminate the child, never return
                // into the server's code.
                let err = match exec_child(slave_fd, master_fd, spec, &shell, &args, &env) {
                    Ok(never) => match never {},
                    Err(err) => err,
                };
                let _ = writeln!(std::io::stderr(), "ashd: session setup failed: {}", err);
                unsafe { libc::_exit(127) }
            }
            Err(e) => Err(Error::Pty {
                message: format!("fork failed: {}", e),
            }),
        }
    }

    /// Apply a window-size change via `TIOCSWINSZ`.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let result = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to resize pty: {}", err),
            });
        }

        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = (cols, rows);
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    /// Reader over the master side (process output).
    pub fn reader(&self) -> PtyReader {
        PtyReader {
            master: Arc::clone(&self.master),
        }
    }

    /// Writer into the master side (process input).
    pub fn writer(&self) -> PtyWriter {
        PtyWriter {
            master: Arc::clone(&self.master),
        }
    }

    /// Check if the child has exited without blocking.
    pub fn try_wait(&self) -> Result<Option<i32>> {
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(128 + signal as i32)),
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(_) => Ok(None),
            // Child already reaped.
            Err(nix::errno::Errno::ECHILD) => Ok(Some(0)),
            Err(e) => Err(Error::Pty {
                message: format!("failed to check child status: {}", e),
            }),
        }
    }

    /// Wait for the child to exit and return its status code.
    pub async fn wait(&self) -> Result<i32> {
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Terminate the child process.
    pub fn kill(&self) -> Result<()> {
        kill(self.child_pid, Signal::SIGTERM).map_err(|e| Error::Pty {
            message: format!("failed to kill child: {}", e),
        })
    }

    /// Last applied terminal size.
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Child process PID.
    pub fn pid(&self) -> Pid {
        self.child_pid
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Reap or terminate a still-running child.
        if self.try_wait().ok().flatten().is_none() {
            let _ = self.kill();
        }
    }
}

/// Child-side setup between fork and exec. Never returns on success.
fn exec_child(
    slave_fd: RawFd,
    master_fd: RawFd,
    spec: &SpawnSpec,
    shell: &CString,
    args: &[CString],
    env: &[CString],
) -> nix::Result<Infallible> {
    setsid()?;

    // Make the slave the controlling terminal. The request type differs
    // across libcs, hence the cast.
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    dup2(slave_fd, libc::STDIN_FILENO)?;
    dup2(slave_fd, libc::STDOUT_FILENO)?;
    dup2(slave_fd, libc::STDERR_FILENO)?;
    if slave_fd > libc::STDERR_FILENO {
        let _ = close(slave_fd);
    }
    let _ = close(master_fd);

    // Drop privileges: gid first, while we still may.
    setgid(Gid::from_raw(spec.gid))?;
    setuid(Uid::from_raw(spec.uid))?;

    chdir(spec.cwd.as_str())?;

    execvpe(shell, args, env)
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Pty {
        message: format!("fcntl F_GETFL failed: {}", e),
    })?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Pty {
        message: format!("fcntl F_SETFL failed: {}", e),
    })?;
    Ok(())
}

/// `AsyncRead` over the PTY master.
///
/// EIO from the master means the slave side closed (shell exited) and is
/// surfaced as EOF.
pub struct PtyReader {
    master: Arc<AsyncFd<std::fs::File>>,
}

impl AsyncRead for PtyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            let mut guard = ready!(self.master.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => {
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// `AsyncWrite` into the PTY master.
pub struct PtyWriter {
    master: Arc<AsyncFd<std::fs::File>>,
}

impl AsyncWrite for PtyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        loop {
            let mut guard = ready!(self.master.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(data)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getegid, geteuid, User};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn current_user_spec(raw_command: &str) -> SpawnSpec {
        let uid = geteuid();
        let user = User::from_uid(uid).unwrap().unwrap();
        let resolved = ashd_core::identity::ResolvedUser {
            username: user.name.clone(),
            uid: uid.as_raw().to_string(),
            gid: getegid().as_raw().to_string(),
            home_dir: "/tmp".to_string(),
            shell: "/bin/sh".to_string(),
        };
        SpawnSpec::for_session(&resolved, raw_command, &[]).unwrap()
    }

    #[tokio::test]
    async fn pty_spawn_runs_shell() {
        // May fail in minimal environments without /dev/pts.
        let spec = current_user_spec("");
        let pty = match Pty::spawn(&spec, 80, 24) {
            Ok(pty) => pty,
            Err(e) => {
                eprintln!("PTY spawn failed (may be expected in CI): {}", e);
                return;
            }
        };
        assert_eq!(pty.size(), (80, 24));

        let mut writer = pty.writer();
        writer.write_all(b"exit\n").await.unwrap();

        let code = pty.wait().await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn pty_one_shot_command_output() {
        let spec = current_user_spec("echo from-pty; exit 0");
        let pty = match Pty::spawn(&spec, 80, 24) {
            Ok(pty) => pty,
            Err(e) => {
                eprintln!("PTY spawn failed (may be expected in CI): {}", e);
                return;
            }
        };

        let mut reader = pty.reader();
        let mut output = Vec::new();
        // EIO after shell exit is mapped to EOF, so read_to_end terminates.
        let _ = reader.read_to_end(&mut output).await;
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("from-pty"), "output was: {:?}", text);

        let _ = pty.wait().await;
    }

    #[tokio::test]
    async fn pty_resize_tracks_size() {
        let spec = current_user_spec("");
        if let Ok(pty) = Pty::spawn(&spec, 80, 24) {
            pty.resize(120, 40).unwrap();
            assert_eq!(pty.size(), (120, 40));
            let _ = pty.kill();
        }
    }
}
