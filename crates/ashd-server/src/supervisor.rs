//! Process supervision: building and starting the user's shell or command.
//!
//! Every supervised process runs under the resolved identity's uid/gid in
//! its own session, with `USER` and `HOME` forced to the identity's values
//! and the working directory set to the home directory. Non-PTY sessions
//! get piped stdin and a single merged stdout+stderr pipe; PTY sessions go
//! through [`crate::pty`].

use std::process::Stdio;

use nix::unistd;
use tokio::process::{Child, ChildStdin, Command};

use ashd_core::error::{Error, Result};
use ashd_core::identity::ResolvedUser;

/// Fully specified invocation for a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Login shell to invoke.
    pub shell: String,
    /// Arguments: `["-c", <raw command>]` for one-shot, empty for interactive.
    pub args: Vec<String>,
    /// Credential pair the child is forced to.
    pub uid: u32,
    pub gid: u32,
    /// Working directory (the identity's home).
    pub cwd: String,
    /// Complete child environment.
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    /// Build the invocation for a session.
    ///
    /// A non-empty raw command runs `<shell> -c <raw command>`; an empty
    /// one runs the bare shell as an interactive login. Peer-supplied
    /// `USER` and `HOME` never survive; they always reflect the identity.
    pub fn for_session(
        user: &ResolvedUser,
        raw_command: &str,
        peer_env: &[(String, String)],
    ) -> Result<Self> {
        let (uid, gid) = user.credentials()?;

        let args = if raw_command.is_empty() {
            Vec::new()
        } else {
            vec!["-c".to_string(), raw_command.to_string()]
        };

        let mut env: Vec<(String, String)> = peer_env
            .iter()
            .filter(|(key, _)| key != "USER" && key != "HOME")
            .cloned()
            .collect();
        env.push(("USER".to_string(), user.username.clone()));
        env.push(("HOME".to_string(), user.home_dir.clone()));

        Ok(Self {
            shell: user.shell.clone(),
            args,
            uid,
            gid,
            cwd: user.home_dir.clone(),
            env,
        })
    }

    /// Append one more environment variable (e.g. `TERM` for PTY sessions).
    pub fn push_env(&mut self, key: &str, value: &str) {
        self.env.push((key.to_string(), value.to_string()));
    }
}

/// A running non-PTY process with piped stdin and merged output.
pub struct PipedProcess {
    /// Child handle for exit reaping.
    pub child: Child,
    /// Writer into the child's stdin.
    pub stdin: ChildStdin,
    /// Reader of the child's interleaved stdout+stderr.
    pub output: tokio::net::unix::pipe::Receiver,
}

/// Start a non-PTY process described by `spec`.
///
/// Both stdout and stderr are dup'd onto one kernel pipe, so the peer sees
/// the two streams interleaved exactly as the process produced them.
pub fn spawn_piped(spec: &SpawnSpec) -> Result<PipedProcess> {
    let (read_end, write_end) = unistd::pipe().map_err(|e| Error::Pipe {
        message: format!("failed to create output pipe: {}", e),
    })?;
    let write_clone = write_end.try_clone().map_err(|e| Error::Pipe {
        message: format!("failed to dup output pipe: {}", e),
    })?;

    let mut cmd = Command::new(&spec.shell);
    cmd.args(&spec.args)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&spec.cwd)
        .uid(spec.uid)
        .gid(spec.gid)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(write_clone))
        .stderr(Stdio::from(write_end));

    // New session so signals aimed at the server never reach the child.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        message: format!("failed to start {}: {}", spec.shell, e),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| Error::Pipe {
        message: "child stdin pipe missing".to_string(),
    })?;

    let output = tokio::net::unix::pipe::Receiver::from_owned_fd(read_end).map_err(|e| {
        Error::Pipe {
            message: format!("failed to register output pipe: {}", e),
        }
    })?;

    Ok(PipedProcess {
        child,
        stdin,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn current_user() -> ResolvedUser {
        let uid = unistd::geteuid();
        let user = unistd::User::from_uid(uid).unwrap().unwrap();
        ResolvedUser {
            username: user.name.clone(),
            uid: uid.as_raw().to_string(),
            gid: unistd::getegid().as_raw().to_string(),
            home_dir: "/tmp".to_string(),
            shell: "/bin/sh".to_string(),
        }
    }

    #[test]
    fn one_shot_command_runs_via_shell_dash_c() {
        let user = current_user();
        let spec = SpawnSpec::for_session(&user, "ls -la", &[]).unwrap();
        assert_eq!(spec.shell, "/bin/sh");
        assert_eq!(spec.args, vec!["-c".to_string(), "ls -la".to_string()]);
    }

    #[test]
    fn empty_command_runs_bare_shell() {
        let user = current_user();
        let spec = SpawnSpec::for_session(&user, "", &[]).unwrap();
        assert!(spec.args.is_empty());
        assert_eq!(spec.cwd, "/tmp");
    }

    #[test]
    fn forced_user_and_home_override_peer_env() {
        let user = current_user();
        let peer_env = vec![
            ("USER".to_string(), "evil".to_string()),
            ("HOME".to_string(), "/evil".to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
        ];
        let spec = SpawnSpec::for_session(&user, "", &peer_env).unwrap();

        let lookup = |key: &str| -> Vec<&str> {
            spec.env
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .collect()
        };
        assert_eq!(lookup("USER"), vec![user.username.as_str()]);
        assert_eq!(lookup("HOME"), vec!["/tmp"]);
        assert_eq!(lookup("LANG"), vec!["C.UTF-8"]);
    }

    #[test]
    fn malformed_identity_fails_spec_construction() {
        let mut user = current_user();
        user.uid = "not-a-uid".to_string();
        let err = SpawnSpec::for_session(&user, "", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid user");
    }

    #[tokio::test]
    async fn piped_process_merges_stdout_and_stderr() {
        let user = current_user();
        let spec =
            SpawnSpec::for_session(&user, "echo out; echo err 1>&2; echo done", &[]).unwrap();

        let mut process = spawn_piped(&spec).unwrap();
        drop(process.stdin);

        let mut output = String::new();
        process.output.read_to_string(&mut output).await.unwrap();
        let status = process.child.wait().await.unwrap();

        assert!(status.success());
        assert!(output.contains("out"));
        assert!(output.contains("err"));
        assert!(output.contains("done"));
    }

    #[tokio::test]
    async fn piped_process_env_reflects_identity() {
        let user = current_user();
        let peer_env = vec![
            ("USER".to_string(), "evil".to_string()),
            ("HOME".to_string(), "/evil".to_string()),
        ];
        let spec = SpawnSpec::for_session(&user, "echo $USER:$HOME:$(pwd)", &peer_env).unwrap();

        let mut process = spawn_piped(&spec).unwrap();
        drop(process.stdin);

        let mut output = String::new();
        process.output.read_to_string(&mut output).await.unwrap();
        process.child.wait().await.unwrap();

        assert_eq!(
            output.trim(),
            format!("{}:/tmp:/tmp", user.username)
        );
    }

    #[tokio::test]
    async fn piped_process_stdin_reaches_child() {
        let user = current_user();
        let spec = SpawnSpec::for_session(&user, "cat", &[]).unwrap();

        let mut process = spawn_piped(&spec).unwrap();
        process.stdin.write_all(b"echoed back").await.unwrap();
        drop(process.stdin);

        let mut output = String::new();
        process.output.read_to_string(&mut output).await.unwrap();
        process.child.wait().await.unwrap();
        assert_eq!(output, "echoed back");
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let mut user = current_user();
        user.shell = "/nonexistent/shell".to_string();
        let spec = SpawnSpec::for_session(&user, "", &[]).unwrap();
        let err = spawn_piped(&spec).err().expect("spawn should fail");
        assert!(err.is_fail_fast());
    }
}
