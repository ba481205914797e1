//! Agent process spawning and I/O management.
//!
//! This module provides the process plumbing the supervisor builds on:
//! - Spawning the agent in its own process group (Unix)
//! - Merging stdout and stderr into one stream of lines
//! - Signalling the process group for graceful and forced termination
//! - Waiting for exit, with a force-kill escape hatch
//!
//! Output decoding is lossy: invalid UTF-8 is replaced rather than ending the
//! stream, trailing whitespace is trimmed, and blank lines are skipped.

use std::process::Stdio;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;

use crate::config::AgentConfig;
use crate::shell::{build_command, AgentExit, LaunchMode};

/// Merged output lines of an agent process, in arrival order per pipe.
pub type OutputLines = BoxStream<'static, String>;

/// How to launch the agent program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Path to (or name of) the agent program
    pub program: String,
    /// Arguments to pass to the program
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// Direct exec or through a shell
    pub launch: LaunchMode,
    /// Extra environment, applied before the agent configuration variables
    pub env: Vec<(String, String)>,
}

impl SpawnConfig {
    /// Create a new spawn config with required fields.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            launch: LaunchMode::Direct,
            env: Vec::new(),
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run through the login shell, or through `prefix` when given.
    pub fn shell(mut self, prefix: Option<String>) -> Self {
        self.launch = LaunchMode::Shell(prefix);
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A running agent process.
pub struct AgentProcess {
    pid: u32,
    child: Child,
    output: Option<OutputLines>,
}

impl AgentProcess {
    /// Spawn the agent with the given configuration in its environment.
    ///
    /// stdin is closed; stdout and stderr are captured and available through
    /// [`AgentProcess::take_output`].
    pub fn spawn(config: &SpawnConfig, agent: &AgentConfig) -> Result<Self, String> {
        let mut cmd = build_command(
            &config.program,
            &config.args,
            config.working_dir.as_deref(),
            &config.launch,
        )
        .map_err(|e| e.to_string())?;

        cmd.envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.envs(agent.env_vars());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so signals reach the agent even behind a wrapper shell.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", config.program, e))?;

        let pid = child
            .id()
            .ok_or_else(|| "Process exited before its pid was read".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Failed to capture stdout".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Failed to capture stderr".to_string())?;

        Ok(Self {
            pid,
            child,
            output: Some(merge_output(stdout, stderr)),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take ownership of the output stream.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    /// Wait for the process to exit.
    ///
    /// If `kill` fires first, the process group is force-killed and then
    /// reaped. A dropped `kill` sender is ignored.
    pub async fn wait_or_kill(&mut self, kill: oneshot::Receiver<()>) -> AgentExit {
        tokio::select! {
            status = self.child.wait() => exit_from(status),
            Ok(()) = kill => {
                log::warn!("Force killing agent process {}", self.pid);
                self.kill_now();
                exit_from(self.child.wait().await)
            }
        }
    }

    /// Force kill the process group immediately.
    pub fn kill_now(&mut self) {
        kill_group(self.pid);
        let _ = self.child.start_kill();
    }
}

/// SIGKILL whatever is left of the process group led by `pid`.
///
/// Still reaches descendants after the leader itself has exited.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    if let Err(e) = signal_group(pid, libc::SIGKILL) {
        log::debug!("SIGKILL to process group {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

fn exit_from(status: std::io::Result<std::process::ExitStatus>) -> AgentExit {
    match status {
        Ok(status) => AgentExit::from_status(status),
        Err(e) => {
            log::warn!("Failed to collect agent exit status: {}", e);
            AgentExit::unknown()
        }
    }
}

/// Ask the agent's process group to terminate (SIGTERM).
///
/// Returns `false` if the signal could not be delivered and the caller
/// should force-kill instead.
#[cfg(unix)]
pub fn request_termination(pid: u32) -> bool {
    match signal_group(pid, libc::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("SIGTERM to process group {} failed: {}", pid, e);
            false
        }
    }
}

/// Graceful termination is unavailable off Unix; callers force-kill.
#[cfg(not(unix))]
pub fn request_termination(_pid: u32) -> bool {
    false
}

/// Send `signal` to every process in the group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Merge two output pipes into one stream of decoded lines.
pub fn merge_output<O, E>(stdout: O, stderr: E) -> OutputLines
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    stream::select(line_stream(stdout, "stdout"), line_stream(stderr, "stderr")).boxed()
}

fn line_stream<R>(reader: R, pipe: &'static str) -> BoxStream<'static, String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(BufReader::new(reader), move |mut reader| async move {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(line) = decode_line(&buf) {
                        return Some((line, reader));
                    }
                }
                Err(e) => {
                    log::warn!("Failed to read agent {}: {}", pipe, e);
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// Decode one raw line, or `None` if it is blank.
pub fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
