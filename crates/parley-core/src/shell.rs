//! Command building for the agent process.
//!
//! The agent can be launched directly or wrapped in the user's login shell,
//! which picks up PATH and virtualenv activation from the shell profile.
//!
//! - Non-POSIX shells (fish, nushell) fall back to bash/sh
//! - Arguments with spaces or special characters are quoted
//!
//! # Example
//!
//! ```ignore
//! use parley_core::shell::{build_command, LaunchMode};
//!
//! let cmd = build_command(
//!     "python3",
//!     &["-u".to_string(), "agent.py".to_string(), "console".to_string()],
//!     Some("/srv/voice-agent"),
//!     &LaunchMode::Shell(None), // use $SHELL -l -c
//! )?;
//! ```

use std::process::{Command, ExitStatus};

use serde::Serialize;
use thiserror::Error;

/// How the agent command is launched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Exec the program directly.
    #[default]
    Direct,

    /// Run through a shell. `None` uses the login shell (`$SHELL -l -c`);
    /// `Some` gives an explicit prefix such as `/bin/zsh -l -c`.
    Shell(Option<String>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty shell prefix")]
    EmptyShellPrefix,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Exit status of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl AgentExit {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit whose status could not be collected.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for AgentExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Prepend the binary's parent directory to PATH so sibling tools are found.
pub fn prepare_path_env(cmd: &mut Command, binary_path: &str) {
    if binary_path.contains('/') {
        if let Some(dir) = std::path::Path::new(binary_path).parent() {
            if let Some(dir_str) = dir.to_str() {
                let existing = std::env::var("PATH").unwrap_or_default();
                let combined = if existing.is_empty() {
                    dir_str.to_string()
                } else {
                    format!("{}:{}", dir_str, existing)
                };
                cmd.env("PATH", combined);
            }
        }
    }
}

/// Build the command that launches the agent.
///
/// Returns a configured Command ready for further customization
/// (environment, stdio).
pub fn build_command(
    program: &str,
    args: &[String],
    working_dir: Option<&str>,
    launch: &LaunchMode,
) -> Result<Command, CommandError> {
    let mut cmd = match launch {
        LaunchMode::Direct => {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
        LaunchMode::Shell(prefix) => shell_command(program, args, prefix.as_deref())?,
    };

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    prepare_path_env(&mut cmd, program);

    Ok(cmd)
}

/// Wrap the program in a shell: `<prefix> '<quoted_command>'`.
#[cfg(unix)]
fn shell_command(
    program: &str,
    args: &[String],
    shell_prefix: Option<&str>,
) -> Result<Command, CommandError> {
    let prefix = get_shell_prefix(shell_prefix);

    let prefix_parts: Vec<&str> = prefix.split_whitespace().collect();
    let Some((shell_program, shell_args)) = prefix_parts.split_first() else {
        return Err(CommandError::EmptyShellPrefix);
    };

    let mut command_parts = Vec::with_capacity(args.len() + 1);
    for part in std::iter::once(program).chain(args.iter().map(String::as_str)) {
        command_parts.push(
            shlex::try_quote(part)
                .map_err(|_| CommandError::InvalidArgument(part.to_string()))?
                .into_owned(),
        );
    }
    let full_command = command_parts.join(" ");

    let mut cmd = Command::new(shell_program);
    cmd.args(shell_args).arg(&full_command);
    Ok(cmd)
}

/// Windows has no login shell; run the program directly.
#[cfg(not(unix))]
fn shell_command(
    program: &str,
    args: &[String],
    _shell_prefix: Option<&str>,
) -> Result<Command, CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Get the shell prefix to use for command execution.
///
/// A non-empty custom prefix is used as-is. Otherwise the prefix is built from
/// $SHELL with `-l -c`, falling back to /bin/bash or /bin/sh for shells that
/// don't speak POSIX (fish, nu, ...).
#[cfg(unix)]
fn get_shell_prefix(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix {
        if !prefix.is_empty() {
            return prefix.to_string();
        }
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let shell_name = std::path::Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let non_posix = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];

    let effective_shell = if non_posix.iter().any(|&s| shell_name == s) {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        }
    } else {
        &shell
    };

    format!("{} -l -c", effective_shell)
}

// ============================================================================
// TESTS
// ============================================================================
