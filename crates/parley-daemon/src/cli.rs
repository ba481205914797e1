//! CLI argument parsing for parley-daemon

use clap::Parser;
use parley_core::event_bus::{DEFAULT_EVENTS_CAPACITY, DEFAULT_LOGS_CAPACITY};
use parley_core::spawn::SpawnConfig;
use parley_core::supervisor::SupervisorSettings;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "parley-daemon")]
#[command(author, version, about = "Voice agent supervisor with live log and event streams", long_about = None)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "PARLEY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(short, long, env = "PARLEY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Directory with the browser UI, served for unknown paths
    #[arg(long, env = "PARLEY_STATIC_DIR")]
    pub static_dir: Option<String>,

    /// Run the agent through a shell. Without a value, `$SHELL -l -c` is used
    #[arg(long, env = "PARLEY_SHELL", num_args = 0..=1, default_missing_value = "")]
    pub shell: Option<String>,

    /// Working directory for the agent
    #[arg(long, env = "PARLEY_WORKDIR")]
    pub workdir: Option<String>,

    /// Milliseconds a silent agent is given before it counts as running
    #[arg(long, env = "PARLEY_GRACE_MS", default_value_t = 2000)]
    pub grace_ms: u64,

    /// Seconds a stopping agent is given before it is killed
    #[arg(
        long,
        env = "PARLEY_STOP_TIMEOUT_SECS",
        default_value_t = 6,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub stop_timeout_secs: u64,

    /// Seconds between SSE keepalive comments
    #[arg(
        long,
        env = "PARLEY_KEEPALIVE_SECS",
        default_value_t = 25,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub keepalive_secs: u64,

    /// Per-subscriber backlog of the logs stream
    #[arg(long, env = "PARLEY_LOGS_CAPACITY", default_value_t = DEFAULT_LOGS_CAPACITY)]
    pub logs_capacity: usize,

    /// Per-subscriber backlog of the events stream
    #[arg(long, env = "PARLEY_EVENTS_CAPACITY", default_value_t = DEFAULT_EVENTS_CAPACITY)]
    pub events_capacity: usize,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Agent command line, after `--`
    #[arg(last = true, default_values_t = default_command())]
    pub command: Vec<String>,
}

fn default_command() -> Vec<String> {
    ["python3", "-u", "agent.py", "console"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Args {
    /// How to launch and stop the agent.
    pub fn supervisor_settings(&self) -> Result<SupervisorSettings, String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err("Agent command is empty".to_string());
        };

        let mut command = SpawnConfig::new(program.clone(), args.to_vec());
        if let Some(dir) = &self.workdir {
            command = command.working_dir(dir.clone());
        }
        if let Some(prefix) = &self.shell {
            command = command.shell((!prefix.is_empty()).then(|| prefix.clone()));
        }

        Ok(SupervisorSettings::new(command)
            .startup_grace(Duration::from_millis(self.grace_ms))
            .stop_timeout(Duration::from_secs(self.stop_timeout_secs)))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::shell::LaunchMode;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("parley-daemon").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8000);
        assert_eq!(args.keepalive(), Duration::from_secs(25));
        assert_eq!(args.logs_capacity, DEFAULT_LOGS_CAPACITY);
        assert_eq!(args.events_capacity, DEFAULT_EVENTS_CAPACITY);

        let settings = args.supervisor_settings().unwrap();
        assert_eq!(settings.command.program, "python3");
        assert_eq!(settings.command.args, vec!["-u", "agent.py", "console"]);
        assert_eq!(settings.command.launch, LaunchMode::Direct);
        assert_eq!(settings.startup_grace, Duration::from_secs(2));
        assert_eq!(settings.stop_timeout, Duration::from_secs(6));
    }

    #[test]
    fn trailing_command() {
        let args = parse(&["--port", "9000", "--", "uv", "run", "agent.py", "dev"]);
        assert_eq!(args.port, 9000);

        let settings = args.supervisor_settings().unwrap();
        assert_eq!(settings.command.program, "uv");
        assert_eq!(settings.command.args, vec!["run", "agent.py", "dev"]);
    }

    #[test]
    fn bare_shell_flag_uses_login_shell() {
        let settings = parse(&["--shell"]).supervisor_settings().unwrap();
        assert_eq!(settings.command.launch, LaunchMode::Shell(None));
    }

    #[test]
    fn explicit_shell_prefix() {
        let settings = parse(&["--shell", "/bin/zsh -l -c", "--workdir", "/srv/agent"])
            .supervisor_settings()
            .unwrap();
        assert_eq!(
            settings.command.launch,
            LaunchMode::Shell(Some("/bin/zsh -l -c".to_string()))
        );
        assert_eq!(settings.command.working_dir, Some("/srv/agent".to_string()));
    }

    #[test]
    fn timings() {
        let settings = parse(&["--grace-ms", "500", "--stop-timeout-secs", "1"])
            .supervisor_settings()
            .unwrap();
        assert_eq!(settings.startup_grace, Duration::from_millis(500));
        assert_eq!(settings.stop_timeout, Duration::from_secs(1));
    }

    #[test]
    fn rejects_zero_durations() {
        assert!(Args::try_parse_from(["parley-daemon", "--keepalive-secs", "0"]).is_err());
        assert!(Args::try_parse_from(["parley-daemon", "--stop-timeout-secs", "0"]).is_err());
        assert_eq!(parse(&["--keepalive-secs", "1"]).keepalive(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_port() {
        let result = Args::try_parse_from(["parley-daemon", "--port", "http"]);
        assert!(result.is_err());
    }
}
