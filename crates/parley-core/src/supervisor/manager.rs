//! Supervisor - owns the single agent process.
//!
//! # Concurrency
//!
//! All lifecycle state lives behind one async mutex (the agent slot). `start`
//! and `stop` hold it for their whole duration, including the startup grace
//! period and the stop timeout, so concurrent callers are linearized: two
//! starts can never spawn two agents and a stop can never kill a child that
//! a concurrent start is still bringing up.
//!
//! The published view of that state is a watch channel, which makes
//! `status()` lock-free and safe to call at any time.
//!
//! # Exit handling
//!
//! Every run gets a reaper task that waits for the agent's exit report. If
//! the slot still holds that run when the report arrives, nobody asked for
//! the exit: a clean exit (status 0) becomes `Stopped` once the output has
//! drained, anything else becomes `Failed` right away and is announced on the
//! events channel. Nothing is restarted.
//!
//! The exit report does not wait for the output pipes to close, since a
//! descendant of the agent may hold them open. The reader gets one stop
//! timeout to drain, then the process group is killed, then after a second
//! timeout the reader is aborted. The slot stays locked until then.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::reader::{run_agent, StartGate};
use super::state::{AgentHandle, LifecycleState, ProcessStatus};
use crate::config::AgentConfig;
use crate::event::EventKind;
use crate::event_bus::EventBus;
use crate::shell::AgentExit;
use crate::spawn::{kill_group, request_termination, AgentProcess, SpawnConfig};

/// Time after spawn before a silent agent counts as running.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Time a stopping agent gets to exit before it is force-killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(6);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Agent already running")]
    AlreadyRunning,

    #[error("Agent is not running")]
    NotRunning,

    #[error("Failed to spawn agent: {0}")]
    SpawnFailure(String),

    #[error("Agent exited unexpectedly ({0})")]
    UnexpectedExit(AgentExit),
}

/// How the supervisor launches and stops the agent.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub command: SpawnConfig,
    pub startup_grace: Duration,
    pub stop_timeout: Duration,
}

impl SupervisorSettings {
    pub fn new(command: SpawnConfig) -> Self {
        Self {
            command,
            startup_grace: DEFAULT_STARTUP_GRACE,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// The agent occupying the slot.
struct RunningAgent {
    handle: AgentHandle,
    exit: watch::Receiver<Option<AgentExit>>,
    kill: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct Inner {
    settings: SupervisorSettings,
    bus: Arc<EventBus>,
    slot: Mutex<Option<RunningAgent>>,
    status: watch::Sender<ProcessStatus>,
}

impl Inner {
    /// Publish a new status. Only called with the slot lock held.
    fn set_status(&self, state: LifecycleState, handle: Option<AgentHandle>) {
        log::debug!("Agent lifecycle -> {}", state);
        self.status.send_replace(ProcessStatus::new(state, handle));
    }

    fn state(&self) -> LifecycleState {
        self.status.borrow().state.clone()
    }

    /// Record a failure: `Failed` state plus a lifecycle event.
    fn fail(&self, reason: String) {
        self.set_status(LifecycleState::Failed(reason.clone()), None);
        self.bus
            .publish_event(EventKind::ProcessLifecycle(LifecycleState::Failed(reason)));
    }

    /// Announce a completed stop and release the slot's state to `Idle`.
    fn finish_stopped(&self, handle: AgentHandle) {
        self.set_status(LifecycleState::Stopped, Some(handle));
        self.bus
            .publish_event(EventKind::ProcessLifecycle(LifecycleState::Stopped));
        self.set_status(LifecycleState::Idle, None);
    }

    /// Settle a stop: `Failed` if the agent crashed before anyone asked it
    /// to exit, `Stopped` otherwise.
    fn finish(&self, handle: AgentHandle, exit: AgentExit, requested: bool) {
        if requested || exit.success() {
            self.finish_stopped(handle);
        } else {
            self.fail(SupervisorError::UnexpectedExit(exit).to_string());
        }
    }

    /// Wait for a run's reader to forward the last of its output.
    ///
    /// After one stop timeout the process group is killed; after a second
    /// the reader is aborted and whatever it still buffers is lost.
    async fn drain(&self, agent: &mut RunningAgent) {
        let timeout = self.settings.stop_timeout;
        let pid = agent.handle.pid;
        if tokio::time::timeout(timeout, &mut agent.task).await.is_ok() {
            return;
        }

        log::warn!("Agent {} output still open after {:?}, killing process group", pid, timeout);
        kill_group(pid);
        if tokio::time::timeout(timeout, &mut agent.task).await.is_err() {
            log::error!("Agent {} output did not drain after kill, aborting reader", pid);
            agent.task.abort();
            let _ = (&mut agent.task).await;
        }
    }
}

/// Wait for a run's exit report.
async fn wait_exit(exit: &mut watch::Receiver<Option<AgentExit>>) -> AgentExit {
    match exit.wait_for(Option::is_some).await {
        Ok(report) => (*report).unwrap_or_else(AgentExit::unknown),
        // The reader task went away without reporting (aborted or panicked).
        Err(_) => AgentExit::unknown(),
    }
}

/// Supervises the single voice agent process.
///
/// Cheap to clone; clones share the same agent slot.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, bus: Arc<EventBus>) -> Self {
        let (status, _) = watch::channel(ProcessStatus::default());
        Self {
            inner: Arc::new(Inner {
                settings,
                bus,
                slot: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    /// Current lifecycle state and agent identity. Never blocks.
    pub fn status(&self) -> ProcessStatus {
        self.inner.status.borrow().clone()
    }

    /// Follow status changes.
    pub fn watch_status(&self) -> watch::Receiver<ProcessStatus> {
        self.inner.status.subscribe()
    }

    /// Spawn the agent.
    ///
    /// Returns once the agent is `Running`: after its first line of output
    /// or after the startup grace period, whichever comes first. An agent
    /// that exits before that fails the start.
    pub async fn start(&self, config: AgentConfig) -> Result<AgentHandle, SupervisorError> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;
        if slot.is_some() || inner.state().is_active() {
            return Err(SupervisorError::AlreadyRunning);
        }

        inner.set_status(LifecycleState::Starting, None);

        let process = match AgentProcess::spawn(&inner.settings.command, &config) {
            Ok(process) => process,
            Err(e) => {
                log::error!("Failed to spawn agent: {}", e);
                let error = SupervisorError::SpawnFailure(e);
                inner.fail(error.to_string());
                return Err(error);
            }
        };

        let handle = AgentHandle {
            run_id: Uuid::new_v4(),
            pid: process.pid(),
            started_at: Utc::now(),
            model: config.model.clone(),
            voice: config.voice,
        };
        inner.set_status(LifecycleState::Starting, Some(handle.clone()));

        let (gate, ready_rx, go_tx) = StartGate::armed();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, mut exit_rx) = watch::channel(None);
        let task = tokio::spawn(run_agent(
            process,
            Arc::clone(&inner.bus),
            gate,
            kill_rx,
            exit_tx,
        ));

        let early_exit = tokio::select! {
            Ok(()) = ready_rx => None,
            _ = tokio::time::sleep(inner.settings.startup_grace) => None,
            exit = wait_exit(&mut exit_rx) => Some(exit),
        };

        if let Some(exit) = early_exit {
            log::warn!("Agent {} exited during startup ({})", handle.pid, exit);
            let error = SupervisorError::UnexpectedExit(exit);
            inner.fail(error.to_string());

            drop(go_tx);
            let mut agent = RunningAgent {
                handle,
                exit: exit_rx,
                kill: Some(kill_tx),
                task,
            };
            inner.drain(&mut agent).await;
            return Err(error);
        }

        inner.set_status(LifecycleState::Running, Some(handle.clone()));
        inner
            .bus
            .publish_event(EventKind::ProcessLifecycle(LifecycleState::Running));
        let _ = go_tx.send(());

        log::info!(
            "Agent started - pid {} (run {}, model {}, voice {})",
            handle.pid,
            handle.run_id,
            handle.model,
            handle.voice
        );

        self.spawn_reaper(handle.run_id, exit_rx.clone());
        *slot = Some(RunningAgent {
            handle: handle.clone(),
            exit: exit_rx,
            kill: Some(kill_tx),
            task,
        });

        Ok(handle)
    }

    /// Stop the agent.
    ///
    /// Sends a graceful termination signal, waits up to the stop timeout, then
    /// force-kills. Returns once the process has exited and its output has
    /// been drained or abandoned. An agent that had already crashed when the
    /// stop came in ends up `Failed` rather than `Stopped`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;
        let Some(mut agent) = slot.take() else {
            return Err(SupervisorError::NotRunning);
        };

        let pid = agent.handle.pid;
        let timeout = inner.settings.stop_timeout;
        inner.set_status(LifecycleState::Stopping, Some(agent.handle.clone()));

        let already_exited = agent.exit.borrow().is_some();
        if !already_exited && !request_termination(pid) {
            if let Some(kill) = agent.kill.take() {
                let _ = kill.send(());
            }
        }

        let exit = match tokio::time::timeout(timeout, wait_exit(&mut agent.exit)).await {
            Ok(exit) => exit,
            Err(_) => {
                log::warn!("Agent {} did not exit within {:?}, killing", pid, timeout);
                if let Some(kill) = agent.kill.take() {
                    let _ = kill.send(());
                }
                match tokio::time::timeout(timeout, wait_exit(&mut agent.exit)).await {
                    Ok(exit) => exit,
                    Err(_) => {
                        log::error!("Agent {} did not exit after kill", pid);
                        AgentExit::unknown()
                    }
                }
            }
        };
        inner.drain(&mut agent).await;

        log::info!("Agent stopped - pid {} ({})", pid, exit);
        inner.finish(agent.handle, exit, !already_exited);
        Ok(())
    }

    /// Stop the agent if one is running. Used on server shutdown.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) | Err(SupervisorError::NotRunning) => {}
            Err(e) => log::warn!("Failed to stop agent on shutdown: {}", e),
        }
    }

    /// Watch one run for an exit nobody asked for.
    fn spawn_reaper(&self, run_id: Uuid, mut exit: watch::Receiver<Option<AgentExit>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let report = wait_exit(&mut exit).await;

            let mut slot = inner.slot.lock().await;
            let mut agent = match slot.take() {
                Some(agent) if agent.handle.run_id == run_id => agent,
                // Stopped (and possibly restarted) by an operator meanwhile.
                other => {
                    *slot = other;
                    return;
                }
            };

            if report.success() {
                inner.drain(&mut agent).await;
                log::info!("Agent {} exited on its own ({})", agent.handle.pid, report);
                inner.finish(agent.handle, report, false);
            } else {
                log::warn!("Agent {} exited unexpectedly ({})", agent.handle.pid, report);
                inner.fail(SupervisorError::UnexpectedExit(report).to_string());
                inner.drain(&mut agent).await;
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================
