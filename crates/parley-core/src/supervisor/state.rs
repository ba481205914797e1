//! Agent lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Voice;

/// Lifecycle of the supervised agent process.
///
/// `Idle → Starting → Running → Stopping → Stopped → Idle`, with `Failed`
/// reachable from `Starting` or `Running`.
///
/// Serializes as `{"state": "running"}` or
/// `{"state": "failed", "reason": "exit code 1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

impl LifecycleState {
    /// Whether an agent process occupies the slot in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Running)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Failed(reason) => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Identity of the one agent process the supervisor may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentHandle {
    /// Assigned per start; distinguishes restarts that reuse a pid.
    pub run_id: Uuid,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub model: String,
    pub voice: Voice,
}

/// Point-in-time view of the supervisor, as returned by `status()`.
///
/// Serializes flat: `{"state": "running", "run_id": ..., "pid": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProcessStatus {
    #[serde(flatten)]
    pub state: LifecycleState,

    /// Present while an agent process exists.
    #[serde(flatten)]
    pub handle: Option<AgentHandle>,
}

impl ProcessStatus {
    pub fn new(state: LifecycleState, handle: Option<AgentHandle>) -> Self {
        Self { state, handle }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|handle| handle.pid)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.handle.as_ref().map(|handle| handle.started_at)
    }
}
