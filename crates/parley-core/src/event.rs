//! Records published on the event bus.
//!
//! Two record types travel through the bus:
//! - [`RawLogLine`]: every line the agent printed, verbatim
//! - [`StructuredEvent`]: a classified record (transcript, agent state, or
//!   process lifecycle) wrapping an [`EventKind`]
//!
//! Both carry a sequence number and a timestamp stamped by the bus at publish
//! time. Records are immutable once published and are shared between
//! subscribers behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::supervisor::LifecycleState;

/// One line of agent output, as published on the `logs` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawLogLine {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub line: String,
}

/// What a structured event says, before the bus stamps it.
///
/// Serializes adjacently tagged, e.g. `{"type": "transcript_user", "payload": "hi"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    /// What the user said, as transcribed by the agent.
    TranscriptUser(String),

    /// What the agent said.
    TranscriptAgent(String),

    /// Conversational state token reported by the agent (`listening`, `thinking`, ...).
    AgentState(String),

    /// Supervisor-side lifecycle transition of the agent process.
    ProcessLifecycle(LifecycleState),
}

impl EventKind {
    /// Wire name of the variant, as used in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::TranscriptUser(_) => "transcript_user",
            EventKind::TranscriptAgent(_) => "transcript_agent",
            EventKind::AgentState(_) => "agent_state",
            EventKind::ProcessLifecycle(_) => "process_lifecycle",
        }
    }

    /// Text payload for the variants produced by the line protocol.
    pub fn text(&self) -> Option<&str> {
        match self {
            EventKind::TranscriptUser(text)
            | EventKind::TranscriptAgent(text)
            | EventKind::AgentState(text) => Some(text),
            EventKind::ProcessLifecycle(_) => None,
        }
    }
}

/// A structured event as published on the `events` channel.
///
/// Serializes flat as `{"type": ..., "payload": ..., "seq": ..., "ts": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub seq: u64,
    pub ts: DateTime<Utc>,
}

// ============================================================================
// TESTS
// ============================================================================
