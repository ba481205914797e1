//! Line protocol spoken by the agent process.
//!
//! The agent reports transcripts and conversational state by printing marker
//! lines on its output, interleaved with ordinary diagnostic logging:
//!
//! ```text
//! INFO:livekit.agents:registered worker
//! AGENT_STATE: listening
//! TRANSCRIPT_USER: what's the weather like
//! AGENT_STATE: thinking
//! TRANSCRIPT_AGENT: Sunny, mostly.
//! ```
//!
//! A marker must start the line and is matched case-sensitively. The payload
//! is whatever follows the colon, trimmed. Every other line is diagnostic
//! output and only travels on the logs channel.
//!
//! [`parse`] keeps no state between calls.

use thiserror::Error;

use crate::event::EventKind;

/// Prefix of a user transcript line.
pub const TRANSCRIPT_USER: &str = "TRANSCRIPT_USER:";

/// Prefix of an agent transcript line.
pub const TRANSCRIPT_AGENT: &str = "TRANSCRIPT_AGENT:";

/// Prefix of an agent state line.
pub const AGENT_STATE: &str = "AGENT_STATE:";

/// The recognized line markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    TranscriptUser,
    TranscriptAgent,
    AgentState,
}

impl Marker {
    pub const ALL: [Marker; 3] = [
        Marker::TranscriptUser,
        Marker::TranscriptAgent,
        Marker::AgentState,
    ];

    /// The literal line prefix, colon included.
    pub fn prefix(self) -> &'static str {
        match self {
            Marker::TranscriptUser => TRANSCRIPT_USER,
            Marker::TranscriptAgent => TRANSCRIPT_AGENT,
            Marker::AgentState => AGENT_STATE,
        }
    }

    fn event(self, payload: String) -> EventKind {
        match self {
            Marker::TranscriptUser => EventKind::TranscriptUser(payload),
            Marker::TranscriptAgent => EventKind::TranscriptAgent(payload),
            Marker::AgentState => EventKind::AgentState(payload),
        }
    }

    fn of(kind: &EventKind) -> Option<Marker> {
        match kind {
            EventKind::TranscriptUser(_) => Some(Marker::TranscriptUser),
            EventKind::TranscriptAgent(_) => Some(Marker::TranscriptAgent),
            EventKind::AgentState(_) => Some(Marker::AgentState),
            EventKind::ProcessLifecycle(_) => None,
        }
    }
}

/// A marker line whose payload could not be used as-is.
///
/// Not fatal: the event is still published with the best-effort payload and
/// the raw line still goes to the logs channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} line carried an empty payload", .marker.prefix())]
pub struct ParseAnomaly {
    pub marker: Marker,
}

/// Classify one line of agent output.
///
/// Returns `None` for lines that do not start with a recognized marker.
pub fn parse(line: &str) -> Option<EventKind> {
    Marker::ALL.iter().find_map(|marker| {
        line.strip_prefix(marker.prefix())
            .map(|payload| marker.event(payload.trim().to_string()))
    })
}

/// Check a parsed event for a malformed payload.
pub fn anomaly(kind: &EventKind) -> Option<ParseAnomaly> {
    let marker = Marker::of(kind)?;
    match kind.text() {
        Some(text) if text.is_empty() => Some(ParseAnomaly { marker }),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
