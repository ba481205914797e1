//! # parley-core
//!
//! Core logic for Parley, the voice agent supervisor.
//!
//! This crate is transport-agnostic and can be used by:
//! - The HTTP server (via SSE streams and control endpoints)
//! - Tests and embedders driving a [`Supervisor`] directly
//!
//! ## Key Concepts
//!
//! - **Agent**: The single voice agent child process, launched from a command line
//! - **Raw log line**: One line of agent output, republished verbatim
//! - **Structured event**: A transcript or state change parsed from a marker line
//! - **Event bus**: Two broadcast channels (`logs` and `events`) that never block the agent

pub mod config;
pub mod event;
pub mod event_bus;
pub mod protocol;
pub mod shell;
pub mod spawn;
pub mod supervisor;

// Re-export commonly used types
pub use config::{AgentConfig, Voice};
pub use event::{EventKind, RawLogLine, StructuredEvent};
pub use event_bus::{ChannelName, EventBus, Subscription};
pub use spawn::SpawnConfig;
pub use supervisor::{
    AgentHandle, LifecycleState, ProcessStatus, Supervisor, SupervisorError, SupervisorSettings,
};
