//! Supervision of the single agent process.
//!
//! - [`state`]: lifecycle states and the status snapshot
//! - [`manager`]: the [`Supervisor`] that starts, stops, and watches the agent
//! - [`reader`]: the reader loop that turns agent output into bus traffic

pub mod manager;
pub mod reader;
pub mod state;

pub use manager::{Supervisor, SupervisorError, SupervisorSettings};
pub use state::{AgentHandle, LifecycleState, ProcessStatus};
