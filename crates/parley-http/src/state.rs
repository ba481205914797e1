//! Shared state for the HTTP server.
//!
//! Wraps the Supervisor and its EventBus for the HTTP handlers.

use parley_core::event_bus::EventBus;
use parley_core::supervisor::Supervisor;
use std::sync::Arc;
use std::time::Duration;

/// Interval between SSE keepalive comments.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    pub supervisor: Supervisor,
    /// The event bus the streams subscribe to.
    pub event_bus: Arc<EventBus>,
    pub keepalive: Duration,
}

impl SharedState {
    /// Create shared state around the supervisor and its event bus.
    pub fn new(supervisor: Supervisor) -> Self {
        let event_bus = Arc::clone(supervisor.event_bus());
        Self {
            supervisor,
            event_bus,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}
