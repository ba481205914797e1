//! Server-Sent Event streams.
//!
//! Clients connect to `/logs/stream` or `/events/stream` and receive every
//! item published on that channel after they connected. Each frame carries
//! the item's sequence number as its SSE `id`. A client that falls too far
//! behind silently loses its oldest items.
//!
//! Disconnecting drops the stream and with it the bus subscription.

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use parley_core::event::{RawLogLine, StructuredEvent};
use parley_core::event_bus::{ChannelName, Subscription};
use std::convert::Infallible;
use std::sync::Arc;

use super::SharedState;

/// Header asking reverse proxies not to buffer the stream.
const NO_BUFFERING: (&str, &str) = ("x-accel-buffering", "no");

/// Handler for GET /logs/stream
///
/// Frames carry the raw line as `data`.
pub async fn logs_handler(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let subscription = state.event_bus.logs().subscribe();
    sse_response(&state, subscription, log_frame)
}

/// Handler for GET /events/stream
///
/// Frames carry the event as JSON `data`.
pub async fn events_handler(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let subscription = state.event_bus.events().subscribe();
    sse_response(&state, subscription, event_frame)
}

fn log_frame(line: &RawLogLine) -> Option<Event> {
    Some(Event::default().id(line.seq.to_string()).data(&line.line))
}

fn event_frame(event: &StructuredEvent) -> Option<Event> {
    match Event::default().id(event.seq.to_string()).json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::warn!("Failed to serialize event {}: {}", event.seq, e);
            None
        }
    }
}

fn sse_response<T, F>(
    state: &SharedState,
    subscription: Subscription<T>,
    render: F,
) -> impl IntoResponse
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Option<Event> + Send + 'static,
{
    let keepalive = KeepAlive::new().interval(state.keepalive).text("ping");
    (
        [NO_BUFFERING],
        Sse::new(sse_stream(subscription, render)).keep_alive(keepalive),
    )
}

/// Logs the end of a client connection when the stream is dropped.
struct Connection(ChannelName);

impl Connection {
    fn open(channel: ChannelName) -> Self {
        log::debug!("SSE client connected to {}", channel);
        Self(channel)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        log::debug!("SSE client disconnected from {}", self.0);
    }
}

/// Turn a subscription into a stream of SSE frames.
///
/// Ends when the channel is closed (server shutdown).
fn sse_stream<T, F>(
    subscription: Subscription<T>,
    render: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Option<Event> + Send + 'static,
{
    let connection = Connection::open(subscription.channel());
    stream::unfold(
        (subscription, render, connection),
        |(mut subscription, render, connection)| async move {
            loop {
                let Some(item) = subscription.recv().await else {
                    return None;
                };
                if let Some(frame) = render(&item) {
                    return Some((Ok::<_, Infallible>(frame), (subscription, render, connection)));
                }
            }
        },
    )
}

// ============================================================================
// TESTS
// ============================================================================
