//! HTTP server for browser-based access to the voice agent.
//!
//! Exposes agent control via REST and the bus channels via Server-Sent Events:
//!
//! | Route                | Purpose                               |
//! |----------------------|---------------------------------------|
//! | `POST /start`        | Start the agent (JSON `AgentConfig`)  |
//! | `POST /stop`         | Stop the agent                        |
//! | `GET /status`        | Current lifecycle state               |
//! | `GET /logs/stream`   | Raw agent output, one line per frame  |
//! | `GET /events/stream` | Structured events as JSON frames      |
//!
//! Anything else falls through to the static UI directory, if one is set.

mod routes;
mod state;
mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub use routes::ControlResponse;
pub use state::{SharedState, DEFAULT_KEEPALIVE};

/// Build the application router.
pub fn router(state: Arc<SharedState>, static_dir: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/start", post(routes::start_handler))
        .route("/stop", post(routes::stop_handler))
        .route("/status", get(routes::status_handler))
        .route("/logs/stream", get(stream::logs_handler))
        .route("/events/stream", get(stream::events_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Serve static files if directory provided
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app
}

/// Handle to a running HTTP server.
pub struct HttpServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl HttpServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Stop the server gracefully.
    ///
    /// Waits for open connections to finish, so close the event bus first
    /// to end any SSE streams.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start the HTTP server on the given host and port.
///
/// Binds before returning, so address errors surface here. The server runs
/// as a task on the current runtime. Returns a handle that can be used to
/// stop the server.
pub async fn start(
    state: Arc<SharedState>,
    host: &str,
    port: u16,
    static_dir: Option<String>,
) -> Result<HttpServerHandle, String> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| format!("Failed to bind HTTP server to {}:{}: {}", host, port, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    let app = router(state, static_dir);

    log::info!("HTTP server listening on http://{}", local_addr);

    let task = tokio::spawn(async move {
        // Run with graceful shutdown
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                log::info!("HTTP server shutting down");
            })
            .await;
        if let Err(e) = result {
            log::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
        local_addr,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body, Bytes};
    use axum::http::{Method, Request, StatusCode};
    use futures::StreamExt;
    use parley_core::event::EventKind;
    use parley_core::event_bus::EventBus;
    use parley_core::spawn::SpawnConfig;
    use parley_core::supervisor::{Supervisor, SupervisorSettings};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state_for(script: &str) -> Arc<SharedState> {
        let command = SpawnConfig::new("sh", vec!["-c".to_string(), script.to_string()]);
        let settings = SupervisorSettings::new(command)
            .startup_grace(Duration::from_millis(100))
            .stop_timeout(Duration::from_secs(2));
        let supervisor = Supervisor::new(settings, Arc::new(EventBus::new()));
        Arc::new(SharedState::new(supervisor))
    }

    fn idle_state() -> Arc<SharedState> {
        state_for("sleep 30")
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: &Arc<SharedState>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(Arc::clone(state), None).oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn next_frame<S>(frames: &mut S) -> String
    where
        S: futures::Stream<Item = Result<Bytes, axum::Error>> + Unpin,
    {
        let chunk = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    mod control {
        use super::*;

        #[tokio::test]
        async fn status_starts_idle() {
            let state = idle_state();
            let (status, json) = send(&state, request(Method::GET, "/status", "")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["state"], "idle");
            assert!(json.get("pid").is_none());
        }

        #[tokio::test]
        async fn stop_when_idle_conflicts() {
            let state = idle_state();
            let (status, json) = send(&state, request(Method::POST, "/stop", "")).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(json["success"], false);
            assert_eq!(json["status"]["state"], "idle");
        }

        #[tokio::test]
        async fn malformed_start_is_bad_request() {
            let state = idle_state();
            let (status, json) = send(&state, request(Method::POST, "/start", "{oops")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["success"], false);
            assert_eq!(state.supervisor.status().state.name(), "idle");
        }

        #[tokio::test]
        #[cfg(unix)]
        async fn start_then_stop() {
            let state = idle_state();

            let body = r#"{"system_prompt": "Be brief", "voice": "Puck", "model": "gemini-2.5-flash"}"#;
            let (status, json) = send(&state, request(Method::POST, "/start", body)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["success"], true);
            assert_eq!(json["status"]["state"], "running");
            assert_eq!(json["status"]["voice"], "Puck");
            assert_eq!(json["status"]["model"], "gemini-2.5-flash");
            assert!(json["status"]["pid"].as_u64().is_some());

            let (status, json) = send(&state, request(Method::GET, "/status", "")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["state"], "running");

            let (status, json) = send(&state, request(Method::POST, "/stop", "")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Agent stopped");
            assert_eq!(json["status"]["state"], "idle");
        }

        #[tokio::test]
        #[cfg(unix)]
        async fn second_start_conflicts() {
            let state = idle_state();

            let (status, _) = send(&state, request(Method::POST, "/start", "")).await;
            assert_eq!(status, StatusCode::OK);

            let (status, json) = send(&state, request(Method::POST, "/start", "")).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(json["error"], "Agent already running");
            assert_eq!(json["status"]["state"], "running");

            state.supervisor.shutdown().await;
        }

        #[tokio::test]
        #[cfg(unix)]
        async fn agent_that_dies_on_startup_is_server_error() {
            let state = state_for("exit 4");
            let (status, json) = send(&state, request(Method::POST, "/start", "")).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(json["status"]["state"], "failed");
            assert!(json["status"]["reason"].as_str().unwrap().contains("exit code 4"));
        }
    }

    mod streams {
        use super::*;

        async fn open(state: &Arc<SharedState>, uri: &str) -> axum::response::Response {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            router(Arc::clone(state), None).oneshot(req).await.unwrap()
        }

        #[tokio::test]
        async fn logs_stream_carries_raw_lines() {
            let state = idle_state();
            let response = open(&state, "/logs/stream").await;

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()["content-type"].to_str().unwrap(),
                "text/event-stream"
            );
            assert_eq!(response.headers()["x-accel-buffering"], "no");

            let mut frames = response.into_body().into_data_stream();
            state.event_bus.publish_log("INFO:agent:ready");

            let frame = next_frame(&mut frames).await;
            assert!(frame.contains("id: 1\n"));
            assert!(frame.contains("data: INFO:agent:ready\n"));
        }

        #[tokio::test]
        async fn events_stream_carries_json() {
            let state = idle_state();
            let response = open(&state, "/events/stream").await;
            let mut frames = response.into_body().into_data_stream();

            state
                .event_bus
                .publish_event(EventKind::TranscriptUser("hi".into()));

            let frame = next_frame(&mut frames).await;
            let data = frame
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
                .unwrap();
            let json: serde_json::Value = serde_json::from_str(data).unwrap();
            assert_eq!(json["type"], "transcript_user");
            assert_eq!(json["payload"], "hi");
            assert_eq!(json["seq"], 1);
        }

        #[tokio::test]
        async fn disconnect_releases_subscription() {
            let state = idle_state();
            let response = open(&state, "/events/stream").await;
            assert_eq!(state.event_bus.events().subscriber_count(), 1);

            drop(response);
            assert_eq!(state.event_bus.events().subscriber_count(), 0);
        }

        #[tokio::test]
        async fn closing_bus_ends_streams() {
            let state = idle_state();
            let response = open(&state, "/logs/stream").await;
            let mut frames = response.into_body().into_data_stream();

            state.event_bus.close();
            let end = tokio::time::timeout(Duration::from_secs(5), frames.next())
                .await
                .unwrap();
            assert!(end.is_none());
        }

        #[tokio::test]
        async fn cors_is_permissive() {
            let state = idle_state();
            let req = Request::builder()
                .uri("/status")
                .header("origin", "http://localhost:5173")
                .body(Body::empty())
                .unwrap();
            let response = router(state, None).oneshot(req).await.unwrap();
            assert_eq!(response.headers()["access-control-allow-origin"], "*");
        }
    }

    #[tokio::test]
    async fn static_dir_is_served_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>parley</h1>").unwrap();

        let app = router(idle_state(), Some(dir.path().display().to_string()));
        let req = Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<h1>parley</h1>");
    }

    #[tokio::test]
    async fn server_starts_and_stops() {
        let mut handle = start(idle_state(), "127.0.0.1", 0, None).await.unwrap();

        assert!(handle.is_running());
        assert_ne!(handle.local_addr().port(), 0);

        handle.stop().await;
        assert!(!handle.is_running());
    }
}
