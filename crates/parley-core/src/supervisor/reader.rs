//! The reader loop: agent output in, bus traffic out.
//!
//! Each line goes to the logs channel verbatim. Lines carrying a protocol
//! marker are also classified and published on the events channel.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{oneshot, watch};

use crate::event_bus::EventBus;
use crate::protocol;
use crate::shell::AgentExit;
use crate::spawn::{AgentProcess, OutputLines};

/// Holds the agent's first line back until the supervisor has announced the
/// process as running, so the `Running` lifecycle event precedes anything
/// the agent says.
pub struct StartGate {
    ready: Option<oneshot::Sender<()>>,
    go: Option<oneshot::Receiver<()>>,
}

impl StartGate {
    /// Create a gate together with its `ready` signal (fired on the first
    /// line) and the `go` trigger that releases it.
    pub fn armed() -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (go_tx, go_rx) = oneshot::channel();
        let gate = Self {
            ready: Some(ready_tx),
            go: Some(go_rx),
        };
        (gate, ready_rx, go_tx)
    }

    /// A gate that never holds anything back.
    pub fn open() -> Self {
        Self {
            ready: None,
            go: None,
        }
    }

    async fn pass(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
        if let Some(go) = self.go.take() {
            // A dropped trigger releases the gate as well.
            let _ = go.await;
        }
    }
}

/// Publish one output line: raw on logs, classified on events.
///
/// Returns the events-channel sequence number if the line was classified.
pub fn publish_line(bus: &EventBus, line: String) -> Option<u64> {
    let parsed = protocol::parse(&line);
    bus.publish_log(line);

    let kind = parsed?;
    if let Some(anomaly) = protocol::anomaly(&kind) {
        log::warn!("Parse anomaly: {}", anomaly);
    }
    Some(bus.publish_event(kind))
}

/// Forward output lines to the bus until end-of-stream.
///
/// Returns the number of lines forwarded.
pub async fn forward_output(
    mut lines: OutputLines,
    bus: &EventBus,
    mut gate: StartGate,
    pid: u32,
) -> usize {
    let mut count = 0;
    while let Some(line) = lines.next().await {
        gate.pass().await;
        log::debug!("agent [{}]: {}", pid, line);
        publish_line(bus, line);
        count += 1;
    }
    count
}

/// Run one agent to completion.
///
/// Output forwarding and exit waiting run side by side. The exit is reported
/// on `exit_tx` as soon as the process is reaped; the task itself finishes
/// only once the output has been drained. A descendant holding the pipes
/// open keeps the task alive after the exit report.
pub(crate) async fn run_agent(
    mut process: AgentProcess,
    bus: Arc<EventBus>,
    gate: StartGate,
    kill: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<AgentExit>>,
) {
    let pid = process.pid();
    let lines = process
        .take_output()
        .unwrap_or_else(|| stream::empty().boxed());

    let reap = async {
        let exit = process.wait_or_kill(kill).await;
        exit_tx.send_replace(Some(exit));
        exit
    };
    let (count, exit) = tokio::join!(forward_output(lines, &bus, gate, pid), reap);

    log::debug!("Agent {} drained after {} lines ({})", pid, count, exit);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn lines(items: &[&str]) -> OutputLines {
        let owned: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        stream::iter(owned).boxed()
    }

    #[test]
    fn marker_line_goes_to_both_channels() {
        let bus = EventBus::new();
        let mut logs = bus.logs().subscribe();
        let mut events = bus.events().subscribe();

        let seq = publish_line(&bus, "TRANSCRIPT_USER: hello there".to_string());

        assert_eq!(seq, Some(1));
        assert_eq!(logs.try_recv().unwrap().line, "TRANSCRIPT_USER: hello there");
        assert_eq!(
            events.try_recv().unwrap().kind,
            EventKind::TranscriptUser("hello there".into())
        );
    }

    #[test]
    fn diagnostic_line_goes_to_logs_only() {
        let bus = EventBus::new();
        let mut logs = bus.logs().subscribe();
        let mut events = bus.events().subscribe();

        let seq = publish_line(&bus, "INFO:livekit.agents:starting worker".to_string());

        assert_eq!(seq, None);
        assert_eq!(
            logs.try_recv().unwrap().line,
            "INFO:livekit.agents:starting worker"
        );
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn empty_payload_is_published_and_logged_raw() {
        let bus = EventBus::new();
        let mut logs = bus.logs().subscribe();
        let mut events = bus.events().subscribe();

        publish_line(&bus, "TRANSCRIPT_AGENT:".to_string());

        assert_eq!(logs.try_recv().unwrap().line, "TRANSCRIPT_AGENT:");
        assert_eq!(
            events.try_recv().unwrap().kind,
            EventKind::TranscriptAgent(String::new())
        );
    }

    #[tokio::test]
    async fn forward_output_counts_lines() {
        let bus = EventBus::new();
        let mut events = bus.events().subscribe();

        let count = forward_output(
            lines(&["booting", "AGENT_STATE: listening", "AGENT_STATE: speaking"]),
            &bus,
            StartGate::open(),
            1,
        )
        .await;

        assert_eq!(count, 3);
        assert_eq!(bus.logs().last_seq(), 3);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::AgentState("listening".into()));
        assert_eq!(events.recv().await.unwrap().kind, EventKind::AgentState("speaking".into()));
    }

    #[tokio::test]
    async fn gate_holds_first_line_until_released() {
        let bus = Arc::new(EventBus::new());
        let (gate, ready_rx, go_tx) = StartGate::armed();

        let task = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                forward_output(lines(&["AGENT_STATE: listening"]), &bus, gate, 1).await
            })
        };

        ready_rx.await.unwrap();
        assert_eq!(bus.logs().last_seq(), 0);

        go_tx.send(()).unwrap();
        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(bus.logs().last_seq(), 1);
    }

    #[tokio::test]
    async fn dropped_trigger_releases_gate() {
        let bus = EventBus::new();
        let (gate, _ready_rx, go_tx) = StartGate::armed();
        drop(go_tx);

        let count = forward_output(lines(&["a", "b"]), &bus, gate, 1).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn exit_reported_while_descendant_holds_output() {
        use crate::config::AgentConfig;
        use crate::spawn::{kill_group, SpawnConfig};
        use std::time::Duration;

        let config = SpawnConfig::new("sh", vec!["-c".to_string(), "sleep 5 & exit 4".to_string()]);
        let process = AgentProcess::spawn(&config, &AgentConfig::default()).unwrap();
        let pid = process.pid();

        let (_kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, mut exit_rx) = watch::channel(None);
        let task = tokio::spawn(run_agent(
            process,
            Arc::new(EventBus::new()),
            StartGate::open(),
            kill_rx,
            exit_tx,
        ));

        let report = *tokio::time::timeout(Duration::from_secs(2), exit_rx.wait_for(Option::is_some))
            .await
            .expect("exit should be reported before the pipe closes")
            .unwrap();
        assert_eq!(report.and_then(|exit| exit.code), Some(4));
        assert!(!task.is_finished());

        kill_group(pid);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reader should finish once the group is gone")
            .unwrap();
    }
}
