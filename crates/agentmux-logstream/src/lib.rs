#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-logstream** – Log Streamer & Signal Detector (spec §4.C).
//!
//! Converts raw byte streams from agent sessions into structured signals:
//! classifies each line's severity, runs the signal-token regex table,
//! computes confidence/context, and publishes both the raw `LogEntry` level
//! classification and any detected `Signal`s onto the `agent-logs` channel
//! — while also feeding detected signals straight into the orchestrator's
//! queue via an `mpsc::Sender<Signal>` so the streamer is not itself a
//! bottleneck for dispatch latency.
//!
//! The per-session task/ring-buffer shape is generalized from
//! `toka-agent-runtime::process::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`),
//! which owns one task and one record per running agent; here the unit of
//! ownership is a streaming session rather than an agent process.

mod classify;
mod config;
mod detector;
mod discovery;
mod stream;

pub use classify::classify_level;
pub use config::StreamerConfig;
pub use detector::{detect, Detection};
pub use stream::{SessionStream, StreamMetrics, StreamState};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument};

use agentmux_bus::EventBus;
use agentmux_session::{SessionHandle, SessionHost, SessionHostError};
use agentmux_types::{LogEntry, Signal};

use discovery::spawn_discovery_loop;
use stream::{new_session_stream, spawn_stream_pump};

/// Errors raised by streamer operations.
#[derive(Debug, thiserror::Error)]
pub enum LogStreamError {
    /// A stream already exists for this session.
    #[error("session {0} is already being streamed")]
    AlreadyStreaming(String),
    /// No stream is tracked for this session.
    #[error("no stream for session {0}")]
    UnknownStream(String),
    /// The Session Host failed to hand back an output iterator.
    #[error(transparent)]
    Host(#[from] SessionHostError),
}

/// Owns one background task per actively-streamed session, plus (when
/// enabled) the auto-discovery poll loop.
pub struct LogStreamer {
    pub(crate) session_host: Arc<dyn SessionHost>,
    bus: Arc<EventBus>,
    pub(crate) config: StreamerConfig,
    signal_tx: mpsc::Sender<Signal>,
    pub(crate) streams: DashMap<String, StreamEntry>,
    discovery_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct StreamEntry {
    stream: Arc<SessionStream>,
    pump: tokio::task::JoinHandle<()>,
}

impl LogStreamer {
    /// Construct a streamer over `session_host`, publishing to `bus` and
    /// forwarding every detected signal on `signal_tx` (the orchestrator's
    /// intake queue).
    pub fn new(
        session_host: Arc<dyn SessionHost>,
        bus: Arc<EventBus>,
        config: StreamerConfig,
        signal_tx: mpsc::Sender<Signal>,
    ) -> Arc<Self> {
        let streamer = Arc::new(Self {
            session_host,
            bus,
            config,
            signal_tx,
            streams: DashMap::new(),
            discovery_handle: Mutex::new(None),
        });
        streamer.clone().maybe_start_discovery();
        streamer
    }

    fn maybe_start_discovery(self: Arc<Self>) {
        if !self.config.auto_discovery {
            return;
        }
        let handle = spawn_discovery_loop(self.clone());
        if let Ok(mut guard) = self.discovery_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Begin streaming `handle`'s output. Idempotent failure: starting an
    /// already-tracked session is an error, not a silent no-op, so callers
    /// (including the discovery loop) can tell the two cases apart.
    #[instrument(skip(self))]
    pub async fn start_stream(&self, handle: SessionHandle) -> Result<(), LogStreamError> {
        if self.streams.contains_key(&handle.session_id) {
            return Err(LogStreamError::AlreadyStreaming(handle.session_id));
        }
        let output = self.session_host.read_output(&handle)?;
        let stream = new_session_stream(handle.clone());
        let pump = spawn_stream_pump(
            stream.clone(),
            handle.agent_id.clone(),
            output,
            self.bus.clone(),
            self.signal_tx.clone(),
            self.config.clone(),
        );
        self.streams.insert(handle.session_id.clone(), StreamEntry { stream, pump });
        info!(session_id = %handle.session_id, "stream registered");
        Ok(())
    }

    /// Stop streaming `session_id`. The underlying pump transitions through
    /// `draining` on its own once the output closes; this only triggers
    /// that by aborting the pump's read loop early (used when the session
    /// host reports the session gone, not when it closes naturally).
    pub async fn stop_stream(&self, session_id: &str, reason: &str) {
        if let Some((_, entry)) = self.streams.remove(session_id) {
            info!(session_id, reason, "stopping stream");
            entry.pump.abort();
        }
    }

    /// Current lifecycle state of a tracked stream, if any.
    pub async fn stream_state(&self, session_id: &str) -> Option<StreamState> {
        let entry = self.streams.get(session_id)?;
        Some(entry.stream.state().await)
    }

    /// Metrics snapshot for a tracked stream, if any.
    pub fn stream_metrics(&self, session_id: &str) -> Option<StreamMetrics> {
        self.streams.get(session_id).map(|e| e.stream.metrics())
    }

    /// Buffered log entries for a tracked stream, oldest first.
    pub async fn buffered_entries(&self, session_id: &str) -> Option<Vec<LogEntry>> {
        let entry = self.streams.get(session_id)?;
        Some(entry.stream.buffered_entries().await)
    }

    /// Session ids currently being streamed.
    pub fn active_sessions(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop the discovery loop (if running) and every tracked stream.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.discovery_handle.lock().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_stream(&id, "streamer shutdown").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_bus::CHANNEL_AGENT_LOGS;
    use agentmux_session::subprocess::SubprocessSessionHost;
    use agentmux_types::{AgentBackendKind, AgentCapabilities, AgentRole, TokenLimits};
    use std::collections::HashSet;
    use std::time::Duration;

    fn cat_config() -> agentmux_types::AgentConfig {
        agentmux_types::AgentConfig {
            id: "a1".into(),
            role: AgentRole::Generalist,
            kind: AgentBackendKind::Subprocess,
            roles: HashSet::from([AgentRole::Generalist]),
            run_command: vec!["cat".into()],
            token_limits: TokenLimits { daily: 1, weekly: 1, monthly: 1 },
            capabilities: AgentCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn detects_signal_from_streamed_line_and_publishes_to_bus() {
        let host: Arc<dyn SessionHost> = Arc::new(SubprocessSessionHost::new());
        let bus = Arc::new(EventBus::default());
        let (tx, mut rx) = mpsc::channel(16);
        let cwd = std::env::current_dir().unwrap();

        let (bus_tx, mut bus_rx) = mpsc::channel(16);
        bus.subscribe(CHANNEL_AGENT_LOGS, move |event| {
            let _ = bus_tx.try_send(event);
        });

        let streamer = LogStreamer::new(host.clone(), bus.clone(), StreamerConfig::default(), tx);
        let handle = host.create_session("a1", &cat_config(), "", &cwd).await.unwrap();
        streamer.start_stream(handle.clone()).await.unwrap();

        host.send_instructions(&handle, "PRP-007 [bb] blocker: missing token").await.unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal within timeout")
            .expect("channel open");
        assert_eq!(signal.kind, agentmux_types::SignalKind::Bb);
        assert_eq!(signal.priority, 9);

        let evt = tokio::time::timeout(Duration::from_secs(2), bus_rx.recv())
            .await
            .expect("bus event within timeout")
            .expect("channel open");
        assert_eq!(evt.name, "streaming:started");

        streamer.shutdown().await;
        host.terminate_session(&handle, "test done").await.ok();
    }

    #[tokio::test]
    async fn starting_an_already_tracked_session_errors() {
        let host: Arc<dyn SessionHost> = Arc::new(SubprocessSessionHost::new());
        let bus = Arc::new(EventBus::default());
        let (tx, _rx) = mpsc::channel(16);
        let cwd = std::env::current_dir().unwrap();

        let mut cfg = StreamerConfig::default();
        cfg.auto_discovery = false;
        let streamer = LogStreamer::new(host.clone(), bus, cfg, tx);
        let handle = host.create_session("a1", &cat_config(), "", &cwd).await.unwrap();
        streamer.start_stream(handle.clone()).await.unwrap();

        assert!(matches!(
            streamer.start_stream(handle).await,
            Err(LogStreamError::AlreadyStreaming(_))
        ));
    }
}
