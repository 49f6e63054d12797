//! Per-session streaming state machine, ring buffer, and line pipeline
//! (spec §4.C: "starting → active → (draining → stopped) | errored").
//!
//! Grounded on `toka-agent-runtime::process::AgentProcessManager::monitor_agents`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`) for
//! the shape of a periodically-polled collection of per-agent state, and on
//! `toka-agent-runtime::RuntimeStats` for the metrics-snapshot convention.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{instrument, warn};

use agentmux_bus::{BusEvent, EventBus, CHANNEL_AGENT_LOGS};
use agentmux_session::{OutputLines, SessionHandle};
use agentmux_types::{LogEntry, LogLevel, Signal};

use crate::classify::classify_level;
use crate::config::StreamerConfig;
use crate::detector::detect;

/// Lifecycle state of a single session's stream (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// The reading task has been spawned but has not yet observed a line.
    Starting,
    /// Actively pumping lines.
    Active,
    /// The session closed; buffer retained for the drain grace period.
    Draining,
    /// Fully torn down; buffer dropped.
    Stopped,
    /// The reading task exited on an I/O error.
    Errored,
}

/// Metrics reported alongside `streaming:started/stopped/error` events.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Lines observed since the stream started.
    pub line_count: u64,
    /// Signals detected since the stream started.
    pub signals_detected: u64,
    /// Errors encountered while reading.
    pub errors: u64,
}

/// Handle to one live (or draining) per-session stream.
pub struct SessionStream {
    pub(crate) handle: SessionHandle,
    pub(crate) state: RwLock<StreamState>,
    pub(crate) buffer: RwLock<VecDeque<LogEntry>>,
    pub(crate) next_entry_id: AtomicU64,
    pub(crate) line_count: AtomicU64,
    pub(crate) signals_detected: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) started_at: chrono::DateTime<Utc>,
}

impl SessionStream {
    fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            state: RwLock::new(StreamState::Starting),
            buffer: RwLock::new(VecDeque::new()),
            next_entry_id: AtomicU64::new(0),
            line_count: AtomicU64::new(0),
            signals_detected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> StreamState {
        *self.state.read().await
    }

    /// Snapshot of this stream's ring buffer, oldest first.
    pub async fn buffered_entries(&self) -> Vec<LogEntry> {
        self.buffer.read().await.iter().cloned().collect()
    }

    /// Metrics snapshot (spec §4.C: duration, lineCount, signalsDetected,
    /// errors).
    pub fn metrics(&self) -> StreamMetrics {
        StreamMetrics {
            line_count: self.line_count.load(Ordering::Relaxed),
            signals_detected: self.signals_detected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    async fn set_state(&self, state: StreamState) {
        *self.state.write().await = state;
    }
}

/// Spawn the background task that pumps `output` through the classify →
/// detect → ring-buffer → publish pipeline for one session, until the
/// output closes or a hard error occurs.
#[instrument(skip(stream, output, bus, signal_tx, config))]
pub(crate) fn spawn_stream_pump(
    stream: Arc<SessionStream>,
    agent_id: String,
    mut output: OutputLines,
    bus: Arc<EventBus>,
    signal_tx: mpsc::Sender<Signal>,
    config: StreamerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        stream.set_state(StreamState::Active).await;
        publish_lifecycle(&bus, "streaming:started", &stream, &agent_id);

        loop {
            match output.next_line().await {
                Some(raw) => {
                    process_line(&stream, &agent_id, &raw, &bus, &signal_tx, &config).await;
                }
                None => break,
            }
        }

        stream.set_state(StreamState::Draining).await;
        publish_lifecycle(&bus, "streaming:stopped", &stream, &agent_id);
        tokio::time::sleep(config.drain_grace()).await;
        stream.buffer.write().await.clear();
        stream.set_state(StreamState::Stopped).await;
    })
}

async fn process_line(
    stream: &SessionStream,
    agent_id: &str,
    raw: &str,
    bus: &EventBus,
    signal_tx: &mpsc::Sender<Signal>,
    config: &StreamerConfig,
) {
    let truncated: String = if raw.chars().count() > config.max_log_line_length {
        raw.chars().take(config.max_log_line_length).collect()
    } else {
        raw.to_string()
    };

    let level = classify_level(&truncated);
    let id = stream.next_entry_id.fetch_add(1, Ordering::Relaxed);
    stream.line_count.fetch_add(1, Ordering::Relaxed);

    let detections = detect(&truncated);
    let detected_kinds = detections.iter().map(|d| d.kind).collect();

    {
        let mut buf = stream.buffer.write().await;
        if buf.len() >= config.buffer_size {
            buf.pop_front();
        }
        buf.push_back(LogEntry {
            id,
            timestamp: Utc::now(),
            level,
            content: truncated.clone(),
            detected_signals: detected_kinds,
        });
    }

    if level >= LogLevel::Error {
        stream.errors.fetch_add(1, Ordering::Relaxed);
    }

    for d in detections {
        stream.signals_detected.fetch_add(1, Ordering::Relaxed);
        let mut payload = std::collections::HashMap::new();
        payload.insert("context".to_string(), json!(d.context));
        payload.insert("confidence".to_string(), json!(d.confidence));

        let source = format!("agent:{agent_id}");
        let signal = match Signal::new(d.kind, d.priority, source, payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "dropping malformed detected signal");
                continue;
            }
        };

        bus.publish(
            CHANNEL_AGENT_LOGS,
            BusEvent::new(
                CHANNEL_AGENT_LOGS,
                "signal_detected",
                serde_json::to_value(&signal).unwrap_or(serde_json::Value::Null),
            ),
        );

        if signal_tx.send(signal).await.is_err() {
            warn!("orchestrator signal queue closed, dropping detected signal");
        }
    }
}

fn publish_lifecycle(bus: &EventBus, name: &str, stream: &SessionStream, agent_id: &str) {
    let metrics = stream.metrics();
    bus.publish(
        CHANNEL_AGENT_LOGS,
        BusEvent::new(
            CHANNEL_AGENT_LOGS,
            name,
            json!({
                "sessionId": stream.handle.session_id,
                "agentId": agent_id,
                "durationMs": (Utc::now() - stream.started_at).num_milliseconds(),
                "lineCount": metrics.line_count,
                "signalsDetected": metrics.signals_detected,
                "errors": metrics.errors,
            }),
        ),
    );
}

pub(crate) fn new_session_stream(handle: SessionHandle) -> Arc<SessionStream> {
    Arc::new(SessionStream::new(handle))
}
