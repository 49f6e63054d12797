//! Auto-discovery loop: periodically enumerate the Session Host, start
//! streams for newly-visible agent-like sessions, stop streams for ones
//! that disappeared (spec §4.C "Session discovery").
//!
//! Grounded on `toka-agent-runtime::process::AgentProcessManager::monitor_agents`'s
//! periodic-poll shape (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`).

use std::sync::Arc;

use tracing::{debug, info};

use crate::LogStreamer;

/// Return `true` if `session_id` or `agent_id` contains any of `markers`.
/// Empty `markers` matches everything — callers that set
/// `agent_name_markers: []` intend to stream every discovered session.
pub(crate) fn is_agent_like(session_id: &str, agent_id: &str, markers: &[String]) -> bool {
    if markers.is_empty() {
        return true;
    }
    markers.iter().any(|m| session_id.contains(m.as_str()) || agent_id.contains(m.as_str()))
}

/// Spawn the periodic discovery task for `streamer`. Runs until the
/// returned handle is aborted (the streamer's `shutdown` does this).
pub(crate) fn spawn_discovery_loop(streamer: Arc<LogStreamer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(streamer.config.monitor_interval());
        loop {
            interval.tick().await;
            run_discovery_pass(&streamer).await;
        }
    })
}

async fn run_discovery_pass(streamer: &LogStreamer) {
    let live = streamer.session_host.list_sessions().await;
    let live_ids: std::collections::HashSet<String> =
        live.iter().map(|h| h.session_id.clone()).collect();

    for handle in &live {
        if streamer.streams.contains_key(&handle.session_id) {
            continue;
        }
        if !is_agent_like(&handle.session_id, &handle.agent_id, &streamer.config.agent_name_markers) {
            continue;
        }
        debug!(session_id = %handle.session_id, "auto-discovered agent-like session");
        if let Err(e) = streamer.start_stream(handle.clone()).await {
            debug!(session_id = %handle.session_id, error = %e, "failed to start discovered stream");
        }
    }

    let gone: Vec<String> = streamer
        .streams
        .iter()
        .map(|e| e.key().clone())
        .filter(|id| !live_ids.contains(id))
        .collect();
    for session_id in gone {
        info!(session_id = %session_id, "session disappeared, stopping stream");
        streamer.stop_stream(&session_id, "session no longer present").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_markers_matches_everything() {
        assert!(is_agent_like("whatever", "", &[]));
    }

    #[test]
    fn marker_must_appear_in_session_or_agent_id() {
        let markers = vec!["agent".to_string()];
        assert!(is_agent_like("agent-7", "", &markers));
        assert!(is_agent_like("sess-1", "agent-7", &markers));
        assert!(!is_agent_like("shell-1", "human", &markers));
    }
}
