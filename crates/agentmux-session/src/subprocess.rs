//! Plain-subprocess `SessionHost` backend (spec §4.D fallback backend).
//!
//! Generalized from `toka-agent-runtime::process::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`),
//! which owns a `DashMap` of running processes keyed by agent id and pairs
//! each with a `tokio::task::JoinHandle`. Here the map is keyed by session
//! id (an agent may hold more than one session across its lifetime) and the
//! background task is the stdout line pump rather than the whole agent loop.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument, warn};

use agentmux_types::AgentConfig;

use crate::{
    build_command, send_sigterm, spawn_line_pump, two_phase_terminate, LiveSession, OutputLines,
    SessionHandle, SessionHost, SessionHostError, SIGTERM_FOLLOWUP_GRACE,
};

/// Output broadcast ring capacity; generous enough that the Log Streamer
/// (the sole expected subscriber) never lags under normal load.
const OUTPUT_RING_CAPACITY: usize = 1024;

/// `SessionHost` backed by plain OS subprocesses with piped stdio.
pub struct SubprocessSessionHost {
    sessions: DashMap<String, LiveSession>,
}

impl Default for SubprocessSessionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessSessionHost {
    /// Construct an empty host.
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }
}

#[async_trait]
impl SessionHost for SubprocessSessionHost {
    #[instrument(skip(self, config, instructions), fields(agent_id = %agent_id))]
    async fn create_session(
        &self,
        agent_id: &str,
        config: &AgentConfig,
        instructions: &str,
        cwd: &Path,
    ) -> Result<SessionHandle, SessionHostError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut cmd = build_command(config, cwd).map_err(|source| SessionHostError::SpawnFailed {
            agent_id: agent_id.to_string(),
            source,
        })?;

        let mut child = cmd.spawn().map_err(|source| SessionHostError::SpawnFailed {
            agent_id: agent_id.to_string(),
            source,
        })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stdin = child.stdin.take().expect("piped stdin");
        let (tx, _rx) = broadcast::channel(OUTPUT_RING_CAPACITY);
        spawn_line_pump(session_id.clone(), stdout, tx.clone());

        self.sessions.insert(
            session_id.clone(),
            LiveSession {
                agent_id: agent_id.to_string(),
                child: Mutex::new(child),
                stdin: Mutex::new(stdin),
                output_tx: tx,
                spawned_at: Utc::now(),
            },
        );

        if !instructions.is_empty() {
            let handle = SessionHandle { session_id: session_id.clone(), agent_id: agent_id.to_string() };
            self.send_instructions(&handle, instructions).await?;
        }

        info!(session_id = %session_id, "subprocess session spawned");
        Ok(SessionHandle { session_id, agent_id: agent_id.to_string() })
    }

    async fn send_instructions(
        &self,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<(), SessionHostError> {
        let entry = self
            .sessions
            .get(&handle.session_id)
            .ok_or_else(|| SessionHostError::UnknownSession(handle.session_id.clone()))?;
        let mut stdin = entry.stdin.lock().await;
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        use tokio::io::AsyncWriteExt;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|source| SessionHostError::SendFailed { session_id: handle.session_id.clone(), source })?;
        Ok(())
    }

    async fn list_sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| SessionHandle {
                session_id: entry.key().clone(),
                agent_id: entry.agent_id.clone(),
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn terminate_session(
        &self,
        handle: &SessionHandle,
        reason: &str,
    ) -> Result<(), SessionHostError> {
        two_phase_terminate(self, handle, reason).await?;

        let entry = self
            .sessions
            .remove(&handle.session_id)
            .ok_or_else(|| SessionHostError::UnknownSession(handle.session_id.clone()))?;
        let mut child = entry.1.child.into_inner();

        if let Err(e) = send_sigterm(&child) {
            warn!(session_id = %handle.session_id, error = %e, "SIGTERM failed, forcing kill");
        } else if tokio::time::timeout(SIGTERM_FOLLOWUP_GRACE, child.wait()).await.is_ok() {
            info!(session_id = %handle.session_id, "session exited after SIGTERM");
            return Ok(());
        }

        match child.start_kill() {
            Ok(()) => {
                let _ = child.wait().await;
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %handle.session_id, error = %e, "force-kill failed");
                Err(SessionHostError::TerminationFailed(handle.session_id.clone()))
            }
        }
    }

    fn read_output(&self, handle: &SessionHandle) -> Result<OutputLines, SessionHostError> {
        let entry = self
            .sessions
            .get(&handle.session_id)
            .ok_or_else(|| SessionHostError::UnknownSession(handle.session_id.clone()))?;
        Ok(OutputLines(entry.output_tx.subscribe()))
    }
}
