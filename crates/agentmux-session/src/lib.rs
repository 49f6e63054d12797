#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agentmux-session** – Abstract agent session host contract (spec §4.D).
//!
//! The Lifecycle Manager depends only on the five operations the
//! `SessionHost` trait declares; which backend is live (terminal-multiplexer
//! pane vs. plain subprocess) is an implementation detail. The mux driver
//! itself is out of scope (spec §1) — `MuxDriver` here is the abstract seam
//! a real driver would implement, generalized from the way
//! `toka-agent-runtime::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`)
//! spawns and owns `tokio::task::JoinHandle`s per agent, and from
//! `toka-agent-runtime::AgentExecutor`'s two-phase terminate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use agentmux_types::AgentConfig;

pub mod subprocess;
pub mod tmux;

pub use subprocess::SubprocessSessionHost;
pub use tmux::{MuxBackedSessionHost, MuxDriver};

/// Default graceful-termination grace period before a forceful kill
/// (spec §4.D, §4.E item 5).
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Follow-up grace window between SIGTERM and SIGKILL for a subprocess-backed
/// session (spec §4.D: "SIGTERM then SIGKILL or mux-terminate equivalent").
pub const SIGTERM_FOLLOWUP_GRACE: Duration = Duration::from_secs(3);

/// Opaque handle to a live session, returned by `create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Session identifier, unique within the host.
    pub session_id: String,
    /// Owning agent configuration id.
    pub agent_id: String,
}

/// Errors raised by a `SessionHost` implementation.
#[derive(Debug, thiserror::Error)]
pub enum SessionHostError {
    /// The underlying process/pane failed to spawn.
    #[error("failed to spawn session for agent {agent_id}: {source}")]
    SpawnFailed {
        /// Agent the session was being created for.
        agent_id: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// No session exists with the given handle.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// Writing to the session's input failed.
    #[error("failed to send instructions to session {session_id}: {source}")]
    SendFailed {
        /// Session the write was addressed to.
        session_id: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Termination failed at both the graceful and forceful phase.
    #[error("failed to terminate session {0}")]
    TerminationFailed(String),
}

/// An asynchronous iterator over a session's output lines, used by the Log
/// Streamer (spec §4.C). Backed by a broadcast subscription so multiple
/// independent readers can each see every line.
pub struct OutputLines(pub broadcast::Receiver<String>);

impl OutputLines {
    /// Await the next output line, or `None` once the session has closed
    /// and every buffered line has been drained.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.0.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Capability set the core requires of any session backend (spec §4.D).
/// The Lifecycle Manager must not depend on which backend is active beyond
/// these five operations.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Spawn a new session for `agent_id` per `config`, with the given
    /// initial `instructions` and working directory.
    async fn create_session(
        &self,
        agent_id: &str,
        config: &AgentConfig,
        instructions: &str,
        cwd: &Path,
    ) -> Result<SessionHandle, SessionHostError>;

    /// Write a single-line message to the session's input.
    async fn send_instructions(
        &self,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<(), SessionHostError>;

    /// List every session currently tracked by this host.
    async fn list_sessions(&self) -> Vec<SessionHandle>;

    /// Two-phase terminate: send a structured shutdown message, wait up to
    /// `GRACEFUL_SHUTDOWN_TIMEOUT`, then force-terminate.
    async fn terminate_session(
        &self,
        handle: &SessionHandle,
        reason: &str,
    ) -> Result<(), SessionHostError>;

    /// Subscribe to this session's output lines, observed in emission order.
    fn read_output(&self, handle: &SessionHandle) -> Result<OutputLines, SessionHostError>;
}

/// Internal record a concrete host keeps per live session.
pub(crate) struct LiveSession {
    pub agent_id: String,
    pub child: Mutex<Child>,
    pub stdin: Mutex<tokio::process::ChildStdin>,
    pub output_tx: broadcast::Sender<String>,
    pub spawned_at: DateTime<Utc>,
}

/// Spawn a background task that reads `reader` line-by-line and republishes
/// each line on `tx`, preserving emission order (spec §5 ordering
/// guarantees: "per session, log lines are observed in the order emitted").
pub(crate) fn spawn_line_pump<R>(session_id: String, reader: R, tx: broadcast::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let _ = tx.send(line);
                }
                Ok(None) => {
                    debug!(session_id = %session_id, "session output stream closed");
                    break;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "error reading session output");
                    break;
                }
            }
        }
    });
}

/// Registry shared by concrete hosts: maps session id to its live record.
pub(crate) type SessionMap = Arc<DashMap<String, LiveSession>>;

/// Build the argv for spawning `config.run_command` as a `Command`.
pub(crate) fn build_command(config: &AgentConfig, cwd: &Path) -> Result<Command, std::io::Error> {
    let mut it = config.run_command.iter();
    let program = it
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty run_command"))?;
    let mut cmd = Command::new(program);
    cmd.args(it);
    cmd.current_dir(cwd);
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    Ok(cmd)
}

/// Send a SIGTERM-equivalent to `child`'s OS process, falling back to the
/// portable `Child::kill` on non-Unix targets where `nix` signals don't
/// apply.
pub(crate) fn send_sigterm(child: &Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped; nothing to signal.
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
    }
    #[cfg(not(unix))]
    {
        let _ = child;
        Ok(())
    }
}

#[instrument(skip(host))]
async fn two_phase_terminate(
    host: &dyn SessionHost,
    handle: &SessionHandle,
    reason: &str,
) -> Result<(), SessionHostError> {
    let shutdown_msg = format!(
        r#"{{"type":"shutdown","reason":{:?},"timestamp":{}}}"#,
        reason,
        Utc::now().timestamp()
    );
    let _ = host.send_instructions(handle, &shutdown_msg).await;
    tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT).await;
    info!(session_id = %handle.session_id, "graceful window elapsed, forcing termination");
    Ok(())
}
