//! Terminal-multiplexer-backed `SessionHost` seam.
//!
//! Spec §1 Non-goals exclude "the terminal-multiplexer driver itself
//! (treated as an abstract session host)" — the real pane/window management
//! of a tool such as tmux is not this crate's concern. What the orchestration
//! core does depend on is the *contract* such a driver must satisfy, so this
//! module defines `MuxDriver` as that seam and `MuxBackedSessionHost` as a
//! thin adapter from `MuxDriver` to `SessionHost`, mirroring the way
//! `toka-agent-runtime::AgentProcessManager`
//! (`examples/scrappyAI-Toka/crates/toka-agent-runtime/src/process.rs`)
//! separates "own the child process" from "drive the agent protocol over
//! it". A real mux integration plugs in by implementing `MuxDriver`; none is
//! provided here.

use std::path::Path;

use async_trait::async_trait;

use agentmux_types::AgentConfig;

use crate::{two_phase_terminate, OutputLines, SessionHandle, SessionHost, SessionHostError};

/// Operations a concrete terminal-multiplexer integration must provide.
///
/// Deliberately narrower than `SessionHost`: a driver only needs to know how
/// to manage panes/windows, not how the two-phase termination contract is
/// sequenced (that's handled once, in `MuxBackedSessionHost`, on top of any
/// conforming driver).
#[async_trait]
pub trait MuxDriver: Send + Sync {
    /// Create a new pane/window running `config.run_command` under `cwd`,
    /// returning the multiplexer-local identifier for it.
    async fn open_pane(
        &self,
        agent_id: &str,
        config: &AgentConfig,
        cwd: &Path,
    ) -> Result<String, SessionHostError>;

    /// Send a single line of input to the given pane.
    async fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), SessionHostError>;

    /// List every pane id this driver currently owns.
    async fn list_panes(&self) -> Vec<String>;

    /// Subscribe to a pane's output, observed in emission order.
    fn capture_pane(&self, pane_id: &str) -> Result<OutputLines, SessionHostError>;

    /// Forcefully close a pane, bypassing any graceful protocol.
    async fn kill_pane(&self, pane_id: &str) -> Result<(), SessionHostError>;
}

/// Adapts any `MuxDriver` into a `SessionHost`, applying the shared
/// two-phase termination contract on top of it.
pub struct MuxBackedSessionHost<D: MuxDriver> {
    driver: D,
}

impl<D: MuxDriver> MuxBackedSessionHost<D> {
    /// Wrap `driver` as a conforming `SessionHost`.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl<D: MuxDriver> SessionHost for MuxBackedSessionHost<D> {
    async fn create_session(
        &self,
        agent_id: &str,
        config: &AgentConfig,
        instructions: &str,
        cwd: &Path,
    ) -> Result<SessionHandle, SessionHostError> {
        let pane_id = self.driver.open_pane(agent_id, config, cwd).await?;
        if !instructions.is_empty() {
            self.driver.send_keys(&pane_id, instructions).await?;
        }
        Ok(SessionHandle { session_id: pane_id, agent_id: agent_id.to_string() })
    }

    async fn send_instructions(
        &self,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<(), SessionHostError> {
        self.driver.send_keys(&handle.session_id, text).await
    }

    async fn list_sessions(&self) -> Vec<SessionHandle> {
        self.driver
            .list_panes()
            .await
            .into_iter()
            .map(|pane_id| SessionHandle { session_id: pane_id, agent_id: String::new() })
            .collect()
    }

    async fn terminate_session(
        &self,
        handle: &SessionHandle,
        reason: &str,
    ) -> Result<(), SessionHostError> {
        two_phase_terminate(self, handle, reason).await?;
        self.driver.kill_pane(&handle.session_id).await
    }

    fn read_output(&self, handle: &SessionHandle) -> Result<OutputLines, SessionHostError> {
        self.driver.capture_pane(&handle.session_id)
    }
}
