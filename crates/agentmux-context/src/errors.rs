//! Context Manager error kinds (spec §4.G, §7 error table).

use agentmux_types::ContextConflict;

/// Errors raised by `ContextManager` operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// `update_context` targeted an unknown section with no `content` to
    /// create it from.
    #[error("context section {0} does not exist and no content was given to create it")]
    MissingInitialContent(String),
    /// No section is registered under this id.
    #[error("unknown context section {0}")]
    UnknownSection(String),
    /// `rollback_context` named a version not present in the section's
    /// bounded history.
    #[error("context section {0} has no retained version {1}")]
    UnknownVersion(String, u64),
    /// A `content` conflict was detected and the update carried no
    /// `resolution` to settle it.
    #[error("context section {0} has a {1:?} conflict that needs accept|reject|merge")]
    ConflictRequiresResolution(String, ContextConflict),
}
