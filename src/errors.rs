//! Error types for the crewlink delegation engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task exists under the given id.
    #[error("task not found: {task_id}")]
    NotFound { task_id: Uuid },
}

/// Errors surfaced synchronously to an agent invoking the delegation tool.
#[derive(Debug, Error)]
pub enum DelegationError {
    /// Self-delegation, delegation to an ancestor in the task's own chain,
    /// or delegation attempted in a pool with fewer than two eligible agents.
    #[error("invalid delegation by '{agent_id}': {reason}")]
    InvalidDelegation { agent_id: String, reason: String },

    /// The delegation chain passed the configured depth cap.
    #[error("delegation depth {depth} exceeds the configured cap of {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    /// Underlying store error (the delegating task vanished mid-call).
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport-level failure delivering a final answer.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No channel implementation registered for the requested kind.
    #[error("no channel registered for kind '{kind}'")]
    UnroutableChannel { kind: String },

    /// The channel requires a routing token and none was present.
    #[error("missing or invalid routing token for channel '{kind}': {detail}")]
    BadRoutingToken { kind: String, detail: String },

    /// The underlying transport reported a send failure.
    #[error("send failed: {message}")]
    SendFailed { message: String },
}

/// Errors from the orchestrator service surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The named agent is not registered in this pool.
    #[error("unknown agent: {agent_id}")]
    UnknownAgent { agent_id: String },

    /// The agent is registered but its runner loop is gone.
    #[error("agent '{agent_id}' is no longer accepting input")]
    AgentUnavailable { agent_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Error returned by an agent's reasoning turn.
///
/// The reasoning layer itself is outside this crate; this is the shape its
/// failures take when they cross the boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent turn failed: {message}")]
    TurnFailed { message: String },
}
