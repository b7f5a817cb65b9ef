//! The unit of delegated work.
//!
//! A `Task` tracks one request assigned to one agent, its position in the
//! delegation chain (via `parent_task_id`), and the count of outstanding
//! child delegations it is waiting on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The external destination type a root task's final answer is delivered to.
///
/// Closed variant set: the channel router holds one implementation per kind,
/// so the dispatcher never branches on concrete delivery mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Push over an open session connection (e.g. WebSocket by session id).
    Ui,
    /// Reply to the sender address of the originating mail.
    Email,
    /// Encrypted direct message over a decentralized transport.
    P2p,
    /// Enqueue onto a durable queue consumed by an orchestrator instance
    /// running in a different process and datastore.
    ParentOrchestrator,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Ui => write!(f, "ui"),
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::P2p => write!(f, "p2p"),
            ChannelKind::ParentOrchestrator => write!(f, "parent_orchestrator"),
        }
    }
}

/// Lifecycle state of a task.
///
/// `Running -> (Delegating | Reporting)` and back to `Running` on resumption;
/// the terminal "deleted" state is represented by removal from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// The task's agent is actively reasoning (or queued for a turn).
    Running,
    /// The agent invoked the delegation tool this turn; output is suspended
    /// until the children's results return.
    Delegating,
    /// The task produced a final answer and is reporting upward or outward.
    Reporting,
    /// Final-answer delivery failed past the retry budget. The record is
    /// retained so the staleness sweep can find it.
    Failed,
}

/// A unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Originating identity (a user, a session, or a delegating agent).
    pub requester: String,
    /// Channel type the final answer is routed through when this is a root task.
    pub requester_channel: ChannelKind,
    /// The text of the triggering request. Immutable after creation.
    pub original_request: String,
    /// Identifier of the agent this task is assigned to.
    pub delegated_to: String,
    /// `None` for root tasks; otherwise the task that created this one.
    /// A lookup key into the store, never an owning reference.
    pub parent_task_id: Option<Uuid>,
    /// Count of outstanding children this task is waiting on. Never negative.
    pub pending_delegations: u32,
    /// Channel-specific routing token (WebSocket session id, reply address,
    /// peer id, or the originating task id for cross-process reports). Only
    /// needed by channels that require one to deliver the final answer.
    pub routing_token: Option<String>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Creation timestamp, used by the staleness sweep.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Whether this task has no parent and therefore reports to an external
    /// channel instead of another agent.
    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task({}, agent={}, channel={}, pending={})",
            self.id, self.delegated_to, self.requester_channel, self.pending_delegations
        )
    }
}
