//! Accumulated delegation history for a single task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::Task;

/// One delegation issued by the owning task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationEntry {
    /// Id of the child task created for this delegation.
    pub child_task_id: Uuid,
    /// Agent the child task was assigned to.
    pub delegated_to: String,
    /// The sub-request text handed to the child.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One completed child's response, recorded as children finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// Id of the child task that produced this response.
    pub child_task_id: Uuid,
    /// Agent that executed the child task.
    pub from_agent: String,
    /// The child's final answer.
    pub response: String,
    pub completed_at: DateTime<Utc>,
}

/// The history an owning agent needs to resume reasoning after an
/// asynchronous round-trip.
///
/// Owned by exactly one task (its creator); created on the task's first
/// delegation and deleted atomically with the task. Both lists are
/// append-only: entries are never rewritten or removed while the owning
/// task lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationContext {
    /// Copied from the owning task at creation.
    pub original_request: String,
    /// Copied from the owning task at creation.
    pub requester: String,
    /// Every delegation issued by the owning task, in order.
    pub delegations: Vec<DelegationEntry>,
    /// Every child response received so far, in arrival order.
    pub responses: Vec<ResponseEntry>,
    pub created_at: DateTime<Utc>,
}

impl DelegationContext {
    pub fn for_task(task: &Task) -> Self {
        Self {
            original_request: task.original_request.clone(),
            requester: task.requester.clone(),
            delegations: Vec::new(),
            responses: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether a response from the given child has already been recorded.
    /// This is the idempotence gate for at-least-once report delivery.
    pub fn has_response_from(&self, child_task_id: Uuid) -> bool {
        self.responses
            .iter()
            .any(|r| r.child_task_id == child_task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ChannelKind, TaskState};

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            requester: "user-7".into(),
            requester_channel: ChannelKind::Email,
            original_request: "plan the launch".into(),
            delegated_to: "planner".into(),
            parent_task_id: None,
            pending_delegations: 0,
            routing_token: Some("user-7@example.com".into()),
            state: TaskState::Running,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn context_copies_owning_task_fields() {
        let task = sample_task();
        let ctx = DelegationContext::for_task(&task);
        assert_eq!(ctx.original_request, "plan the launch");
        assert_eq!(ctx.requester, "user-7");
        assert!(ctx.delegations.is_empty());
        assert!(ctx.responses.is_empty());
    }

    #[test]
    fn response_presence_is_keyed_by_child_id() {
        let mut ctx = DelegationContext::for_task(&sample_task());
        let child = Uuid::new_v4();
        assert!(!ctx.has_response_from(child));
        ctx.responses.push(ResponseEntry {
            child_task_id: child,
            from_agent: "writer".into(),
            response: "draft done".into(),
            completed_at: Utc::now(),
        });
        assert!(ctx.has_response_from(child));
        assert!(!ctx.has_response_from(Uuid::new_v4()));
    }
}
