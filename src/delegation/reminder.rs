//! Re-injectable context for stateless agents.
//!
//! Agents keep no state between turns, so everything an agent needs to
//! resume reasoning after an asynchronous round-trip is reconstructed into
//! an explicit, versioned structure and rendered to text at the reasoning
//! boundary. Keeping the structure serializable makes context
//! reconstruction testable without any model call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::{DelegationContext, DelegationEntry, ResponseEntry};

/// Version tag carried by every serialized reminder. Bump on any change to
/// the reminder's shape or rendered layout.
pub const CONTEXT_REMINDER_VERSION: u32 = 1;

/// Restatement of the original request plus the full delegation/response
/// history of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextReminder {
    /// Serialization format version.
    pub version: u32,
    /// The task being resumed.
    pub task_id: Uuid,
    pub original_request: String,
    pub requester: String,
    pub delegations: Vec<DelegationEntry>,
    pub responses: Vec<ResponseEntry>,
}

impl ContextReminder {
    pub fn from_context(task_id: Uuid, context: &DelegationContext) -> Self {
        Self {
            version: CONTEXT_REMINDER_VERSION,
            task_id,
            original_request: context.original_request.clone(),
            requester: context.requester.clone(),
            delegations: context.delegations.clone(),
            responses: context.responses.clone(),
        }
    }

    /// Render the reminder as text for the agent reasoning layer.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "You are resuming work on a request you previously delegated parts of.".to_string(),
            format!("Original request (from {}): {}", self.requester, self.original_request),
        ];

        if !self.delegations.is_empty() {
            lines.push(String::new());
            lines.push("Delegations you issued:".to_string());
            for (i, d) in self.delegations.iter().enumerate() {
                lines.push(format!(
                    "  {}. to {} [task {}]: {}",
                    i + 1,
                    d.delegated_to,
                    d.child_task_id,
                    d.message
                ));
            }
        }

        if !self.responses.is_empty() {
            lines.push(String::new());
            lines.push("Responses received so far:".to_string());
            for (i, r) in self.responses.iter().enumerate() {
                lines.push(format!(
                    "  {}. from {} [task {}]: {}",
                    i + 1,
                    r.from_agent,
                    r.child_task_id,
                    r.response
                ));
            }
        }

        lines.join("\n")
    }
}

/// The combined set of child responses handed to a parent once its
/// pending-delegation count reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// The parent task the report is for.
    pub parent_task_id: Uuid,
    /// Every response recorded since the parent's context was created,
    /// tagged per originating child.
    pub responses: Vec<ResponseEntry>,
}

impl AggregatedReport {
    /// Render the report as the message that resumes the parent's turn.
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "All {} delegated task(s) have completed. Results:",
            self.responses.len()
        )];
        for r in &self.responses {
            lines.push(String::new());
            lines.push(format!("[from {} / task {}]", r.from_agent, r.child_task_id));
            lines.push(r.response.clone());
        }
        lines.join("\n")
    }
}
