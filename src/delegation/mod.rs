//! Delegation context lifecycle.
//!
//! The manager owns creation, update, and deletion of per-task delegation
//! history. Deletion has no standalone operation here: a context is removed
//! only when the store removes its owning task, so the two can never
//! diverge.

pub mod context;
pub mod reminder;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::TaskStore;

use context::{DelegationContext, DelegationEntry, ResponseEntry};
use reminder::ContextReminder;

/// Outcome of recording a child's response into its parent's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The response was appended.
    Recorded,
    /// A response from this child was already present; nothing was written.
    /// Duplicates are expected under at-least-once cross-process delivery.
    Duplicate,
    /// The parent task or its context no longer exists. The response is
    /// dropped with a warning: the parent that would have consumed it is
    /// gone, and availability wins over guaranteed delivery here.
    Orphaned,
}

/// Accumulates delegation/response history per root-to-leaf chain.
#[derive(Debug)]
pub struct DelegationContextManager {
    store: Arc<TaskStore>,
}

impl DelegationContextManager {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Lazily create the task's context on first use; later calls return a
    /// snapshot of the existing one.
    pub fn get_or_create_context(&self, task_id: Uuid) -> Result<DelegationContext, StoreError> {
        self.store
            .with_record_mut(task_id, |record| {
                record
                    .context
                    .get_or_insert_with(|| DelegationContext::for_task(&record.task))
                    .clone()
            })
            .ok_or(StoreError::NotFound { task_id })
    }

    /// Append a delegation entry and bump the owner's pending count, as one
    /// atomic step under the record's lock. Returns the new pending count.
    pub fn record_delegation(
        &self,
        task_id: Uuid,
        child_task_id: Uuid,
        delegated_to: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<u32, StoreError> {
        self.store
            .with_record_mut(task_id, |record| {
                let context = record
                    .context
                    .get_or_insert_with(|| DelegationContext::for_task(&record.task));
                context.delegations.push(DelegationEntry {
                    child_task_id,
                    delegated_to: delegated_to.into(),
                    message: message.into(),
                    timestamp: Utc::now(),
                });
                record.task.pending_delegations += 1;
                record.task.pending_delegations
            })
            .ok_or(StoreError::NotFound { task_id })
    }

    /// Append a child's response to the owner's context.
    ///
    /// Idempotent per `child_task_id`. Recording against a missing task or
    /// context is not an error; see [`RecordOutcome::Orphaned`].
    pub fn record_response(
        &self,
        task_id: Uuid,
        child_task_id: Uuid,
        from_agent: impl Into<String>,
        response: impl Into<String>,
    ) -> RecordOutcome {
        let outcome = self.store.with_record_mut(task_id, |record| {
            let Some(context) = record.context.as_mut() else {
                return RecordOutcome::Orphaned;
            };
            if context.has_response_from(child_task_id) {
                debug!(%task_id, %child_task_id, "duplicate response ignored");
                return RecordOutcome::Duplicate;
            }
            context.responses.push(ResponseEntry {
                child_task_id,
                from_agent: from_agent.into(),
                response: response.into(),
                completed_at: Utc::now(),
            });
            RecordOutcome::Recorded
        });

        match outcome {
            Some(outcome) => {
                if outcome == RecordOutcome::Orphaned {
                    warn!(%task_id, %child_task_id, "response for task without context; dropping");
                }
                outcome
            }
            None => {
                warn!(%task_id, %child_task_id, "response for deleted task; dropping");
                RecordOutcome::Orphaned
            }
        }
    }

    /// Reconstruct the reminder a resumed agent needs. `None` when the task
    /// is gone or never delegated.
    pub fn render_context_reminder(&self, task_id: Uuid) -> Option<ContextReminder> {
        self.store
            .with_context(task_id, |context| ContextReminder::from_context(task_id, context))
    }
}
