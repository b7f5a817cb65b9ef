//! Cross-process reporting to a parent orchestrator.
//!
//! A leaf pool completing a task under this channel serializes the report
//! onto a durable queue that the remote orchestrator polls. Delivery is
//! at-least-once; the consuming side is idempotent per originating task id,
//! so duplicates are harmless.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Channel;
use crate::errors::DeliveryError;
use crate::task::ChannelKind;

/// The wire record a leaf pool enqueues for its parent orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEnvelope {
    /// The parent-side task this report completes. Carried as the routing
    /// token of the leaf pool's root task.
    pub originating_task_id: Uuid,
    /// The final answer text.
    pub content: String,
}

/// Durable queue boundary between processes.
///
/// Production implementations back this with whatever the deployment uses
/// for cross-process messaging; only the enqueue/dequeue contract matters.
#[async_trait]
pub trait ReportQueue: Send + Sync {
    async fn enqueue(&self, envelope: ReportEnvelope) -> Result<(), DeliveryError>;

    /// Pop the next report, or `None` when the queue is currently empty.
    async fn dequeue(&self) -> Option<ReportEnvelope>;
}

/// Queue for tests and single-host deployments where both orchestrators
/// share a process boundary but not a datastore.
#[derive(Debug, Default)]
pub struct InMemoryReportQueue {
    inner: Mutex<VecDeque<ReportEnvelope>>,
}

impl InMemoryReportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl ReportQueue for InMemoryReportQueue {
    async fn enqueue(&self, envelope: ReportEnvelope) -> Result<(), DeliveryError> {
        self.inner.lock().push_back(envelope);
        Ok(())
    }

    async fn dequeue(&self) -> Option<ReportEnvelope> {
        self.inner.lock().pop_front()
    }
}

/// Channel implementation that serializes reports onto the queue.
pub struct ParentOrchestratorChannel {
    queue: Arc<dyn ReportQueue>,
}

impl ParentOrchestratorChannel {
    pub fn new(queue: Arc<dyn ReportQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Channel for ParentOrchestratorChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ParentOrchestrator
    }

    async fn send(
        &self,
        routing_token: Option<&str>,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let token = routing_token.ok_or_else(|| DeliveryError::BadRoutingToken {
            kind: ChannelKind::ParentOrchestrator.to_string(),
            detail: "originating task id required".into(),
        })?;
        let originating_task_id =
            Uuid::parse_str(token).map_err(|e| DeliveryError::BadRoutingToken {
                kind: ChannelKind::ParentOrchestrator.to_string(),
                detail: e.to_string(),
            })?;
        self.queue
            .enqueue(ReportEnvelope {
                originating_task_id,
                content: content.to_string(),
            })
            .await
    }
}
