//! Delivery of final answers to external destinations.
//!
//! The router is polymorphic over a fixed variant set of channel kinds; new
//! kinds are added by registering another [`Channel`] implementation, never
//! by branching inside the dispatcher.

pub mod email;
pub mod p2p;
pub mod parent_orchestrator;
pub mod ui;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::errors::DeliveryError;
use crate::task::ChannelKind;

pub use email::{EmailChannel, EmailTransport};
pub use p2p::{P2pChannel, P2pTransport};
pub use parent_orchestrator::{
    InMemoryReportQueue, ParentOrchestratorChannel, ReportEnvelope, ReportQueue,
};
pub use ui::{SessionRegistry, UiChannel};

/// A single external destination type.
///
/// Implementations wrap the excluded transport layer behind the narrow send
/// contract: deliver `content` to wherever `routing_token` points, or fail.
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, routing_token: Option<&str>, content: &str)
        -> Result<(), DeliveryError>;
}

/// Routes a final (non-delegated) result to the correct destination.
pub struct ChannelRouter {
    channels: DashMap<ChannelKind, Arc<dyn Channel>>,
    retry_limit: u32,
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<ChannelKind> = self.channels.iter().map(|e| *e.key()).collect();
        f.debug_struct("ChannelRouter")
            .field("channels", &kinds)
            .field("retry_limit", &self.retry_limit)
            .finish()
    }
}

impl ChannelRouter {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            channels: DashMap::new(),
            retry_limit,
        }
    }

    /// Register an implementation for its kind, replacing any previous one.
    pub fn register(&self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.kind(), channel);
    }

    pub fn is_registered(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    /// Deliver `content` through the channel registered for `kind`.
    ///
    /// A failed send is retried up to the bounded retry limit; the final
    /// failure is returned to the caller, never panicked on.
    pub async fn deliver(
        &self,
        kind: ChannelKind,
        routing_token: Option<&str>,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let channel = self
            .channels
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DeliveryError::UnroutableChannel {
                kind: kind.to_string(),
            })?;

        let mut attempt = 0;
        loop {
            match channel.send(routing_token, content).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(%kind, %err, attempt, "channel send failed; retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport double that fails the first `failures` sends.
    struct FlakyChannel {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Ui
        }

        async fn send(
            &self,
            _routing_token: Option<&str>,
            _content: &str,
        ) -> Result<(), DeliveryError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(DeliveryError::SendFailed {
                    message: "socket closed".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn deliver_without_registration_is_unroutable() {
        let router = ChannelRouter::new(1);
        let err = router
            .deliver(ChannelKind::Email, None, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::UnroutableChannel { .. }));
    }

    #[tokio::test]
    async fn one_transient_failure_is_absorbed_by_the_retry() {
        let router = ChannelRouter::new(1);
        let channel = Arc::new(FlakyChannel {
            failures: 1,
            attempts: AtomicU32::new(0),
        });
        router.register(channel.clone());

        router
            .deliver(ChannelKind::Ui, Some("s-1"), "answer")
            .await
            .unwrap();
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_after_the_retry_budget() {
        let router = ChannelRouter::new(1);
        let channel = Arc::new(FlakyChannel {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
        });
        router.register(channel.clone());

        let err = router
            .deliver(ChannelKind::Ui, Some("s-1"), "answer")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::SendFailed { .. }));
        // Initial attempt plus exactly one retry.
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
    }
}
