//! Delivery as a reply to the originating email thread.

use std::sync::Arc;

use async_trait::async_trait;

use super::Channel;
use crate::errors::DeliveryError;
use crate::task::ChannelKind;

/// The mail transport boundary. Actual SMTP/IMAP plumbing lives outside
/// this crate.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send `body` as a reply to `to_address`.
    async fn reply(&self, to_address: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Replies to the sender address carried as the routing token.
pub struct EmailChannel {
    transport: Arc<dyn EmailTransport>,
}

impl EmailChannel {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        routing_token: Option<&str>,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let to_address = routing_token.ok_or_else(|| DeliveryError::BadRoutingToken {
            kind: ChannelKind::Email.to_string(),
            detail: "reply address required".into(),
        })?;
        self.transport.reply(to_address, content).await
    }
}
