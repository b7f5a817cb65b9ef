//! Delivery as a direct message over a decentralized transport.
//!
//! Encryption and peer discovery belong to the transport implementation;
//! this channel only carries the send contract.

use std::sync::Arc;

use async_trait::async_trait;

use super::Channel;
use crate::errors::DeliveryError;
use crate::task::ChannelKind;

/// The peer-to-peer transport boundary.
#[async_trait]
pub trait P2pTransport: Send + Sync {
    /// Send an encrypted direct message to the peer.
    async fn send_direct(&self, peer_id: &str, content: &str) -> Result<(), DeliveryError>;
}

/// Routes final answers to the peer id carried as the routing token.
pub struct P2pChannel {
    transport: Arc<dyn P2pTransport>,
}

impl P2pChannel {
    pub fn new(transport: Arc<dyn P2pTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Channel for P2pChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::P2p
    }

    async fn send(
        &self,
        routing_token: Option<&str>,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let peer_id = routing_token.ok_or_else(|| DeliveryError::BadRoutingToken {
            kind: ChannelKind::P2p.to_string(),
            detail: "peer id required".into(),
        })?;
        self.transport.send_direct(peer_id, content).await
    }
}
