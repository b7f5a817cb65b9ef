//! Delivery to an open UI session.
//!
//! Sessions are registered while their connection (e.g. a WebSocket) is
//! open; the routing token is the session id.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::Channel;
use crate::errors::DeliveryError;
use crate::task::ChannelKind;

/// Open UI sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and hand back the receiving half the connection
    /// handler drains.
    pub fn register(&self, session_id: impl Into<String>) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(session_id.into(), tx);
        rx
    }

    /// Drop a session when its connection closes.
    pub fn unregister(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn push(&self, session_id: &str, content: &str) -> Result<(), DeliveryError> {
        let sender = self
            .sessions
            .get(session_id)
            .ok_or_else(|| DeliveryError::SendFailed {
                message: format!("no open session '{session_id}'"),
            })?;
        sender
            .send(content.to_string())
            .map_err(|_| DeliveryError::SendFailed {
                message: format!("session '{session_id}' closed"),
            })
    }
}

/// Pushes a final answer over the open session connection.
pub struct UiChannel {
    sessions: Arc<SessionRegistry>,
}

impl UiChannel {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Channel for UiChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Ui
    }

    async fn send(
        &self,
        routing_token: Option<&str>,
        content: &str,
    ) -> Result<(), DeliveryError> {
        let session_id = routing_token.ok_or_else(|| DeliveryError::BadRoutingToken {
            kind: ChannelKind::Ui.to_string(),
            detail: "session id required".into(),
        })?;
        self.sessions.push(session_id, content)
    }
}
