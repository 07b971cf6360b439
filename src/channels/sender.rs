//! Outbound contracts used by the bridge logic.
//!
//! The converter and the confirmation manager never see a socket. They
//! talk to a [`GroupSender`] (IM side) and a [`HubPublisher`] (hub side),
//! which makes both trivially replaceable in tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channels::connection::ConnectionManager;
use crate::error::TransportError;
use crate::protocol::{CanonicalMessage, SendGroupMessage};

/// Sends plain text into one IM group.
#[async_trait]
pub trait GroupSender: Send + Sync {
    async fn send_group_message(&self, group_id: i64, message: &str)
    -> Result<(), TransportError>;
}

/// Publishes canonical messages to the hub.
#[async_trait]
pub trait HubPublisher: Send + Sync {
    async fn publish(&self, message: &CanonicalMessage) -> Result<(), TransportError>;
}

/// [`GroupSender`] backed by the OneBot connection.
pub struct OneBotSender {
    connection: Arc<ConnectionManager>,
}

impl OneBotSender {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl GroupSender for OneBotSender {
    async fn send_group_message(
        &self,
        group_id: i64,
        message: &str,
    ) -> Result<(), TransportError> {
        let action = SendGroupMessage::new(group_id, message);
        self.connection.send(&action).await?;
        tracing::debug!(group_id, echo = action.echo(), "Sent group message");
        Ok(())
    }
}

#[async_trait]
impl HubPublisher for ConnectionManager {
    async fn publish(&self, message: &CanonicalMessage) -> Result<(), TransportError> {
        self.send(message).await?;
        tracing::debug!(
            kind = message.content.kind(),
            correlation_id = %message.correlation_id,
            "Published to hub"
        );
        Ok(())
    }
}
