use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use havitush_core::domain::conversation::PhoneNumber;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: PhoneNumber,
    pub text: String,
    /// WhatsApp id of the inbound message being answered.
    pub in_reply_to: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("delivery transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError>;
}

/// Collects outbound messages in memory. Used by the `chat` command and tests.
#[derive(Clone, Default)]
pub struct OutboxSender {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl OutboxSender {
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn last(&self) -> Option<OutboundMessage> {
        self.sent.lock().await.last().cloned()
    }
}

#[async_trait]
impl MessageSender for OutboxSender {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSender;

#[async_trait]
impl MessageSender for TracingSender {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        info!(
            event_name = "delivery.message_sent",
            correlation_id = %message.correlation_id,
            phone = %message.to.masked(),
            in_reply_to = %message.in_reply_to,
            chars = message.text.chars().count(),
            "outbound message handed to log transport"
        );
        Ok(())
    }
}
