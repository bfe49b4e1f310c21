use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use havitush_core::domain::conversation::PhoneNumber;

use crate::pipeline::PipelineError;

pub const DEFAULT_CONVERSATION_ID: i64 = 1;

/// Webhook payload as received, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub whatsapp_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
}

impl InboundMessage {
    pub fn text(from_number: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from_number: Some(from_number.into()),
            message_type: Some("text".to_string()),
            whatsapp_id: Some(format!("local-{}", uuid::Uuid::new_v4())),
            text: Some(text.into()),
            conversation_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Voice,
    Other(String),
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "voice" | "audio" => Self::Voice,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Voice => f.write_str("voice"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedMessage {
    pub phone_number: PhoneNumber,
    pub message_type: MessageType,
    pub whatsapp_id: String,
    pub text: Option<String>,
    pub conversation_id: i64,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, PipelineError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(PipelineError::MissingField(field))
}

/// Checks required fields and normalises the sender number.
pub fn validate(message: &InboundMessage) -> Result<ValidatedMessage, PipelineError> {
    let from_number = required(&message.from_number, "from_number")?;
    let message_type = MessageType::from(required(&message.message_type, "type")?);
    let whatsapp_id = required(&message.whatsapp_id, "whatsapp_id")?.to_string();

    let text = match message_type {
        MessageType::Text => Some(required(&message.text, "text")?.to_string()),
        _ => message.text.clone(),
    };

    let phone_number = PhoneNumber::parse(from_number)
        .map_err(|_| PipelineError::InvalidPhoneNumber(from_number.to_string()))?;

    let conversation_id = match message.conversation_id {
        Some(id) => id,
        None => {
            warn!(
                event_name = "pipeline.conversation_id_defaulted",
                whatsapp_id = %whatsapp_id,
                default = DEFAULT_CONVERSATION_ID,
                "conversation_id missing; using default"
            );
            DEFAULT_CONVERSATION_ID
        }
    };

    info!(
        event_name = "pipeline.message_validated",
        phone = %phone_number.masked(),
        message_type = %message_type,
        whatsapp_id = %whatsapp_id,
        conversation_id,
        "inbound message validated"
    );

    Ok(ValidatedMessage { phone_number, message_type, whatsapp_id, text, conversation_id })
}
