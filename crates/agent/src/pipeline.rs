use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use havitush_core::errors::ApplicationError;

use crate::inbound::{self, InboundMessage, MessageType, ValidatedMessage};
use crate::outbound::{DeliveryError, MessageSender, OutboundMessage};
use crate::runtime::ConversationRuntime;

pub const VOICE_NOT_SUPPORTED_REPLY: &str =
    "אני עדיין לא יכול לעבד הודעות קוליות. אנא שלחו הודעת טקסט בעברית כדי שאוכל לעזור.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("sender `{0}` is not a phone number")]
    InvalidPhoneNumber(String),
    #[error("unsupported message type `{0}`")]
    UnsupportedMessageType(String),
    #[error("unknown pipeline step `{0}`")]
    UnknownStep(String),
    #[error("step `{step}` ran before `{requires}`")]
    OutOfOrder { step: PipelineStep, requires: PipelineStep },
    #[error(transparent)]
    Turn(#[from] ApplicationError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    ValidateMessage,
    ProcessText,
    ProcessVoice,
    SendMessage,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 4] =
        [Self::ValidateMessage, Self::ProcessText, Self::ProcessVoice, Self::SendMessage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateMessage => "ValidateMessage",
            Self::ProcessText => "ProcessText",
            Self::ProcessVoice => "ProcessVoice",
            Self::SendMessage => "SendMessage",
        }
    }

    /// Processing step for a validated message, if the type is handled.
    pub fn for_message_type(message_type: &MessageType) -> Option<Self> {
        match message_type {
            MessageType::Text => Some(Self::ProcessText),
            MessageType::Voice => Some(Self::ProcessVoice),
            MessageType::Other(_) => None,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == value)
            .ok_or_else(|| PipelineError::UnknownStep(value.to_string()))
    }
}

/// Mutable state threaded through the steps of one inbound message.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub correlation_id: String,
    pub inbound: InboundMessage,
    pub validated: Option<ValidatedMessage>,
    pub response_message: Option<String>,
    pub delivered: bool,
}

impl PipelineContext {
    pub fn new(inbound: InboundMessage) -> Self {
        Self::with_correlation_id(inbound, Uuid::new_v4().to_string())
    }

    pub fn with_correlation_id(inbound: InboundMessage, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            inbound,
            validated: None,
            response_message: None,
            delivered: false,
        }
    }

    fn validated(&self, step: PipelineStep) -> Result<&ValidatedMessage, PipelineError> {
        self.validated
            .as_ref()
            .ok_or(PipelineError::OutOfOrder { step, requires: PipelineStep::ValidateMessage })
    }
}

pub struct Pipeline {
    runtime: Arc<ConversationRuntime>,
    sender: Arc<dyn MessageSender>,
}

impl Pipeline {
    pub fn new(runtime: Arc<ConversationRuntime>, sender: Arc<dyn MessageSender>) -> Self {
        Self { runtime, sender }
    }

    pub fn runtime(&self) -> &ConversationRuntime {
        &self.runtime
    }

    /// Validate, process by message type, then deliver the reply.
    pub async fn run(&self, inbound: InboundMessage) -> Result<PipelineContext, PipelineError> {
        let mut context = PipelineContext::new(inbound);
        self.run_context(&mut context).await?;
        Ok(context)
    }

    pub async fn run_context(&self, context: &mut PipelineContext) -> Result<(), PipelineError> {
        self.run_step(PipelineStep::ValidateMessage, context).await?;

        let message_type = context.validated(PipelineStep::ValidateMessage)?.message_type.clone();
        let Some(process) = PipelineStep::for_message_type(&message_type) else {
            warn!(
                event_name = "pipeline.unsupported_type",
                correlation_id = %context.correlation_id,
                message_type = %message_type,
                "inbound message type has no processing step"
            );
            return Err(PipelineError::UnsupportedMessageType(message_type.to_string()));
        };

        self.run_step(process, context).await?;
        self.run_step(PipelineStep::SendMessage, context).await
    }

    pub async fn run_step(
        &self,
        step: PipelineStep,
        context: &mut PipelineContext,
    ) -> Result<(), PipelineError> {
        debug!(
            event_name = "pipeline.step_started",
            correlation_id = %context.correlation_id,
            step = step.as_str(),
            "pipeline step started"
        );

        match step {
            PipelineStep::ValidateMessage => {
                context.validated = Some(inbound::validate(&context.inbound)?);
            }
            PipelineStep::ProcessText => {
                let validated = context.validated(step)?;
                let text = validated.text.as_deref().unwrap_or_default();
                let outcome = self
                    .runtime
                    .handle_turn(validated.phone_number.as_str(), text, &context.correlation_id)
                    .await?;
                context.response_message = Some(outcome.turn.reply_text);
            }
            PipelineStep::ProcessVoice => {
                context.validated(step)?;
                context.response_message = Some(VOICE_NOT_SUPPORTED_REPLY.to_string());
            }
            PipelineStep::SendMessage => {
                let validated = context.validated(step)?;
                let Some(text) = context.response_message.clone() else {
                    return Err(PipelineError::OutOfOrder {
                        step,
                        requires: PipelineStep::ProcessText,
                    });
                };
                self.sender
                    .send(OutboundMessage {
                        to: validated.phone_number.clone(),
                        text,
                        in_reply_to: validated.whatsapp_id.clone(),
                        correlation_id: context.correlation_id.clone(),
                    })
                    .await?;
                info!(
                    event_name = "pipeline.reply_delivered",
                    correlation_id = %context.correlation_id,
                    phone = %validated.phone_number.masked(),
                    "reply delivered"
                );
                context.delivered = true;
            }
        }

        Ok(())
    }
}
