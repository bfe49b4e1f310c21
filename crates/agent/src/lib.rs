//! Conversation runtime for the Havitush WhatsApp bot.
//!
//! Wraps the pure [`havitush_core::flows::engine::FlowEngine`] with what a live
//! deployment needs:
//! - `runtime`: load record, advance, commit record and turn log atomically,
//!   one turn at a time per phone number
//! - `pipeline`: validate → process (text or voice) → send, as a closed set of
//!   named steps
//! - `inbound` / `outbound`: webhook payload validation and the `MessageSender`
//!   seam
//! - `bootstrap`: database, migrations and ruleset resolution from `AppConfig`

pub mod bootstrap;
pub mod inbound;
pub mod outbound;
pub mod pipeline;
pub mod runtime;

pub use bootstrap::{bootstrap_with_config, Application, BootstrapError, ResolvedRuleset};
pub use inbound::{InboundMessage, MessageType, ValidatedMessage};
pub use outbound::{DeliveryError, MessageSender, OutboundMessage, OutboxSender, TracingSender};
pub use pipeline::{Pipeline, PipelineContext, PipelineError, PipelineStep};
pub use runtime::{ConversationRuntime, TurnOutcome};
