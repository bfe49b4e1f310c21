pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ruleset;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, StepId, Turn, TurnDisposition};
pub use ruleset::{Ruleset, RulesetError, RulesetIssue};
