use async_trait::async_trait;
use thiserror::Error;

use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
use havitush_core::ruleset::Ruleset;

pub mod conversation;
pub mod memory;
pub mod ruleset;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryRulesetRepository};
pub use ruleset::{load_or_seed, LoadedRuleset, RulesetOrigin, SqlRulesetRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<ConversationRecord>, RepositoryError>;

    /// Stores the updated record and appends its turn-log entry atomically.
    async fn commit_turn(
        &self,
        record: ConversationRecord,
        turn: ConversationTurn,
    ) -> Result<(), RepositoryError>;

    async fn list_turns(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;
}

#[async_trait]
pub trait RulesetRepository: Send + Sync {
    /// Raw stored document, undecoded.
    async fn find_document(&self, ruleset_id: &str) -> Result<Option<String>, RepositoryError>;

    async fn save(&self, ruleset_id: &str, ruleset: &Ruleset) -> Result<(), RepositoryError>;
}
