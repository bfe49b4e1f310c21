use std::collections::HashMap;

use tokio::sync::RwLock;

use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
use havitush_core::ruleset::Ruleset;

use super::{ConversationRepository, RepositoryError, RulesetRepository};

#[derive(Default)]
struct ConversationState {
    records: HashMap<String, ConversationRecord>,
    turns: Vec<ConversationTurn>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: RwLock<ConversationState>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.records.get(phone_number.as_str()).cloned())
    }

    async fn commit_turn(
        &self,
        record: ConversationRecord,
        turn: ConversationTurn,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.turns.iter().any(|existing| existing.turn_id == turn.turn_id) {
            return Err(RepositoryError::Conflict(format!("duplicate turn id `{}`", turn.turn_id)));
        }
        state.records.insert(record.phone_number.0.clone(), record);
        state.turns.push(turn);
        Ok(())
    }

    async fn list_turns(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.turns.iter().filter(|turn| &turn.phone_number == phone_number).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryRulesetRepository {
    documents: RwLock<HashMap<String, String>>,
}

impl InMemoryRulesetRepository {
    /// Stores a raw document as-is, including ones that do not decode.
    pub async fn insert_document(&self, ruleset_id: &str, document: impl Into<String>) {
        self.documents.write().await.insert(ruleset_id.to_string(), document.into());
    }
}

#[async_trait::async_trait]
impl RulesetRepository for InMemoryRulesetRepository {
    async fn find_document(&self, ruleset_id: &str) -> Result<Option<String>, RepositoryError> {
        let documents = self.documents.read().await;
        Ok(documents.get(ruleset_id).cloned())
    }

    async fn save(&self, ruleset_id: &str, ruleset: &Ruleset) -> Result<(), RepositoryError> {
        let document =
            ruleset.to_json_pretty().map_err(|error| RepositoryError::Encode(error.to_string()))?;
        self.documents.write().await.insert(ruleset_id.to_string(), document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
    use havitush_core::flows::states::{StepId, TurnDisposition};
    use havitush_core::ruleset::Ruleset;

    use crate::repositories::{
        load_or_seed, ConversationRepository, InMemoryConversationRepository,
        InMemoryRulesetRepository, RulesetOrigin,
    };

    #[tokio::test]
    async fn in_memory_conversation_repo_round_trip() {
        let repo = InMemoryConversationRepository::default();
        let mut record = ConversationRecord::new(PhoneNumber("972501234567".to_string()));
        record.current_step = StepId::CollectCompany;

        let turn = ConversationTurn {
            turn_id: "turn-1".to_string(),
            phone_number: record.phone_number.clone(),
            correlation_id: "req-1".to_string(),
            inbound_text: "Acme".to_string(),
            reply_text: "reply".to_string(),
            from_step: StepId::CollectName,
            to_step: StepId::CollectCompany,
            disposition: TurnDisposition::Advanced,
            occurred_at: Utc::now(),
        };
        repo.commit_turn(record.clone(), turn).await.expect("save record");
        let found = repo.find_by_phone(&record.phone_number).await.expect("find record");
        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn in_memory_turn_log_is_scoped_by_phone() {
        let repo = InMemoryConversationRepository::default();
        for (index, phone) in ["111111111", "222222222", "111111111"].into_iter().enumerate() {
            let record = ConversationRecord::new(PhoneNumber(phone.to_string()));
            let turn = ConversationTurn {
                turn_id: format!("turn-{index}"),
                phone_number: record.phone_number.clone(),
                correlation_id: "req-1".to_string(),
                inbound_text: "hi".to_string(),
                reply_text: "reply".to_string(),
                from_step: StepId::Start,
                to_step: StepId::CollectName,
                disposition: TurnDisposition::Routed,
                occurred_at: Utc::now(),
            };
            repo.commit_turn(record, turn).await.expect("commit");
        }

        let turns =
            repo.list_turns(&PhoneNumber("111111111".to_string())).await.expect("list turns");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].turn_id, "turn-2");
    }

    #[tokio::test]
    async fn in_memory_ruleset_repo_seeds_and_falls_back() {
        let repo = InMemoryRulesetRepository::default();
        let seeded = load_or_seed(&repo, "A").await.expect("seed");
        assert_eq!(seeded.origin, RulesetOrigin::Seeded);

        repo.insert_document("B", "[\"not\", \"a\", \"document\"]").await;
        let fallback = load_or_seed(&repo, "B").await.expect("fallback");
        assert_eq!(fallback.origin, RulesetOrigin::Fallback);
        assert_eq!(fallback.ruleset, Ruleset::builtin());

        // A bad section is dropped on its own; the rest of the document is kept.
        repo.insert_document("C", "{\"flow\": 42, \"flow_name\": \"custom\"}").await;
        let partial = load_or_seed(&repo, "C").await.expect("partial");
        assert_eq!(partial.origin, RulesetOrigin::Stored);
        assert_eq!(partial.ruleset.flow_name, "custom");
        assert!(partial.ruleset.flow.is_empty());
    }
}
