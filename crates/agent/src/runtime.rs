use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use havitush_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
use havitush_core::errors::ApplicationError;
use havitush_core::flows::engine::FlowEngine;
use havitush_db::{ConversationRepository, RepositoryError};

const AUDIT_ACTOR: &str = "havitush-runtime";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub record: ConversationRecord,
    pub turn: ConversationTurn,
}

impl TurnOutcome {
    pub fn reply(&self) -> &str {
        &self.turn.reply_text
    }
}

/// Persistence-aware wrapper around [`FlowEngine`]. Turns for the same phone
/// number run one at a time; turns for different numbers run concurrently.
pub struct ConversationRuntime {
    engine: Arc<FlowEngine>,
    conversations: Arc<dyn ConversationRepository>,
    audit: Arc<dyn AuditSink>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationRuntime {
    pub fn new(engine: Arc<FlowEngine>, conversations: Arc<dyn ConversationRepository>) -> Self {
        Self::with_audit(engine, conversations, Arc::new(TracingAuditSink))
    }

    pub fn with_audit(
        engine: Arc<FlowEngine>,
        conversations: Arc<dyn ConversationRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { engine, conversations, audit, locks: Mutex::new(HashMap::new()) }
    }

    pub async fn handle_turn(
        &self,
        phone_raw: &str,
        message: &str,
        correlation_id: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        let phone_number = PhoneNumber::parse(phone_raw)?;
        let lock = self.lock_for(&phone_number).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_turn(phone_number.clone(), message, correlation_id).await
        };
        drop(lock);
        self.release_lock(&phone_number).await;
        outcome
    }

    async fn apply_turn(
        &self,
        phone_number: PhoneNumber,
        message: &str,
        correlation_id: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        let mut record = self
            .conversations
            .find_by_phone(&phone_number)
            .await
            .map_err(|error| persistence_error("load", correlation_id, error))?
            .unwrap_or_else(|| ConversationRecord::new(phone_number.clone()));

        let turn = self.engine.advance(&mut record, message);
        let audit = AuditContext::new(Some(phone_number.clone()), correlation_id, AUDIT_ACTOR);

        let entry = ConversationTurn {
            turn_id: Uuid::new_v4().to_string(),
            phone_number,
            correlation_id: correlation_id.to_string(),
            inbound_text: message.to_string(),
            reply_text: turn.reply.clone(),
            from_step: turn.from.clone(),
            to_step: turn.to.clone(),
            disposition: turn.disposition,
            occurred_at: Utc::now(),
        };

        if let Err(error) = self.conversations.commit_turn(record.clone(), entry.clone()).await {
            self.audit.emit(
                AuditEvent::new(
                    &audit,
                    "runtime.turn_commit_failed",
                    AuditCategory::Persistence,
                    AuditOutcome::Failed,
                )
                .with_metadata("from", entry.from_step.as_str())
                .with_metadata("to", entry.to_step.as_str()),
            );
            return Err(persistence_error("commit", correlation_id, error));
        }
        self.engine.audit_turn(&turn, &*self.audit, &audit);

        info!(
            event_name = "runtime.turn_committed",
            correlation_id,
            phone = %entry.phone_number.masked(),
            from = %entry.from_step,
            to = %entry.to_step,
            disposition = entry.disposition.as_str(),
            "conversation turn committed"
        );

        Ok(TurnOutcome { record, turn: entry })
    }

    async fn lock_for(&self, phone_number: &PhoneNumber) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(phone_number.as_str().to_string()).or_default().clone()
    }

    async fn release_lock(&self, phone_number: &PhoneNumber) {
        let mut locks = self.locks.lock().await;
        // Only the map holds it: nobody is waiting on this number.
        if locks.get(phone_number.as_str()).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(phone_number.as_str());
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn persistence_error(
    stage: &str,
    correlation_id: &str,
    error: RepositoryError,
) -> ApplicationError {
    error!(
        event_name = "runtime.persistence_failed",
        correlation_id,
        stage,
        error = %error,
        "conversation store failure"
    );
    ApplicationError::Persistence(format!("{stage}: {error}"))
}
