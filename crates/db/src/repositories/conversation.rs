use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
use havitush_core::flows::states::{StepId, TurnDisposition};

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

const UPSERT_RECORD: &str = "INSERT INTO conversation_record (
        phone_number,
        current_step,
        first_name,
        last_name,
        company_name,
        event_address,
        event_date,
        guest_count,
        age_verified,
        wants_new_order,
        created_at,
        updated_at
     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(phone_number) DO UPDATE SET
        current_step = excluded.current_step,
        first_name = excluded.first_name,
        last_name = excluded.last_name,
        company_name = excluded.company_name,
        event_address = excluded.event_address,
        event_date = excluded.event_date,
        guest_count = excluded.guest_count,
        age_verified = excluded.age_verified,
        wants_new_order = excluded.wants_new_order,
        updated_at = excluded.updated_at";

const INSERT_TURN: &str = "INSERT INTO conversation_turn (
        id,
        phone_number,
        correlation_id,
        inbound_text,
        reply_text,
        from_step,
        to_step,
        disposition,
        occurred_at
     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                phone_number,
                current_step,
                first_name,
                last_name,
                company_name,
                event_address,
                event_date,
                guest_count,
                age_verified,
                wants_new_order
             FROM conversation_record
             WHERE phone_number = ?",
        )
        .bind(phone_number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn commit_turn(
        &self,
        record: ConversationRecord,
        turn: ConversationTurn,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        bind_record(sqlx::query(UPSERT_RECORD), &record, &now).execute(&mut *tx).await?;

        sqlx::query(INSERT_TURN)
            .bind(&turn.turn_id)
            .bind(turn.phone_number.as_str())
            .bind(&turn.correlation_id)
            .bind(&turn.inbound_text)
            .bind(&turn.reply_text)
            .bind(turn.from_step.as_str())
            .bind(turn.to_step.as_str())
            .bind(turn.disposition.as_str())
            .bind(turn.occurred_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_turns(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                phone_number,
                correlation_id,
                inbound_text,
                reply_text,
                from_step,
                to_step,
                disposition,
                occurred_at
             FROM conversation_turn
             WHERE phone_number = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(phone_number.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q ConversationRecord,
    now: &'q str,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(record.phone_number.as_str())
        .bind(record.current_step.as_str())
        .bind(record.first_name.as_deref())
        .bind(record.last_name.as_deref())
        .bind(record.company_name.as_deref())
        .bind(record.event_address.as_deref())
        .bind(record.event_date.as_deref())
        .bind(record.guest_count.map(i64::from))
        .bind(record.age_verified)
        .bind(record.wants_new_order)
        .bind(now)
        .bind(now)
}

fn record_from_row(row: SqliteRow) -> Result<ConversationRecord, RepositoryError> {
    Ok(ConversationRecord {
        phone_number: PhoneNumber(row.try_get("phone_number")?),
        current_step: StepId::from(row.try_get::<String, _>("current_step")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        company_name: row.try_get("company_name")?,
        event_address: row.try_get("event_address")?,
        event_date: row.try_get("event_date")?,
        guest_count: row
            .try_get::<Option<i64>, _>("guest_count")?
            .map(|value| parse_u32("guest_count", value))
            .transpose()?,
        age_verified: row.try_get("age_verified")?,
        wants_new_order: row.try_get("wants_new_order")?,
    })
}

fn turn_from_row(row: SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let disposition_raw = row.try_get::<String, _>("disposition")?;
    let disposition = disposition_raw
        .parse::<TurnDisposition>()
        .map_err(RepositoryError::Decode)?;

    Ok(ConversationTurn {
        turn_id: row.try_get("id")?,
        phone_number: PhoneNumber(row.try_get("phone_number")?),
        correlation_id: row.try_get("correlation_id")?,
        inbound_text: row.try_get("inbound_text")?,
        reply_text: row.try_get("reply_text")?,
        from_step: StepId::from(row.try_get::<String, _>("from_step")?),
        to_step: StepId::from(row.try_get::<String, _>("to_step")?),
        disposition,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use havitush_core::domain::conversation::{ConversationRecord, ConversationTurn, PhoneNumber};
    use havitush_core::flows::states::{StepId, TurnDisposition};

    use super::SqlConversationRepository;
    use crate::migrations;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_record() -> ConversationRecord {
        let mut record = ConversationRecord::new(PhoneNumber("972501234567".to_string()));
        record.current_step = StepId::ConfirmAge;
        record.first_name = Some("דנה".to_string());
        record.last_name = Some("כהן".to_string());
        record.company_name = Some("Acme Events".to_string());
        record.event_date = Some("2025-12-01".to_string());
        record.guest_count = Some(85);
        record.wants_new_order = Some(true);
        record
    }

    fn sample_turn(record: &ConversationRecord, id: &str, offset_secs: i64) -> ConversationTurn {
        ConversationTurn {
            turn_id: id.to_string(),
            phone_number: record.phone_number.clone(),
            correlation_id: format!("req-{id}"),
            inbound_text: "85".to_string(),
            reply_text: "summary\n\nprompt".to_string(),
            from_step: StepId::CollectGuestCount,
            to_step: record.current_step.clone(),
            disposition: TurnDisposition::Advanced,
            occurred_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn sql_conversation_repo_round_trip() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let record = sample_record();

        assert_eq!(repo.find_by_phone(&record.phone_number).await.expect("find"), None);

        let first = sample_turn(&record, "turn-1", 0);
        repo.commit_turn(record.clone(), first).await.expect("save record");
        let found = repo.find_by_phone(&record.phone_number).await.expect("find record");
        assert_eq!(found, Some(record.clone()));

        let mut updated = record.clone();
        updated.current_step = StepId::Completed;
        updated.age_verified = Some(true);
        let second = sample_turn(&updated, "turn-2", 1);
        repo.commit_turn(updated.clone(), second).await.expect("upsert record");
        let found = repo.find_by_phone(&record.phone_number).await.expect("find updated");
        assert_eq!(found, Some(updated));
    }

    #[tokio::test]
    async fn custom_step_ids_survive_storage() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let mut record = sample_record();
        record.current_step = StepId::Other("vip_lounge".to_string());

        let turn = sample_turn(&record, "turn-custom", 0);
        repo.commit_turn(record.clone(), turn).await.expect("save");
        let found = repo.find_by_phone(&record.phone_number).await.expect("find").expect("exists");
        assert_eq!(found.current_step, StepId::Other("vip_lounge".to_string()));
    }

    #[tokio::test]
    async fn commit_turn_writes_record_and_log_together() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let record = sample_record();
        let first = sample_turn(&record, "turn-1", 0);
        let second = sample_turn(&record, "turn-2", 1);

        repo.commit_turn(record.clone(), first.clone()).await.expect("commit first");
        repo.commit_turn(record.clone(), second.clone()).await.expect("commit second");

        let found = repo.find_by_phone(&record.phone_number).await.expect("find");
        assert_eq!(found, Some(record.clone()));

        let turns = repo.list_turns(&record.phone_number).await.expect("list turns");
        assert_eq!(turns, vec![first, second]);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_state() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let record = sample_record();
        let turn = sample_turn(&record, "turn-dup", 0);

        repo.commit_turn(record.clone(), turn.clone()).await.expect("first commit");

        let mut moved = record.clone();
        moved.current_step = StepId::Completed;
        let error = repo.commit_turn(moved, turn).await;
        assert!(error.is_err(), "duplicate turn id must fail");

        let found = repo.find_by_phone(&record.phone_number).await.expect("find");
        assert_eq!(found.map(|stored| stored.current_step), Some(StepId::ConfirmAge));
        assert_eq!(repo.list_turns(&record.phone_number).await.expect("list").len(), 1);
    }
}
