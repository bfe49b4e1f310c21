use chrono::Utc;
use sqlx::Row;
use tracing::{error, info};

use havitush_core::ruleset::Ruleset;

use super::{RepositoryError, RulesetRepository};
use crate::DbPool;

pub struct SqlRulesetRepository {
    pool: DbPool,
}

impl SqlRulesetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RulesetRepository for SqlRulesetRepository {
    async fn find_document(&self, ruleset_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT document_json FROM ruleset_document WHERE id = ?")
            .bind(ruleset_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.try_get::<String, _>("document_json").map_err(RepositoryError::from))
            .transpose()
    }

    async fn save(&self, ruleset_id: &str, ruleset: &Ruleset) -> Result<(), RepositoryError> {
        let document =
            ruleset.to_json_pretty().map_err(|error| RepositoryError::Encode(error.to_string()))?;
        sqlx::query(
            "INSERT INTO ruleset_document (id, document_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                document_json = excluded.document_json,
                updated_at = excluded.updated_at",
        )
        .bind(ruleset_id)
        .bind(document)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RulesetOrigin {
    Stored,
    /// No document was stored; the built-in ruleset was written and used.
    Seeded,
    /// A stored document could not be decoded; the built-in ruleset is used in memory.
    Fallback,
}

impl RulesetOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Seeded => "seeded",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadedRuleset {
    pub ruleset: Ruleset,
    pub origin: RulesetOrigin,
}

/// Loads the stored ruleset, seeding the built-in one when nothing is stored.
/// An undecodable document is left untouched and the built-in ruleset is used.
pub async fn load_or_seed<R>(repo: &R, ruleset_id: &str) -> Result<LoadedRuleset, RepositoryError>
where
    R: RulesetRepository + ?Sized,
{
    match repo.find_document(ruleset_id).await? {
        Some(document) => match Ruleset::from_json(&document) {
            Ok(ruleset) => Ok(LoadedRuleset { ruleset, origin: RulesetOrigin::Stored }),
            Err(decode_error) => {
                error!(
                    event_name = "ruleset.decode_failed",
                    ruleset_id,
                    error = %decode_error,
                    "stored ruleset is invalid; using built-in ruleset"
                );
                Ok(LoadedRuleset { ruleset: Ruleset::builtin(), origin: RulesetOrigin::Fallback })
            }
        },
        None => {
            let ruleset = Ruleset::builtin();
            repo.save(ruleset_id, &ruleset).await?;
            info!(event_name = "ruleset.seeded", ruleset_id, "stored built-in ruleset");
            Ok(LoadedRuleset { ruleset, origin: RulesetOrigin::Seeded })
        }
    }
}
