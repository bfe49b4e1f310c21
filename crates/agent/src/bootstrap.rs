use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use havitush_core::config::{AppConfig, RulesetSource};
use havitush_core::flows::engine::FlowEngine;
use havitush_core::ruleset::{Ruleset, RulesetError};
use havitush_db::{
    connect_with_config, load_or_seed, migrations, DbPool, RepositoryError, RulesetOrigin,
    SqlConversationRepository, SqlRulesetRepository,
};

use crate::runtime::ConversationRuntime;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<ConversationRuntime>,
    pub ruleset: ResolvedRuleset,
}

#[derive(Clone, Debug)]
pub struct ResolvedRuleset {
    pub ruleset: Ruleset,
    pub source: RulesetSource,
    /// Set when the ruleset came from the database.
    pub origin: Option<RulesetOrigin>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("ruleset file could not be loaded: {0}")]
    RulesetFile(#[source] RulesetError),
    #[error("ruleset store failed: {0}")]
    RulesetStore(#[source] RepositoryError),
    #[error("ruleset source `file` requires ruleset.path")]
    MissingRulesetPath,
}

/// Resolves the configured ruleset source and applies the supervisor override.
pub async fn resolve_ruleset(
    config: &AppConfig,
    pool: &DbPool,
) -> Result<ResolvedRuleset, BootstrapError> {
    let source = config.ruleset.source;
    let (ruleset, origin) = match source {
        RulesetSource::Builtin => (Ruleset::builtin(), None),
        RulesetSource::File => {
            let path = config.ruleset.path.as_deref().ok_or(BootstrapError::MissingRulesetPath)?;
            (Ruleset::load_file(path).map_err(BootstrapError::RulesetFile)?, None)
        }
        RulesetSource::Database => {
            let repo = SqlRulesetRepository::new(pool.clone());
            let loaded = load_or_seed(&repo, &config.ruleset.ruleset_id)
                .await
                .map_err(BootstrapError::RulesetStore)?;
            (loaded.ruleset, Some(loaded.origin))
        }
    };

    let ruleset = match config.supervisor.trigger_code() {
        Some(code) => ruleset.with_trigger_code(code),
        None => ruleset,
    };

    info!(
        event_name = "system.bootstrap.ruleset_loaded",
        correlation_id = "bootstrap",
        source = source.as_str(),
        origin = origin.map(|origin| origin.as_str()).unwrap_or("n/a"),
        flow = %ruleset.flow_name,
        steps = ruleset.flow.len(),
        "ruleset resolved"
    );

    Ok(ResolvedRuleset { ruleset, source, origin })
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let resolved = resolve_ruleset(&config, &db_pool).await?;
    let engine = Arc::new(FlowEngine::new(resolved.ruleset.clone()));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let runtime = Arc::new(ConversationRuntime::new(engine, conversations));

    Ok(Application { config, db_pool, runtime, ruleset: resolved })
}
