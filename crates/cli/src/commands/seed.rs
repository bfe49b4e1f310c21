use crate::commands::{current_thread_runtime, load_config, CommandResult, Failure};
use havitush_db::{
    connect_with_config, load_or_seed, migrations, LoadedRuleset, RulesetOrigin,
    SqlRulesetRepository,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let ruleset_id = config.ruleset.ruleset_id.clone();
    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repo = SqlRulesetRepository::new(pool.clone());
        let loaded = load_or_seed(&repo, &ruleset_id)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));

        pool.close().await;
        loaded
    });

    match result {
        Ok(loaded) => match seed_message(&ruleset_id, &loaded) {
            Ok(message) => CommandResult::success("seed", message),
            Err((error_class, message, exit_code)) => {
                CommandResult::failure("seed", error_class, message, exit_code)
            }
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_message(ruleset_id: &str, loaded: &LoadedRuleset) -> Result<String, Failure> {
    let steps = loaded.ruleset.flow.len();
    match loaded.origin {
        RulesetOrigin::Seeded => {
            Ok(format!("stored built-in ruleset `{ruleset_id}` ({steps} steps)"))
        }
        RulesetOrigin::Stored => {
            Ok(format!("ruleset `{ruleset_id}` already stored ({steps} steps); left unchanged"))
        }
        RulesetOrigin::Fallback => Err((
            "seed_verification",
            format!(
                "stored ruleset `{ruleset_id}` could not be decoded; fix or delete the stored document"
            ),
            5,
        )),
    }
}
