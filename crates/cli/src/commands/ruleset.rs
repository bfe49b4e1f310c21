use havitush_agent::bootstrap::{resolve_ruleset, BootstrapError, ResolvedRuleset};
use havitush_core::ruleset::Ruleset;
use havitush_db::{connect_with_config, migrations};

use crate::commands::{current_thread_runtime, load_config, CommandResult, Failure};

const REDACTED: &str = "<redacted>";

pub fn run(dump: bool) -> CommandResult {
    let config = match load_config("ruleset") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("ruleset") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let resolved = resolve_ruleset(&config, &pool).await.map_err(ruleset_failure);
        pool.close().await;
        resolved
    });

    let resolved = match result {
        Ok(resolved) => resolved,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("ruleset", error_class, message, exit_code);
        }
    };

    let overridden = config.supervisor.trigger_code().is_some();
    if dump {
        return match redacted(resolved.ruleset, overridden).to_json_pretty() {
            Ok(document) => CommandResult::raw(document),
            Err(error) => CommandResult::failure("ruleset", "serialization", error.to_string(), 5),
        };
    }

    CommandResult::success("ruleset", describe(&resolved))
}

pub(crate) fn ruleset_failure(error: BootstrapError) -> Failure {
    match error {
        BootstrapError::DatabaseConnect(error) => ("db_connectivity", error.to_string(), 4),
        BootstrapError::Migration(error) => ("migration", error.to_string(), 5),
        other => ("ruleset_load", other.to_string(), 5),
    }
}

/// An operator-supplied trigger code is a secret and is never dumped.
fn redacted(mut ruleset: Ruleset, overridden: bool) -> Ruleset {
    if overridden {
        ruleset.supervisor.trigger_code = REDACTED.to_string();
    }
    ruleset
}

fn describe(resolved: &ResolvedRuleset) -> String {
    let ruleset = &resolved.ruleset;
    let origin =
        resolved.origin.map(|origin| format!(" ({})", origin.as_str())).unwrap_or_default();
    let mut lines = vec![format!(
        "flow `{}` from {}{origin}: {} steps",
        ruleset.flow_name,
        resolved.source.as_str(),
        ruleset.flow.len()
    )];

    let issues = ruleset.validate();
    if issues.is_empty() {
        lines.push("no issues".to_string());
    } else {
        lines.extend(issues.iter().map(|issue| format!("issue: {issue}")));
    }
    lines.join("\n")
}
