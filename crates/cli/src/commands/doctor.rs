use havitush_core::config::{AppConfig, LoadOptions, RulesetSource};
use havitush_core::ruleset::Ruleset;
use havitush_db::{connect_with_config, ping, DbPool, RulesetRepository, SqlRulesetRepository};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {reason}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(runtime_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["database_connectivity", "ruleset_resolution", "ruleset_validation"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if all_pass {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    } else {
        (CheckStatus::Warn, "doctor: ready, with warnings")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn runtime_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("ruleset_resolution", "the async runtime did not start"),
                DoctorCheck::skipped("ruleset_validation", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let mut checks = Vec::new();
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => match ping(&pool).await {
                Ok(()) => {
                    checks.push(DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Pass,
                        format!("connected using `{}`", config.database.url),
                    ));
                    Some(pool)
                }
                Err(error) => {
                    checks.push(DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("database did not answer: {error}"),
                    ));
                    None
                }
            },
            Err(error) => {
                checks.push(DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to connect to database: {error}"),
                ));
                None
            }
        };

        match inspect_ruleset(config, pool.as_ref()).await {
            Ok((ruleset, details)) => {
                checks.push(DoctorCheck::new("ruleset_resolution", CheckStatus::Pass, details));
                checks.push(validation_check(&ruleset));
            }
            Err(details) => {
                checks.push(DoctorCheck::new("ruleset_resolution", CheckStatus::Fail, details));
                checks.push(DoctorCheck::skipped("ruleset_validation", "no ruleset was resolved"));
            }
        }

        if let Some(pool) = pool {
            pool.close().await;
        }
        checks
    })
}

/// Read-only ruleset lookup: never seeds or rewrites the stored document.
async fn inspect_ruleset(
    config: &AppConfig,
    pool: Option<&DbPool>,
) -> Result<(Ruleset, String), String> {
    match config.ruleset.source {
        RulesetSource::Builtin => Ok((Ruleset::builtin(), "using built-in ruleset".to_string())),
        RulesetSource::File => {
            let path = config
                .ruleset
                .path
                .as_deref()
                .ok_or_else(|| "ruleset.path is not set".to_string())?;
            let ruleset = Ruleset::load_file(path).map_err(|error| error.to_string())?;
            Ok((ruleset, format!("loaded ruleset file `{}`", path.display())))
        }
        RulesetSource::Database => {
            let pool = pool.ok_or_else(|| "database is unreachable".to_string())?;
            let ruleset_id = &config.ruleset.ruleset_id;
            let document = SqlRulesetRepository::new(pool.clone())
                .find_document(ruleset_id)
                .await
                .map_err(|error| format!("failed to read stored ruleset (run `migrate`?): {error}"))?;
            match document {
                Some(document) => {
                    let ruleset = Ruleset::from_json(&document).map_err(|error| {
                        format!("stored ruleset `{ruleset_id}` is invalid: {error}")
                    })?;
                    Ok((ruleset, format!("loaded stored ruleset `{ruleset_id}`")))
                }
                None => Ok((
                    Ruleset::builtin(),
                    format!("no stored ruleset `{ruleset_id}`; built-in will be seeded on first use"),
                )),
            }
        }
    }
}

fn validation_check(ruleset: &Ruleset) -> DoctorCheck {
    let issues = ruleset.validate();
    if issues.is_empty() {
        return DoctorCheck::new(
            "ruleset_validation",
            CheckStatus::Pass,
            format!("flow `{}` has {} steps and no issues", ruleset.flow_name, ruleset.flow.len()),
        );
    }

    let listed = issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
    DoctorCheck::new(
        "ruleset_validation",
        CheckStatus::Warn,
        format!("{} issue(s), affected turns use fallbacks: {listed}", issues.len()),
    )
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use havitush_core::ruleset::Ruleset;

    use super::{render_human, summarize, validation_check, CheckStatus, DoctorCheck};

    #[test]
    fn builtin_ruleset_validates_cleanly() {
        let check = validation_check(&Ruleset::builtin());
        assert_eq!(check.status, CheckStatus::Pass);
    }

    #[test]
    fn ruleset_issues_are_warnings_not_failures() {
        let mut ruleset = Ruleset::builtin();
        ruleset.initial_step_new = "nowhere".to_string();

        let check = validation_check(&ruleset);
        assert_eq!(check.status, CheckStatus::Warn);
        assert!(check.details.contains("nowhere"));

        let report = summarize(vec![
            DoctorCheck::new("config_validation", CheckStatus::Pass, "ok"),
            check,
        ]);
        assert_eq!(report.overall_status, CheckStatus::Warn);
    }

    #[test]
    fn any_failure_fails_the_report() {
        let report = summarize(vec![
            DoctorCheck::new("config_validation", CheckStatus::Fail, "bad"),
            DoctorCheck::skipped("database_connectivity", "configuration did not load"),
        ]);
        assert_eq!(report.overall_status, CheckStatus::Fail);

        let rendered = render_human(&report);
        assert!(rendered.contains("- [fail] config_validation: bad"));
        assert!(rendered.contains("- [skip] database_connectivity"));
    }
}
