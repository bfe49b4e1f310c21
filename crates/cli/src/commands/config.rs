use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use havitush_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct ConfigField<'a> {
    key: &'static str,
    env_key: &'static str,
    value: &'a str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let max_connections = config.database.max_connections.to_string();
    let timeout_secs = config.database.timeout_secs.to_string();
    let ruleset_path =
        config.ruleset.path.as_deref().map(|path| path.display().to_string()).unwrap_or_default();
    let trigger_code = redact_secret(config.supervisor.trigger_code());
    let log_format = format!("{:?}", config.logging.format);

    let fields = [
        ConfigField {
            key: "database.url",
            env_key: "HAVITUSH_DATABASE_URL",
            value: &config.database.url,
        },
        ConfigField {
            key: "database.max_connections",
            env_key: "HAVITUSH_DATABASE_MAX_CONNECTIONS",
            value: &max_connections,
        },
        ConfigField {
            key: "database.timeout_secs",
            env_key: "HAVITUSH_DATABASE_TIMEOUT_SECS",
            value: &timeout_secs,
        },
        ConfigField {
            key: "ruleset.source",
            env_key: "HAVITUSH_RULESET_SOURCE",
            value: config.ruleset.source.as_str(),
        },
        ConfigField {
            key: "ruleset.path",
            env_key: "HAVITUSH_RULESET_PATH",
            value: if ruleset_path.is_empty() { "<unset>" } else { &ruleset_path },
        },
        ConfigField {
            key: "ruleset.ruleset_id",
            env_key: "HAVITUSH_RULESET_ID",
            value: &config.ruleset.ruleset_id,
        },
        ConfigField {
            key: "supervisor.trigger_code",
            env_key: "HAVITUSH_SUPERVISOR_TRIGGER_CODE",
            value: trigger_code,
        },
        ConfigField {
            key: "logging.level",
            env_key: "HAVITUSH_LOGGING_LEVEL",
            value: &config.logging.level,
        },
        ConfigField {
            key: "logging.format",
            env_key: "HAVITUSH_LOGGING_FORMAT",
            value: &log_format,
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        render_line(
            field.key,
            field.value,
            field_source(
                field.key,
                Some(field.env_key),
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        )
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("havitush.toml"), PathBuf::from("config/havitush.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&str>) -> &'static str {
    match secret {
        Some(value) if !value.is_empty() => "<redacted>",
        Some(_) => "<empty>",
        None => "<unset>",
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source, redact_secret};

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc = "[ruleset]\nsource = \"file\"\n".parse::<toml::Value>().expect("toml");
        assert!(contains_path(&doc, "ruleset.source"));
        assert!(!contains_path(&doc, "ruleset.path"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn file_source_is_reported_when_env_is_absent() {
        let doc = "[logging]\nlevel = \"debug\"\n".parse::<toml::Value>().expect("toml");
        let source = field_source(
            "logging.level",
            Some("HAVITUSH_TEST_NEVER_SET_LEVEL"),
            Some(&doc),
            Some(std::path::Path::new("havitush.toml")),
        );
        assert_eq!(source, "file (havitush.toml)");
        assert_eq!(field_source("logging.format", None, Some(&doc), None), "default");
    }

    #[test]
    fn trigger_code_is_never_echoed() {
        assert_eq!(redact_secret(Some("8500")), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
    }
}
