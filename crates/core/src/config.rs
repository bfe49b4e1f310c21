use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ruleset: RulesetConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RulesetConfig {
    pub source: RulesetSource,
    pub path: Option<PathBuf>,
    pub ruleset_id: String,
}

/// Operator override for the supervisor trigger code. Kept secret so it never
/// shows up in `config` output or debug logs.
#[derive(Clone, Debug, Default)]
pub struct SupervisorConfig {
    pub trigger_code: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesetSource {
    Builtin,
    File,
    Database,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub ruleset_source: Option<RulesetSource>,
    pub ruleset_path: Option<PathBuf>,
    pub supervisor_trigger_code: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://havitush.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            ruleset: RulesetConfig {
                source: RulesetSource::Database,
                path: None,
                ruleset_id: "HAVITUSH".to_string(),
            },
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for RulesetSource {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "builtin" => Ok(Self::Builtin),
            "file" => Ok(Self::File),
            "database" | "db" => Ok(Self::Database),
            other => Err(ConfigError::Validation(format!(
                "unsupported ruleset source `{other}` (expected builtin|file|database)"
            ))),
        }
    }
}

impl RulesetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::File => "file",
            Self::Database => "database",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SupervisorConfig {
    pub fn trigger_code(&self) -> Option<&str> {
        self.trigger_code.as_ref().map(|code| code.expose_secret().trim())
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("havitush.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(ruleset) = patch.ruleset {
            if let Some(source) = ruleset.source {
                self.ruleset.source = source;
            }
            if let Some(path) = ruleset.path {
                self.ruleset.path = Some(path);
            }
            if let Some(ruleset_id) = ruleset.ruleset_id {
                self.ruleset.ruleset_id = ruleset_id;
            }
        }

        if let Some(supervisor) = patch.supervisor {
            if let Some(trigger_code) = supervisor.trigger_code {
                self.supervisor.trigger_code = Some(secret_value(trigger_code));
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HAVITUSH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HAVITUSH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("HAVITUSH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAVITUSH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HAVITUSH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAVITUSH_RULESET_SOURCE") {
            self.ruleset.source = value.parse()?;
        }
        if let Some(value) = read_env("HAVITUSH_RULESET_PATH") {
            self.ruleset.path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("HAVITUSH_RULESET_ID") {
            self.ruleset.ruleset_id = value;
        }

        if let Some(value) = read_env("HAVITUSH_SUPERVISOR_TRIGGER_CODE") {
            self.supervisor.trigger_code = Some(secret_value(value));
        }

        let log_level =
            read_env("HAVITUSH_LOGGING_LEVEL").or_else(|| read_env("HAVITUSH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HAVITUSH_LOGGING_FORMAT").or_else(|| read_env("HAVITUSH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(source) = overrides.ruleset_source {
            self.ruleset.source = source;
        }
        if let Some(path) = overrides.ruleset_path {
            self.ruleset.path = Some(path);
        }
        if let Some(trigger_code) = overrides.supervisor_trigger_code {
            self.supervisor.trigger_code = Some(secret_value(trigger_code));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_ruleset(&self.ruleset)?;
        validate_supervisor(&self.supervisor)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("havitush.toml"), PathBuf::from("config/havitush.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_ruleset(ruleset: &RulesetConfig) -> Result<(), ConfigError> {
    if ruleset.source == RulesetSource::File && ruleset.path.is_none() {
        return Err(ConfigError::Validation(
            "ruleset.path is required when ruleset.source is `file`".to_string(),
        ));
    }

    if ruleset.source == RulesetSource::Database && ruleset.ruleset_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ruleset.ruleset_id must not be empty when ruleset.source is `database`".to_string(),
        ));
    }

    Ok(())
}

fn validate_supervisor(supervisor: &SupervisorConfig) -> Result<(), ConfigError> {
    if supervisor.trigger_code().is_some_and(str::is_empty) {
        return Err(ConfigError::Validation(
            "supervisor.trigger_code must not be blank when set".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    ruleset: Option<RulesetPatch>,
    supervisor: Option<SupervisorPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesetPatch {
    source: Option<RulesetSource>,
    path: Option<PathBuf>,
    ruleset_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SupervisorPatch {
    trigger_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
