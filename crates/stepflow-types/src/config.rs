//! Engine configuration types.
//!
//! Deserialized from `stepflow.toml`. Every field has a default so a partial
//! (or missing) file still yields a usable configuration.

use serde::{Deserialize, Serialize};

use crate::security::DEFAULT_MAX_SCRIPT_SIZE;

/// Default script timeout (30 seconds).
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 30;

/// Default bound on one interactive read (5 minutes).
pub const DEFAULT_INPUT_TIMEOUT_SECS: u64 = 300;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Floor for the workflow's `max_retries`; a step's own `retry` block wins.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Script step timeout when the step does not set one.
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,
    /// Scripts larger than this are rejected before validation.
    #[serde(default = "default_max_script_size")]
    pub max_script_size: usize,
    /// Commands rejected in every script, trusted or not.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// How long an `ask_user` read waits for an answer.
    #[serde(default = "default_input_timeout")]
    pub input_timeout_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_max_attempts(),
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            max_script_size: DEFAULT_MAX_SCRIPT_SIZE,
            blocked_commands: Vec::new(),
            input_timeout_secs: DEFAULT_INPUT_TIMEOUT_SECS,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_script_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_SECS
}

fn default_input_timeout() -> u64 {
    DEFAULT_INPUT_TIMEOUT_SECS
}

fn default_max_script_size() -> usize {
    DEFAULT_MAX_SCRIPT_SIZE
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.script_timeout_secs, 30);
        assert_eq!(config.input_timeout_secs, 300);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config: EngineConfig = toml::from_str(
            r#"
default_max_attempts = 3
blocked_commands = ["docker", "terraform"]

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.blocked_commands, vec!["docker", "terraform"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.otel);
        assert_eq!(config.max_script_size, DEFAULT_MAX_SCRIPT_SIZE);
    }
}
