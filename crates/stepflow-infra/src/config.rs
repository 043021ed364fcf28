//! Engine configuration loader.
//!
//! Reads `stepflow.toml` from a config directory (`~/.config/stepflow/` by
//! default) and deserializes it into [`EngineConfig`]. Falls back to defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use stepflow_types::config::EngineConfig;

/// File name looked up inside the config directory.
pub const CONFIG_FILE_NAME: &str = "stepflow.toml";

/// Platform config directory for stepflow, if the platform has one.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stepflow"))
}

/// Load engine configuration from `{dir}/stepflow.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or malformed file: logs a warning and returns the default.
pub async fn load_engine_config(dir: &Path) -> EngineConfig {
    let path = dir.join(CONFIG_FILE_NAME);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", path.display());
        return EngineConfig::default();
    }

    match read_engine_config(&path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err:#}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Read and parse one config file, failing on any error.
pub async fn read_engine_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::config::LogFormat;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
default_max_attempts = 2
script_timeout_secs = 90
blocked_commands = ["docker"]

[logging]
format = "json"
otel = true
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_max_attempts, 2);
        assert_eq!(config.script_timeout_secs, 90);
        assert_eq!(config.blocked_commands, vec!["docker"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.otel);
    }

    #[tokio::test]
    async fn malformed_toml_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "script_timeout_secs = \"soon\"")
            .await
            .unwrap();

        assert_eq!(load_engine_config(tmp.path()).await, EngineConfig::default());

        let err = read_engine_config(&tmp.path().join(CONFIG_FILE_NAME))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn default_dir_ends_with_stepflow() {
        if let Some(dir) = default_config_dir() {
            assert!(dir.ends_with("stepflow"));
        }
    }
}
