use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;
use crate::flow::DEFAULT_EVENT_CAPACITY;

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Driving tick of the binary's loop
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Broadcast channel capacity of the event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Begin step 0 as soon as the flow begins
    #[serde(default = "default_true")]
    pub auto_start_first: bool,

    /// Step ids that are runtime-disabled at compile
    #[serde(default)]
    pub disabled_steps: Vec<String>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            event_capacity: default_event_capacity(),
            auto_start_first: true,
            disabled_steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Also write logs under the data directory
    #[serde(default)]
    pub file: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        use directories::ProjectDirs;
        let proj_dirs = ProjectDirs::from("", "", "stepflow").ok_or(ConfigError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist yet.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load() {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.flow.tick_interval_ms, 50);
        assert_eq!(config.flow.event_capacity, 256);
        assert!(config.flow.auto_start_first);
        assert!(!config.logging.file);
    }

    #[test]
    fn test_partial_flow_table() {
        let config: Config = toml::from_str(
            r#"
            [flow]
            auto_start_first = false
            disabled_steps = ["intro"]
            "#,
        )
        .unwrap();
        assert!(!config.flow.auto_start_first);
        assert_eq!(config.flow.disabled_steps, vec!["intro".to_string()]);
        assert_eq!(config.flow.tick_interval_ms, 50);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.flow.tick_interval_ms = 20;
        config.logging.file = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::NotFound(p)) if p == path
        ));
    }
}
