//! Dashboard configuration
//!
//! Loaded from a JSON file; every field is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datalog::default_log_dir;
use crate::keymap::KEY_MAP_FILE_NAME;
use crate::protocol::{InterpreterMode, SerialSettings};
use crate::registry::DEFAULT_FAULT_MESSAGES;

/// Errors loading or saving a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no_map_warning_interval must be at least 1")]
    ZeroInterval,
}

/// Runtime settings of an ECU session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Serial line
    pub serial: SerialSettings,
    /// Directory session logs are written to
    pub log_dir: PathBuf,
    /// Persisted key map file
    pub key_map_path: PathBuf,
    /// Initial interpreter mode
    pub interpreter_mode: InterpreterMode,
    /// Warn on the first and then every Nth chunk dropped for lack of a key map
    pub no_map_warning_interval: u32,
    /// Message texts treated as vehicle faults
    pub fault_messages: Vec<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            log_dir: default_log_dir(),
            key_map_path: default_log_dir()
                .parent()
                .map(|dir| dir.join(KEY_MAP_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(KEY_MAP_FILE_NAME)),
            interpreter_mode: InterpreterMode::Ascii,
            no_map_warning_interval: 8,
            fault_messages: DEFAULT_FAULT_MESSAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DashboardConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.no_map_warning_interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DashboardConfig::from_json("{}").unwrap();
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.stop_bits, 2);
        assert_eq!(config.no_map_warning_interval, 8);
        assert_eq!(config.interpreter_mode, InterpreterMode::Ascii);
    }

    #[test]
    fn test_partial_config() {
        let config = DashboardConfig::from_json(
            r#"{
                "serial": { "port": "/dev/ttyACM0" },
                "log_dir": "/tmp/logs",
                "interpreter_mode": "hex",
                "fault_messages": ["[ERROR] Boom"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.interpreter_mode, InterpreterMode::Hex);
        assert_eq!(config.fault_messages, vec!["[ERROR] Boom".to_string()]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            DashboardConfig::from_json(r#"{"no_map_warning_interval": 0}"#),
            Err(ConfigError::ZeroInterval)
        ));
        assert!(matches!(
            DashboardConfig::from_json("[1, 2]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        let mut config = DashboardConfig::default();
        config.no_map_warning_interval = 3;
        config.save(&path).unwrap();

        assert_eq!(DashboardConfig::from_file(&path).unwrap(), config);
        assert!(matches!(
            DashboardConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
