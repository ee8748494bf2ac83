//! Configuration types for termcast.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::recording::RecordingSettings;
use crate::Error;

/// Recorder configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Defaults inherited by new recordings
    pub recording: RecordingSettings,
    /// Terminal settings
    pub terminal: TerminalSettings,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recording: RecordingSettings::default(),
            terminal: TerminalSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: RecorderConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        self.recording.validate()?;

        if self.terminal.default_rows == 0 || self.terminal.default_cols == 0 {
            return Err(Error::Config("terminal dimensions must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Default terminal rows
    pub default_rows: u16,
    /// Default terminal columns
    pub default_cols: u16,
    /// TERM environment variable value
    pub term: String,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            default_rows: 24,
            default_cols: 80,
            term: "xterm-256color".to_string(),
        }
    }
}
