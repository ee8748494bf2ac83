//! Recording identity, options and the metadata produced when a recording ends.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::paths::default_output_dir;
use crate::Error;

/// Unique identifier for a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RecordingId(Uuid);

impl RecordingId {
    /// Create a new random recording ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex characters, used in artifact file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl From<Uuid> for RecordingId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for RecordingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("Invalid recording ID format: {s}")))
    }
}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistence policy applied when a recording is finalized.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingMode {
    /// Keep every recording
    #[default]
    Always,
    /// Keep only recordings whose monitored process exited non-zero
    OnFailure,
}

impl RecordingMode {
    /// Decide whether a finished recording is kept.
    ///
    /// An unknown exit code (`None`) never counts as a failure.
    pub fn should_save(self, exit_code: Option<i32>) -> bool {
        match self {
            RecordingMode::Always => true,
            RecordingMode::OnFailure => matches!(exit_code, Some(code) if code != 0),
        }
    }

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordingMode::Always => "always",
            RecordingMode::OnFailure => "on-failure",
        }
    }
}

impl FromStr for RecordingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(RecordingMode::Always),
            "on-failure" => Ok(RecordingMode::OnFailure),
            other => Err(Error::InvalidInput(format!(
                "Unknown recording mode '{other}' (expected 'always' or 'on-failure')"
            ))),
        }
    }
}

/// Event log format. Only asciicast v2 is supported.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum RecordingFormat {
    /// Newline-delimited asciicast v2
    #[default]
    #[serde(rename = "asciicast-v2")]
    AsciicastV2,
}

impl RecordingFormat {
    /// File extension of the event log.
    pub fn extension(self) -> &'static str {
        match self {
            RecordingFormat::AsciicastV2 => "cast",
        }
    }
}

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A caller asked for it
    Explicit,
    /// The owning terminal session ended
    SessionExit,
    /// The maximum duration elapsed
    MaxDuration,
    /// No output arrived for the inactivity timeout
    Inactivity,
}

impl StopReason {
    /// Wire name of the stop reason.
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Explicit => "explicit",
            StopReason::SessionExit => "session_exit",
            StopReason::MaxDuration => "max_duration",
            StopReason::Inactivity => "inactivity",
        }
    }

    /// Whether a timer, rather than a caller, ended the recording.
    pub fn is_automatic(self) -> bool {
        matches!(self, StopReason::MaxDuration | StopReason::Inactivity)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Created, not yet started
    Pending,
    /// Capturing events
    Active,
    /// Terminal state; no further transitions
    Finalized,
}

/// Fully resolved options for a recording.
///
/// Also the `recording` section of the configuration file, where it provides
/// the defaults new recordings inherit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecordingSettings {
    /// Event log format
    pub format: RecordingFormat,
    /// Persistence policy
    pub mode: RecordingMode,
    /// Directory for recordings (None = platform default)
    pub output_dir: Option<PathBuf>,
    /// Idle gap cap in seconds (0 = no capping)
    pub idle_time_limit: f64,
    /// Maximum wall-clock life in seconds (0 = unbounded)
    pub max_duration: u64,
    /// Seconds without output before auto-stop (0 = disabled)
    pub inactivity_timeout: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            format: RecordingFormat::AsciicastV2,
            mode: RecordingMode::Always,
            output_dir: None,
            idle_time_limit: 2.0,
            max_duration: 3600,
            inactivity_timeout: 600,
        }
    }
}

impl RecordingSettings {
    /// The configured output directory, or the platform default.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }

    /// Validate option values.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.idle_time_limit.is_finite() || self.idle_time_limit < 0.0 {
            return Err(Error::Config(format!(
                "idle_time_limit must be a non-negative number, got {}",
                self.idle_time_limit
            )));
        }
        Ok(())
    }
}

/// Per-recording overrides. Unset fields inherit the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordingOptions {
    /// Event log format
    #[serde(default)]
    pub format: Option<RecordingFormat>,
    /// Persistence policy
    #[serde(default)]
    pub mode: Option<RecordingMode>,
    /// Directory for recordings
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Idle gap cap in seconds (0 = no capping)
    #[serde(default)]
    pub idle_time_limit: Option<f64>,
    /// Maximum wall-clock life in seconds (0 = unbounded)
    #[serde(default)]
    pub max_duration: Option<u64>,
    /// Seconds without output before auto-stop (0 = disabled)
    #[serde(default)]
    pub inactivity_timeout: Option<u64>,
}

impl RecordingOptions {
    /// Apply these overrides on top of `defaults`.
    pub fn merged_over(&self, defaults: &RecordingSettings) -> RecordingSettings {
        RecordingSettings {
            format: self.format.unwrap_or(defaults.format),
            mode: self.mode.unwrap_or(defaults.mode),
            output_dir: self
                .output_dir
                .clone()
                .or_else(|| defaults.output_dir.clone()),
            idle_time_limit: self.idle_time_limit.unwrap_or(defaults.idle_time_limit),
            max_duration: self.max_duration.unwrap_or(defaults.max_duration),
            inactivity_timeout: self
                .inactivity_timeout
                .unwrap_or(defaults.inactivity_timeout),
        }
    }
}

/// Summary of a finished recording, returned from every finalize path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordingMetadata {
    /// Recording identifier
    pub id: RecordingId,
    /// Committed event log (None when discarded)
    pub final_path: Option<PathBuf>,
    /// Temporary write target used during capture
    pub temp_path: PathBuf,
    /// Wall-clock start
    pub start_time: DateTime<Utc>,
    /// Wall-clock end
    pub end_time: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Bytes of event lines appended to the log
    pub bytes_written: u64,
    /// Exit code of the monitored process (None = unknown)
    pub exit_code: Option<i32>,
    /// Persistence policy
    pub mode: RecordingMode,
    /// Whether the event log was kept
    pub saved: bool,
    /// Why the recording ended
    pub stop_reason: StopReason,
}

/// Contents of the `.meta.json` file written next to a saved event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSideFile {
    /// Exit code of the monitored process
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Wall-clock start
    pub start_time: DateTime<Utc>,
    /// Wall-clock end
    pub end_time: DateTime<Utc>,
    /// Bytes of event lines appended to the log
    pub bytes_written: u64,
    /// Why the recording ended
    pub stop_reason: StopReason,
}

impl From<&RecordingMetadata> for MetadataSideFile {
    fn from(meta: &RecordingMetadata) -> Self {
        Self {
            exit_code: meta.exit_code,
            duration_ms: meta.duration_ms,
            start_time: meta.start_time,
            end_time: meta.end_time,
            bytes_written: meta.bytes_written,
            stop_reason: meta.stop_reason,
        }
    }
}
