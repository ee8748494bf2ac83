//! Asciicast v2 event log encoding.
//!
//! The format is newline-delimited JSON, compatible with asciinema
//! (https://asciinema.org/):
//! 1. A header line (JSON object with metadata)
//! 2. Event lines (JSON arrays with `[time, kind, data]`)

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use termcast_core::{Error, Result};

/// Format version written in every header.
pub const CAST_VERSION: u8 = 2;

/// Environment hints recorded in the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastEnv {
    /// Login shell
    #[serde(rename = "SHELL", skip_serializing_if = "Option::is_none", default)]
    pub shell: Option<String>,
    /// Terminal type
    #[serde(rename = "TERM", skip_serializing_if = "Option::is_none", default)]
    pub term: Option<String>,
}

impl CastEnv {
    /// Capture `SHELL` and `TERM` from the process environment.
    pub fn from_process_env() -> Self {
        Self {
            shell: std::env::var("SHELL").ok(),
            term: std::env::var("TERM").ok(),
        }
    }

    /// Whether neither hint is set.
    pub fn is_empty(&self) -> bool {
        self.shell.is_none() && self.term.is_none()
    }
}

/// Asciicast v2 header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastHeader {
    /// Format version (always 2)
    pub version: u8,
    /// Terminal width
    pub width: u16,
    /// Terminal height
    pub height: u16,
    /// Unix timestamp of recording start
    pub timestamp: i64,
    /// Environment hints
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub env: Option<CastEnv>,
}

impl CastHeader {
    /// Header for a capture of `width` x `height` starting at `timestamp`.
    pub fn new(width: u16, height: u16, timestamp: i64, env: Option<CastEnv>) -> Self {
        Self {
            version: CAST_VERSION,
            width,
            height,
            timestamp,
            env: env.filter(|env| !env.is_empty()),
        }
    }
}

/// Kind of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Terminal output
    #[serde(rename = "o")]
    Output,
    /// Terminal input
    #[serde(rename = "i")]
    Input,
    /// Terminal resize, payload `<cols>x<rows>`
    #[serde(rename = "r")]
    Resize,
}

/// A single event line.
#[derive(Debug, Clone, PartialEq)]
pub struct CastEvent {
    /// Seconds since recording start on the logical timeline
    pub time: f64,
    /// Event kind
    pub kind: EventKind,
    /// Payload
    pub data: String,
}

impl CastEvent {
    /// Create an event.
    pub fn new(time: f64, kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            time,
            kind,
            data: data.into(),
        }
    }
}

/// Encode the header as one JSON line (no trailing newline).
pub fn encode_header(header: &CastHeader) -> Result<String> {
    Ok(serde_json::to_string(header)?)
}

/// Encode an event as one JSON array line (no trailing newline).
///
/// Times are rounded to microseconds.
pub fn encode_event(event: &CastEvent) -> Result<String> {
    let time = (event.time * 1_000_000.0).round() / 1_000_000.0;
    Ok(serde_json::to_string(&(time, event.kind, &event.data))?)
}

/// A parsed event log.
#[derive(Debug, Clone, PartialEq)]
pub struct CastFile {
    /// Header record
    pub header: CastHeader,
    /// Event records in file order
    pub events: Vec<CastEvent>,
}

impl CastFile {
    /// Load and parse an event log from disk.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Number of events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Logical duration: the time of the last event.
    pub fn duration(&self) -> f64 {
        self.events.last().map(|e| e.time).unwrap_or(0.0)
    }
}

impl FromStr for CastFile {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        parse_cast(content)
    }
}

/// Parse an asciicast v2 event log.
pub fn parse_cast(content: &str) -> Result<CastFile> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| Error::Parse("Empty recording file".to_string()))?;
    let header: CastHeader = serde_json::from_str(header_line)
        .map_err(|e| Error::Parse(format!("Invalid header: {e}")))?;
    if header.version != CAST_VERSION {
        return Err(Error::Parse(format!(
            "Unsupported asciicast version {}",
            header.version
        )));
    }

    let mut events = Vec::new();
    for (index, line) in lines {
        let (time, kind, data): (f64, EventKind, String) = serde_json::from_str(line)
            .map_err(|e| Error::Parse(format!("Invalid event on line {}: {e}", index + 1)))?;
        events.push(CastEvent { time, kind, data });
    }

    Ok(CastFile { header, events })
}
