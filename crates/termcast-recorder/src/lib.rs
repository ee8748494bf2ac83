//! # termcast-recorder
//!
//! Recording engine for termcast.
//!
//! This crate provides:
//! - Asciicast v2 encoding and parsing
//! - Recordings with idle-compressed timing and auto-stop timers
//! - A registry that fans terminal events out to every active recording
//! - The terminal session seam and a PTY-backed implementation
//! - Start/stop request handlers
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on termcast-core
//! and is driven by the termcast binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod control;
pub mod manager;
pub mod pty;
pub mod recording;
pub mod terminal;

// Re-export commonly used types
pub use codec::{CastEnv, CastEvent, CastFile, CastHeader, EventKind};
pub use control::{
    RecordingController, RecordingStatusResponse, StartRecordingParams, StartRecordingResponse,
    StopRecordingParams, StopRecordingResponse,
};
pub use manager::{RecordingManager, RecordingSummary};
pub use pty::{PtyOptions, PtyTerminal};
pub use recording::{AutoStopEvent, ElapsedClock, Recording};
pub use terminal::{drive_recordings, TerminalEvent, TerminalSession};
