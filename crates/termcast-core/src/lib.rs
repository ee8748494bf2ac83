//! # termcast-core
//!
//! Core types for termcast.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other termcast crates. It provides:
//!
//! - Terminal geometry (Dimensions)
//! - Recording identity, lifecycle state, options and metadata
//! - Configuration and default output locations
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other termcast crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod paths;
pub mod recording;

// Re-export commonly used types
pub use config::{RecorderConfig, TerminalSettings};
pub use error::{Error, Result};
pub use geometry::Dimensions;
pub use paths::{default_output_dir, RECORDING_DIR_ENV};
pub use recording::{
    MetadataSideFile, RecordingFormat, RecordingId, RecordingMetadata, RecordingMode,
    RecordingOptions, RecordingSettings, RecordingState, StopReason,
};
