//! Request handlers for starting and stopping recordings on demand.
//!
//! The registry supports any number of concurrent recordings; this layer
//! adds the policy that an on-demand request may only start one at a time.

use std::sync::{Arc, Mutex, PoisonError};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use termcast_core::{
    Dimensions, Error, RecordingId, RecordingMetadata, RecordingMode, RecordingOptions,
    RecordingState, Result, StopReason,
};

use crate::codec::CastEnv;
use crate::manager::RecordingManager;
use crate::terminal::TerminalSession;

/// Parameters for start_recording
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StartRecordingParams {
    /// Overrides for this recording; unset fields use the configured defaults
    #[serde(default, flatten)]
    pub options: RecordingOptions,
}

/// Response for start_recording
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StartRecordingResponse {
    /// Identifier to pass to stop_recording
    pub recording_id: String,
    /// Temporary file being written
    pub temp_path: String,
    /// Where the recording lands if saved
    pub final_path: String,
    /// Persistence policy
    pub mode: RecordingMode,
    /// Terminal dimensions at start
    pub dimensions: Dimensions,
    /// Success message
    pub message: String,
}

/// Parameters for stop_recording
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StopRecordingParams {
    /// Recording to stop (default: the active one)
    #[serde(default)]
    pub recording_id: Option<String>,
    /// Exit code of the monitored process, if known
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Response for stop_recording
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StopRecordingResponse {
    /// Metadata of the finished recording
    pub metadata: RecordingMetadata,
    /// Success message
    pub message: String,
}

/// Response for recording_status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordingStatusResponse {
    /// Active recordings
    pub recordings: Vec<ActiveRecordingInfo>,
    /// Total count
    pub count: usize,
}

/// Information about an active recording
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActiveRecordingInfo {
    /// Recording identifier
    pub recording_id: String,
    /// Persistence policy
    pub mode: RecordingMode,
    /// Lifecycle state
    pub state: RecordingState,
    /// Bytes of event lines written so far
    pub bytes_written: u64,
}

/// Start/stop handlers enforcing a single on-demand recording.
#[derive(Clone)]
pub struct RecordingController {
    manager: Arc<RecordingManager>,
    /// Held from the active check until the new recording is started.
    start_lock: Arc<Mutex<()>>,
}

impl RecordingController {
    /// Create a controller over a shared manager.
    pub fn new(manager: Arc<RecordingManager>) -> Self {
        Self {
            manager,
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &Arc<RecordingManager> {
        &self.manager
    }

    /// Start recording `session` at its current dimensions.
    #[instrument(skip_all)]
    pub fn start_recording(
        &self,
        params: StartRecordingParams,
        session: &dyn TerminalSession,
    ) -> Result<StartRecordingResponse> {
        let _guard = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = self.manager.get_active_recordings().first() {
            return Err(Error::RecordingInProgress(active.id()));
        }

        let recording = self.manager.create_recording(&params.options)?;
        let dimensions = session.dimensions();
        if let Err(e) = recording.start(dimensions, Some(CastEnv::from_process_env())) {
            // Never started, so nothing to commit; just unregister it.
            self.manager.discard_pending(&recording.id());
            return Err(e);
        }

        info!(recording_id = %recording.id(), "Recording started on request");
        Ok(StartRecordingResponse {
            recording_id: recording.id().to_string(),
            temp_path: recording.temp_path().display().to_string(),
            final_path: recording.final_path().display().to_string(),
            mode: recording.mode(),
            dimensions,
            message: format!(
                "Recording {} started in '{}' mode",
                recording.id(),
                recording.mode().as_str()
            ),
        })
    }

    /// Stop a recording explicitly.
    #[instrument(skip_all)]
    pub async fn stop_recording(&self, params: StopRecordingParams) -> Result<StopRecordingResponse> {
        let id = match params.recording_id.as_deref() {
            Some(raw) => raw.parse::<RecordingId>()?,
            None => self
                .manager
                .get_active_recordings()
                .first()
                .map(|recording| recording.id())
                .ok_or_else(|| Error::InvalidInput("No recording is active".to_string()))?,
        };

        let metadata = self
            .manager
            .finalize_recording(&id, params.exit_code, Some(StopReason::Explicit))
            .await?;

        let message = match &metadata.final_path {
            Some(path) => format!("Recording {id} saved to {}", path.display()),
            None => format!(
                "Recording {id} discarded ('{}' mode, exit code {:?})",
                metadata.mode.as_str(),
                metadata.exit_code
            ),
        };
        Ok(StopRecordingResponse { metadata, message })
    }

    /// List active recordings.
    pub fn recording_status(&self) -> RecordingStatusResponse {
        let recordings: Vec<ActiveRecordingInfo> = self
            .manager
            .get_active_recordings()
            .iter()
            .map(|recording| ActiveRecordingInfo {
                recording_id: recording.id().to_string(),
                mode: recording.mode(),
                state: recording.state(),
                bytes_written: recording.bytes_written(),
            })
            .collect();
        RecordingStatusResponse {
            count: recordings.len(),
            recordings,
        }
    }
}
