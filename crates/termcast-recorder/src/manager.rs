//! Registry of in-flight recordings.
//!
//! The manager owns every recording it creates, keyed by id. Terminal events
//! are fanned out to each active recording on the caller's delivery path;
//! a failing recording is logged and skipped so the others still get the
//! event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use termcast_core::{
    Dimensions, Error, RecordingId, RecordingMetadata, RecordingMode, RecordingOptions,
    RecordingSettings, RecordingState, Result, StopReason,
};

use crate::recording::{AutoStopEvent, Recording};

/// Recording registry with default-option inheritance and event fan-out.
pub struct RecordingManager {
    recordings: RwLock<HashMap<RecordingId, Arc<Recording>>>,
    defaults: RecordingSettings,
    auto_stop_tx: mpsc::UnboundedSender<AutoStopEvent>,
    auto_stop_rx: Mutex<Option<mpsc::UnboundedReceiver<AutoStopEvent>>>,
}

impl RecordingManager {
    /// Create a manager whose recordings inherit `defaults`.
    pub fn new(defaults: RecordingSettings) -> Self {
        let (auto_stop_tx, auto_stop_rx) = mpsc::unbounded_channel();
        Self {
            recordings: RwLock::new(HashMap::new()),
            defaults,
            auto_stop_tx,
            auto_stop_rx: Mutex::new(Some(auto_stop_rx)),
        }
    }

    /// Defaults inherited by new recordings.
    pub fn defaults(&self) -> &RecordingSettings {
        &self.defaults
    }

    /// Take the receiver for timer-driven stops. Only the first call gets it.
    pub fn take_auto_stop_receiver(&self) -> Option<mpsc::UnboundedReceiver<AutoStopEvent>> {
        self.auto_stop_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RecordingId, Arc<Recording>>> {
        self.recordings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RecordingId, Arc<Recording>>> {
        self.recordings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a pending recording. The caller starts it.
    pub fn create_recording(&self, options: &RecordingOptions) -> Result<Arc<Recording>> {
        let settings = options.merged_over(&self.defaults);
        let recording = Recording::new(
            RecordingId::new(),
            settings,
            Some(self.auto_stop_tx.clone()),
        )?;

        let mut recordings = self.write();
        prune_finalized(&mut recordings);
        recordings.insert(recording.id(), Arc::clone(&recording));

        debug!(
            recording_id = %recording.id(),
            path = %recording.temp_path().display(),
            "Recording registered"
        );
        Ok(recording)
    }

    /// Unregister a recording that was never started. Returns whether one was removed.
    pub fn discard_pending(&self, id: &RecordingId) -> bool {
        let mut recordings = self.write();
        let pending = recordings
            .get(id)
            .is_some_and(|recording| recording.state() == RecordingState::Pending);
        if pending {
            recordings.remove(id);
        }
        pending
    }

    /// Look up a recording by id.
    pub fn get_recording(&self, id: &RecordingId) -> Option<Arc<Recording>> {
        self.read().get(id).cloned()
    }

    /// Whether a recording is registered under `id`.
    pub fn has_recording(&self, id: &RecordingId) -> bool {
        self.read().contains_key(id)
    }

    /// Every registered recording that is currently active.
    pub fn get_active_recordings(&self) -> Vec<Arc<Recording>> {
        self.read()
            .values()
            .filter(|recording| recording.is_active())
            .cloned()
            .collect()
    }

    /// Number of registered recordings.
    pub fn recording_count(&self) -> usize {
        self.read().len()
    }

    /// Summaries of every registered recording.
    pub fn list_recordings(&self) -> Vec<RecordingSummary> {
        self.read()
            .values()
            .map(|recording| RecordingSummary {
                id: recording.id(),
                mode: recording.mode(),
                state: recording.state(),
                bytes_written: recording.bytes_written(),
                temp_path: recording.temp_path().display().to_string(),
            })
            .collect()
    }

    /// Append an output event to every active recording.
    pub fn record_output_to_all(&self, data: &str) {
        for recording in self.get_active_recordings() {
            if let Err(e) = recording.record_output(data) {
                warn!(recording_id = %recording.id(), "Failed to record output: {}", e);
            }
        }
    }

    /// Append a resize event to every active recording.
    pub fn record_resize_to_all(&self, dimensions: Dimensions) {
        for recording in self.get_active_recordings() {
            if let Err(e) = recording.record_resize(dimensions) {
                warn!(recording_id = %recording.id(), "Failed to record resize: {}", e);
            }
        }
    }

    /// Finalize one recording and drop it from the registry.
    ///
    /// Fails with [`Error::RecordingNotFound`] for an unknown id and with
    /// [`Error::AlreadyFinalized`] for one a timer already stopped.
    #[instrument(skip(self))]
    pub async fn finalize_recording(
        &self,
        id: &RecordingId,
        exit_code: Option<i32>,
        stop_reason: Option<StopReason>,
    ) -> Result<RecordingMetadata> {
        let recording = self
            .write()
            .remove(id)
            .ok_or(Error::RecordingNotFound(*id))?;
        recording.finalize(exit_code, stop_reason).await
    }

    /// Finalize every active recording and clear the registry.
    ///
    /// Used when the owning session ends. Recordings that fail to finalize
    /// are logged and left out of the result.
    #[instrument(skip(self))]
    pub async fn finalize_all(
        &self,
        exit_code: Option<i32>,
        stop_reason: StopReason,
    ) -> Vec<RecordingMetadata> {
        let drained: Vec<Arc<Recording>> = self.write().drain().map(|(_, r)| r).collect();

        let mut results = Vec::new();
        for recording in drained {
            if recording.state() != RecordingState::Active {
                continue;
            }
            match recording.finalize(exit_code, Some(stop_reason)).await {
                Ok(metadata) => results.push(metadata),
                // A timer may have won the latch since the state check.
                Err(e) => warn!(recording_id = %recording.id(), "Skipped during finalize-all: {}", e),
            }
        }

        info!(count = results.len(), %stop_reason, "Finalized all recordings");
        results
    }
}

impl Default for RecordingManager {
    fn default() -> Self {
        Self::new(RecordingSettings::default())
    }
}

fn prune_finalized(recordings: &mut HashMap<RecordingId, Arc<Recording>>) {
    recordings.retain(|_, recording| recording.state() != RecordingState::Finalized);
}

/// Information about a registered recording.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    /// Recording ID
    pub id: RecordingId,
    /// Persistence policy
    pub mode: RecordingMode,
    /// Lifecycle state
    pub state: RecordingState,
    /// Bytes of event lines appended so far
    pub bytes_written: u64,
    /// Temporary write target
    pub temp_path: String,
}
