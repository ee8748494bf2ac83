//! Seam between a terminal session and the recordings that capture it.

use tokio::sync::mpsc;
use tracing::{debug, info};

use termcast_core::{Dimensions, RecordingMetadata, Result, StopReason};

use crate::manager::RecordingManager;

/// Something a terminal session emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// A chunk of output text
    Output(String),
    /// The terminal was resized
    Resize(Dimensions),
    /// The session's process exited (None = code unknown)
    Exit(Option<i32>),
}

/// A live terminal session that recordings can attach to.
pub trait TerminalSession: Send + Sync {
    /// Send input bytes to the session.
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Current dimensions.
    fn dimensions(&self) -> Dimensions;

    /// Resize the session. Implementations emit [`TerminalEvent::Resize`].
    fn resize(&self, dimensions: Dimensions) -> Result<()>;

    /// Take the event stream. Only the first call gets it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TerminalEvent>>;

    /// Tear down the session.
    fn dispose(&self);
}

/// Feed a session's events into the manager until the session exits.
///
/// Output and resize events are fanned out in arrival order. On exit, or when
/// the stream closes without an exit code, every active recording is
/// finalized with [`StopReason::SessionExit`].
pub async fn drive_recordings(
    mut events: mpsc::UnboundedReceiver<TerminalEvent>,
    manager: &RecordingManager,
) -> Vec<RecordingMetadata> {
    let mut exit_code = None;

    while let Some(event) = events.recv().await {
        match event {
            TerminalEvent::Output(data) => manager.record_output_to_all(&data),
            TerminalEvent::Resize(dimensions) => manager.record_resize_to_all(dimensions),
            TerminalEvent::Exit(code) => {
                exit_code = code;
                break;
            }
        }
    }

    debug!(exit_code = ?exit_code, "Terminal session ended");
    let finalized = manager
        .finalize_all(exit_code, StopReason::SessionExit)
        .await;
    info!(count = finalized.len(), "Recordings closed on session exit");
    finalized
}
