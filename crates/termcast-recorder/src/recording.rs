//! A single capture: timestamps events, appends them to a temporary asciicast
//! file, and commits or discards that file when finalized.
//!
//! Lifecycle is `Pending -> Active -> Finalized`. The `Finalized` state is a
//! latch taken under the recording's lock: exactly one of an explicit
//! `finalize`, the max-duration timer or the inactivity timer gets past it.

use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use termcast_core::{
    Dimensions, Error, MetadataSideFile, RecordingId, RecordingMetadata, RecordingMode,
    RecordingSettings, RecordingState, Result, StopReason,
};

use crate::codec::{encode_event, encode_header, CastEnv, CastEvent, CastHeader, EventKind};

/// Sent when a timer, not a caller, ended a recording.
#[derive(Debug, Clone)]
pub struct AutoStopEvent {
    /// Metadata of the finalized recording
    pub metadata: RecordingMetadata,
}

/// Logical clock that compresses long idle gaps.
///
/// The first event is stamped with the true time since start. Each later
/// event advances the clock by the real gap since the previous event, capped
/// at `idle_limit` when one is set.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedClock {
    start: Instant,
    last_event: Option<Instant>,
    adjusted: Duration,
    idle_limit: Option<Duration>,
}

impl ElapsedClock {
    /// Create a clock starting at `start`. `idle_time_limit` is in seconds;
    /// zero disables capping.
    pub fn new(start: Instant, idle_time_limit: f64) -> Self {
        let idle_limit = if idle_time_limit > 0.0 {
            Duration::try_from_secs_f64(idle_time_limit).ok()
        } else {
            None
        };
        Self {
            start,
            last_event: None,
            adjusted: Duration::ZERO,
            idle_limit,
        }
    }

    /// Advance the clock to an event at `now` and return its stamp in seconds.
    pub fn stamp(&mut self, now: Instant) -> f64 {
        match self.last_event {
            None => self.adjusted = now.saturating_duration_since(self.start),
            Some(last) => {
                let idle = now.saturating_duration_since(last);
                self.adjusted += match self.idle_limit {
                    Some(limit) if idle > limit => limit,
                    _ => idle,
                };
            }
        }
        self.last_event = Some(now);
        self.adjusted.as_secs_f64()
    }

    /// Stamp of the most recent event (zero before the first).
    pub fn adjusted_elapsed(&self) -> Duration {
        self.adjusted
    }
}

struct Inner {
    state: RecordingState,
    writer: Option<Box<dyn Write + Send>>,
    clock: Option<ElapsedClock>,
    started_at: Option<(Instant, DateTime<Utc>)>,
    bytes_written: u64,
    stop_reason: Option<StopReason>,
    runtime: Option<Handle>,
    max_duration_timer: Option<JoinHandle<()>>,
    inactivity_timer: Option<JoinHandle<()>>,
    inactivity_deadline: Option<Instant>,
}

/// What `finalize` carries out of the lock once the latch is set.
struct Closing {
    writer: Option<Box<dyn Write + Send>>,
    started_at: (Instant, DateTime<Utc>),
    ended_at: (Instant, DateTime<Utc>),
    bytes_written: u64,
    stop_reason: StopReason,
}

/// One capture producing one asciicast event log.
pub struct Recording {
    id: RecordingId,
    settings: RecordingSettings,
    output_dir: PathBuf,
    temp_path: PathBuf,
    final_path: PathBuf,
    auto_stop_tx: Option<mpsc::UnboundedSender<AutoStopEvent>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("id", &self.id)
            .field("mode", &self.settings.mode)
            .field("temp_path", &self.temp_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Recording {
    /// Create a pending recording with fully resolved settings.
    ///
    /// Timer-driven stops are reported on `auto_stop_tx` when one is given.
    pub fn new(
        id: RecordingId,
        settings: RecordingSettings,
        auto_stop_tx: Option<mpsc::UnboundedSender<AutoStopEvent>>,
    ) -> Result<Arc<Self>> {
        settings.validate()?;

        let output_dir = settings.resolved_output_dir();
        let stem = format!(
            "termcast-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            id.short()
        );
        let extension = settings.format.extension();
        let final_path = output_dir.join(format!("{stem}.{extension}"));
        let temp_path = output_dir.join(format!(".{stem}.{extension}.part"));

        Ok(Arc::new(Self {
            id,
            settings,
            output_dir,
            temp_path,
            final_path,
            auto_stop_tx,
            inner: Mutex::new(Inner {
                state: RecordingState::Pending,
                writer: None,
                clock: None,
                started_at: None,
                bytes_written: 0,
                stop_reason: None,
                runtime: None,
                max_duration_timer: None,
                inactivity_timer: None,
                inactivity_deadline: None,
            }),
        }))
    }

    /// Recording identifier.
    pub fn id(&self) -> RecordingId {
        self.id
    }

    /// Resolved settings.
    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Persistence policy.
    pub fn mode(&self) -> RecordingMode {
        self.settings.mode
    }

    /// Temporary write target used during capture.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Where the event log lands if it is saved.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Path of the metadata side-file written next to a saved log.
    pub fn metadata_path(&self) -> PathBuf {
        self.final_path.with_extension("meta.json")
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecordingState {
        self.lock().state
    }

    /// Bytes of event lines appended so far.
    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// Why the recording ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stop_reason
    }

    /// True iff the write target is open and the recording is not finalized.
    pub fn is_active(&self) -> bool {
        let inner = self.lock();
        inner.state == RecordingState::Active && inner.writer.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the temporary file, write the header and arm the auto-stop timers.
    ///
    /// Must be called from within a tokio runtime; the timers run on it.
    pub fn start(self: &Arc<Self>, dimensions: Dimensions, env: Option<CastEnv>) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != RecordingState::Pending {
            return Err(Error::AlreadyStarted(self.id));
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("Recording timers need a tokio runtime: {e}")))?;

        let started_at = (Instant::now(), Utc::now());
        let header = CastHeader::new(
            dimensions.cols,
            dimensions.rows,
            started_at.1.timestamp(),
            env,
        );
        let file = self.create_temp_file(&header)?;

        inner.writer = Some(Box::new(file));
        inner.clock = Some(ElapsedClock::new(
            started_at.0,
            self.settings.idle_time_limit,
        ));
        inner.started_at = Some(started_at);
        inner.runtime = Some(runtime);
        inner.state = RecordingState::Active;

        if self.settings.max_duration > 0 {
            let deadline = started_at.0 + Duration::from_secs(self.settings.max_duration);
            inner.max_duration_timer = self.spawn_timer(&inner, deadline, StopReason::MaxDuration);
        }
        if let Some(deadline) = self.push_inactivity_deadline(&mut inner, started_at.0) {
            inner.inactivity_timer = self.spawn_timer(&inner, deadline, StopReason::Inactivity);
        }

        info!(
            recording_id = %self.id,
            path = %self.temp_path.display(),
            mode = self.settings.mode.as_str(),
            "Recording started at {}",
            dimensions
        );
        Ok(())
    }

    /// Create the temporary file holding just the header line. A file that
    /// could not be completed is removed again.
    fn create_temp_file(&self, header: &CastHeader) -> Result<File> {
        fs::create_dir_all(&self.output_dir)?;
        let mut line = encode_header(header)?;
        line.push('\n');

        let file = File::create(&self.temp_path)?;
        Ok(write_or_remove(file, &self.temp_path, line.as_bytes())?)
    }

    /// Append an output event and restart the inactivity countdown.
    ///
    /// Does nothing unless the recording is active.
    pub fn record_output(&self, data: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != RecordingState::Active {
            return Ok(());
        }
        self.push_inactivity_deadline(&mut inner, Instant::now());
        self.append(&mut inner, EventKind::Output, data.to_string())
    }

    /// Append a resize event. The inactivity countdown is left alone.
    ///
    /// Does nothing unless the recording is active.
    pub fn record_resize(&self, dimensions: Dimensions) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != RecordingState::Active {
            return Ok(());
        }
        self.append(&mut inner, EventKind::Resize, dimensions.to_string())
    }

    fn append(&self, inner: &mut Inner, kind: EventKind, data: String) -> Result<()> {
        let (Some(writer), Some(clock)) = (inner.writer.as_mut(), inner.clock.as_ref()) else {
            return Err(Error::NotStarted(self.id));
        };

        // Only commit the clock once the line is written.
        let mut next = *clock;
        let time = next.stamp(Instant::now());

        let mut line = encode_event(&CastEvent::new(time, kind, data))?;
        line.push('\n');
        writer.write_all(line.as_bytes())?;

        inner.clock = Some(next);
        inner.bytes_written += line.len() as u64;
        debug!(recording_id = %self.id, time, bytes = line.len(), "Appended {:?} event", kind);
        Ok(())
    }

    /// Move the inactivity deadline to `timeout` after `now`. The running
    /// inactivity timer picks the new deadline up when its current one passes.
    fn push_inactivity_deadline(&self, inner: &mut Inner, now: Instant) -> Option<Instant> {
        if self.settings.inactivity_timeout == 0 {
            return None;
        }
        let deadline = now + Duration::from_secs(self.settings.inactivity_timeout);
        inner.inactivity_deadline = Some(deadline);
        Some(deadline)
    }

    fn spawn_timer(
        self: &Arc<Self>,
        inner: &Inner,
        deadline: Instant,
        reason: StopReason,
    ) -> Option<JoinHandle<()>> {
        let runtime = inner.runtime.as_ref()?;
        let recording: Weak<Self> = Arc::downgrade(self);
        debug!(recording_id = %self.id, %reason, "Arming auto-stop timer");

        Some(runtime.spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(recording) = recording.upgrade() else {
                    return;
                };
                match recording.auto_finalize(reason, deadline).await {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        }))
    }

    /// Timer entry point for a timer whose `due` deadline has passed.
    ///
    /// Returns the later deadline to wait for when output arrived in the
    /// meantime. A no-op if the recording is already finalized.
    async fn auto_finalize(&self, reason: StopReason, due: Instant) -> Option<Instant> {
        let closing = {
            let mut inner = self.lock();
            if reason == StopReason::Inactivity {
                if let Some(next) = inner.inactivity_deadline.filter(|next| *next > due) {
                    return Some(next);
                }
            }
            match self.close(&mut inner, reason, true) {
                Ok(closing) => closing,
                Err(e) => {
                    debug!(recording_id = %self.id, %reason, "Auto-stop skipped: {}", e);
                    return None;
                }
            }
        };

        info!(recording_id = %self.id, %reason, "Recording auto-stopped");
        let metadata = self.commit(closing, None).await;
        if let Some(tx) = &self.auto_stop_tx {
            if tx.send(AutoStopEvent { metadata }).is_err() {
                debug!(recording_id = %self.id, "No listener for auto-stop events");
            }
        }
        None
    }

    /// Stop capturing and commit or discard the event log.
    ///
    /// Saves when the mode is `always`, or when it is `on-failure` and
    /// `exit_code` is a non-zero code. A second call fails with
    /// [`Error::AlreadyFinalized`].
    #[instrument(skip_all, fields(recording_id = %self.id))]
    pub async fn finalize(
        &self,
        exit_code: Option<i32>,
        stop_reason: Option<StopReason>,
    ) -> Result<RecordingMetadata> {
        let closing = {
            let mut inner = self.lock();
            self.close(&mut inner, stop_reason.unwrap_or(StopReason::Explicit), false)?
        };
        Ok(self.commit(closing, exit_code).await)
    }

    /// Take the finalized latch and detach everything `commit` needs.
    fn close(&self, inner: &mut Inner, reason: StopReason, from_timer: bool) -> Result<Closing> {
        match inner.state {
            RecordingState::Pending => return Err(Error::NotStarted(self.id)),
            RecordingState::Finalized => return Err(Error::AlreadyFinalized(self.id)),
            RecordingState::Active => {}
        }
        let started_at = inner.started_at.ok_or(Error::NotStarted(self.id))?;

        inner.state = RecordingState::Finalized;
        inner.stop_reason = Some(reason);
        inner.inactivity_deadline = None;

        // The timer that fired is the task running this; aborting it would
        // cancel the commit at its first await.
        for (timer, kind) in [
            (inner.max_duration_timer.take(), StopReason::MaxDuration),
            (inner.inactivity_timer.take(), StopReason::Inactivity),
        ] {
            if let Some(timer) = timer {
                if !(from_timer && kind == reason) {
                    timer.abort();
                }
            }
        }

        Ok(Closing {
            writer: inner.writer.take(),
            started_at,
            ended_at: (Instant::now(), Utc::now()),
            bytes_written: inner.bytes_written,
            stop_reason: reason,
        })
    }

    /// Apply the persistence policy. A log that should be kept but cannot be
    /// moved into place is reported as not saved and left at the temp path.
    async fn commit(&self, closing: Closing, exit_code: Option<i32>) -> RecordingMetadata {
        if let Some(mut writer) = closing.writer {
            if let Err(e) = writer.flush() {
                warn!(recording_id = %self.id, "Failed to flush recording: {}", e);
            }
        }

        let duration = closing
            .ended_at
            .0
            .saturating_duration_since(closing.started_at.0);
        let mut saved = self.settings.mode.should_save(exit_code);

        let final_path = if saved {
            match persist(&self.temp_path, &self.final_path).await {
                Ok(()) => Some(self.final_path.clone()),
                Err(e) => {
                    error!(
                        recording_id = %self.id,
                        path = %self.temp_path.display(),
                        "Failed to save recording, leaving it at the temp path: {}", e
                    );
                    saved = false;
                    None
                }
            }
        } else {
            match tokio::fs::remove_file(&self.temp_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    recording_id = %self.id,
                    path = %self.temp_path.display(),
                    "Failed to delete discarded recording: {}", e
                ),
            }
            None
        };

        let metadata = RecordingMetadata {
            id: self.id,
            final_path,
            temp_path: self.temp_path.clone(),
            start_time: closing.started_at.1,
            end_time: closing.ended_at.1,
            duration_ms: duration.as_millis() as u64,
            bytes_written: closing.bytes_written,
            exit_code,
            mode: self.settings.mode,
            saved,
            stop_reason: closing.stop_reason,
        };

        if saved {
            if let Err(e) = self.write_side_file(&metadata).await {
                warn!(recording_id = %self.id, "Failed to write recording metadata: {}", e);
            }
        }

        info!(
            recording_id = %self.id,
            saved,
            stop_reason = %metadata.stop_reason,
            exit_code = ?exit_code,
            bytes = metadata.bytes_written,
            "Recording finalized"
        );
        metadata
    }

    async fn write_side_file(&self, metadata: &RecordingMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(&MetadataSideFile::from(metadata))?;
        tokio::fs::write(self.metadata_path(), json).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replace_writer(&self, writer: Box<dyn Write + Send>) {
        self.lock().writer = Some(writer);
    }
}

/// Write `bytes` to a freshly created `file`, deleting `path` if that fails.
fn write_or_remove<W: Write>(mut file: W, path: &Path, bytes: &[u8]) -> io::Result<W> {
    if let Err(e) = file.write_all(bytes) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(path = %path.display(), "Failed to remove incomplete recording: {}", remove_err);
        }
        return Err(e);
    }
    Ok(file)
}

/// Move `from` to `to`, copying then deleting when a rename is not possible
/// (e.g. across filesystems).
async fn persist(from: &Path, to: &Path) -> io::Result<()> {
    persist_with(
        from,
        to,
        |from, to| tokio::fs::rename(from, to),
        |path| tokio::fs::remove_file(path),
    )
    .await
}

async fn persist_with<R, RF, D, DF>(
    from: &Path,
    to: &Path,
    rename: R,
    remove: D,
) -> io::Result<()>
where
    R: FnOnce(PathBuf, PathBuf) -> RF,
    RF: Future<Output = io::Result<()>>,
    D: FnOnce(PathBuf) -> DF,
    DF: Future<Output = io::Result<()>>,
{
    let rename_err = match rename(from.to_path_buf(), to.to_path_buf()).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!(from = %from.display(), "Rename failed ({}), copying instead", rename_err);

    tokio::fs::copy(from, to).await?;
    if let Err(e) = remove(from.to_path_buf()).await {
        warn!(path = %from.display(), "Recording copied but temp file left behind: {}", e);
    }
    Ok(())
}
