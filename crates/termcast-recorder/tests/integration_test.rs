//! Integration tests for the termcast recording engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use termcast_core::{
    Dimensions, Error, RecordingMode, RecordingOptions, RecordingSettings, Result, StopReason,
};
use termcast_recorder::{
    drive_recordings, CastFile, EventKind, RecordingController, RecordingManager,
    StartRecordingParams, StopRecordingParams, TerminalEvent, TerminalSession,
};

/// In-memory terminal session.
struct FakeSession {
    dimensions: Mutex<Dimensions>,
    events_tx: mpsc::UnboundedSender<TerminalEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TerminalEvent>>>,
    input: Mutex<Vec<u8>>,
}

impl FakeSession {
    fn new(dimensions: Dimensions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            dimensions: Mutex::new(dimensions),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            input: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: TerminalEvent) {
        self.events_tx.send(event).unwrap();
    }
}

impl TerminalSession for FakeSession {
    fn write(&self, data: &[u8]) -> Result<()> {
        self.input.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        *self.dimensions.lock().unwrap()
    }

    fn resize(&self, dimensions: Dimensions) -> Result<()> {
        *self.dimensions.lock().unwrap() = dimensions;
        self.emit(TerminalEvent::Resize(dimensions));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TerminalEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    fn dispose(&self) {}
}

fn defaults(dir: &std::path::Path) -> RecordingSettings {
    RecordingSettings {
        output_dir: Some(dir.to_path_buf()),
        max_duration: 0,
        inactivity_timeout: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_end_to_end_recording() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RecordingManager::new(defaults(dir.path()));

    let rec = manager
        .create_recording(&RecordingOptions {
            mode: Some(RecordingMode::Always),
            ..Default::default()
        })
        .unwrap();
    rec.start(Dimensions::new(24, 80), None).unwrap();

    manager.record_output_to_all("hello\n");
    manager.record_resize_to_all(Dimensions::new(30, 100));

    let meta = manager
        .finalize_recording(&rec.id(), Some(0), Some(StopReason::Explicit))
        .await
        .unwrap();

    assert!(meta.saved);
    assert_eq!(meta.stop_reason, StopReason::Explicit);
    assert_eq!(meta.exit_code, Some(0));

    let path = meta.final_path.clone().unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);

    let event_bytes: usize = lines[1..].iter().map(|line| line.len() + 1).sum();
    assert_eq!(meta.bytes_written, event_bytes as u64);

    let cast: CastFile = content.parse().unwrap();
    assert_eq!(cast.header.version, 2);
    assert_eq!((cast.header.width, cast.header.height), (80, 24));
    assert_eq!(cast.events[0].kind, EventKind::Output);
    assert_eq!(cast.events[0].data, "hello\n");
    assert_eq!(cast.events[1].kind, EventKind::Resize);
    assert_eq!(cast.events[1].data, "100x30");
    assert!(cast.events[1].time >= cast.events[0].time);

    let side = path.with_extension("meta.json");
    let side: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(side).unwrap()).unwrap();
    assert_eq!(side["exitCode"], 0);
    assert_eq!(side["stopReason"], "explicit");
    assert_eq!(side["bytesWritten"], event_bytes as u64);
}

#[tokio::test]
async fn test_policy_table() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RecordingManager::new(defaults(dir.path()));

    let cases = [
        (RecordingMode::Always, Some(0), true),
        (RecordingMode::Always, None, true),
        (RecordingMode::OnFailure, Some(0), false),
        (RecordingMode::OnFailure, Some(7), true),
        (RecordingMode::OnFailure, None, false),
    ];

    for (mode, exit_code, expected) in cases {
        let rec = manager
            .create_recording(&RecordingOptions {
                mode: Some(mode),
                ..Default::default()
            })
            .unwrap();
        rec.start(Dimensions::default(), None).unwrap();
        manager.record_output_to_all("x");

        let meta = manager
            .finalize_recording(&rec.id(), exit_code, None)
            .await
            .unwrap();
        assert_eq!(meta.saved, expected, "mode={mode:?} exit={exit_code:?}");
        assert_eq!(meta.final_path.is_some(), expected);
        assert_eq!(rec.final_path().exists(), expected);
        assert!(!rec.temp_path().exists());
    }
}

#[tokio::test]
async fn test_session_drives_recordings_to_exit() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecordingManager::new(defaults(dir.path())));
    let session = FakeSession::new(Dimensions::new(24, 80));
    let events = session.take_events().unwrap();

    let first = manager.create_recording(&RecordingOptions::default()).unwrap();
    let second = manager.create_recording(&RecordingOptions::default()).unwrap();
    first.start(session.dimensions(), None).unwrap();
    second.start(session.dimensions(), None).unwrap();

    let driver = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { drive_recordings(events, &manager).await })
    };

    session.write(b"ls\r").unwrap();
    session.emit(TerminalEvent::Output("file.txt\r\n".to_string()));
    session.resize(Dimensions::new(50, 132)).unwrap();
    session.emit(TerminalEvent::Exit(Some(0)));

    let results = driver.await.unwrap();
    assert_eq!(results.len(), 2);
    for meta in &results {
        assert_eq!(meta.stop_reason, StopReason::SessionExit);
        let cast = CastFile::load(meta.final_path.as_ref().unwrap()).unwrap();
        assert_eq!(cast.event_count(), 2);
        assert_eq!(cast.events[1].data, "132x50");
    }
    assert_eq!(manager.recording_count(), 0);
    assert_eq!(session.input.lock().unwrap().as_slice(), b"ls\r");
}

#[tokio::test]
async fn test_controller_allows_one_recording() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecordingManager::new(defaults(dir.path())));
    let controller = RecordingController::new(Arc::clone(&manager));
    let session = FakeSession::new(Dimensions::new(40, 120));

    let started = controller
        .start_recording(StartRecordingParams::default(), &session)
        .unwrap();
    assert_eq!(started.dimensions, Dimensions::new(40, 120));
    assert_eq!(controller.recording_status().count, 1);

    let err = controller
        .start_recording(StartRecordingParams::default(), &session)
        .unwrap_err();
    assert!(matches!(err, Error::RecordingInProgress(_)));
    assert_eq!(manager.recording_count(), 1);

    // The registry itself still accepts concurrent recordings.
    let direct = manager.create_recording(&RecordingOptions::default()).unwrap();
    direct.start(Dimensions::default(), None).unwrap();
    assert_eq!(manager.get_active_recordings().len(), 2);

    let stopped = controller
        .stop_recording(StopRecordingParams {
            recording_id: Some(started.recording_id.clone()),
            exit_code: Some(0),
        })
        .await
        .unwrap();
    assert!(stopped.metadata.saved);
    assert_eq!(stopped.metadata.stop_reason, StopReason::Explicit);
    assert!(stopped.message.contains("saved"));
}

#[tokio::test]
async fn test_controller_stop_defaults_to_active() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RecordingController::new(Arc::new(RecordingManager::new(defaults(dir.path()))));
    let session = FakeSession::new(Dimensions::default());

    let params: StartRecordingParams =
        serde_json::from_str(r#"{"mode": "on-failure", "idle_time_limit": 0.5}"#).unwrap();
    let started = controller.start_recording(params, &session).unwrap();
    assert_eq!(started.mode, RecordingMode::OnFailure);

    let stopped = controller
        .stop_recording(StopRecordingParams {
            recording_id: None,
            exit_code: Some(0),
        })
        .await
        .unwrap();
    assert!(!stopped.metadata.saved);
    assert!(stopped.message.contains("discarded"));
    assert_eq!(controller.recording_status().count, 0);
}

#[tokio::test]
async fn test_controller_rejects_unknown_and_repeated_stops() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RecordingController::new(Arc::new(RecordingManager::new(defaults(dir.path()))));
    let session = FakeSession::new(Dimensions::default());

    let err = controller
        .stop_recording(StopRecordingParams {
            recording_id: Some("not-a-uuid".to_string()),
            exit_code: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let started = controller
        .start_recording(StartRecordingParams::default(), &session)
        .unwrap();
    let stop = StopRecordingParams {
        recording_id: Some(started.recording_id),
        exit_code: None,
    };
    controller.stop_recording(stop.clone()).await.unwrap();

    let err = controller.stop_recording(stop).await.unwrap_err();
    assert!(matches!(err, Error::RecordingNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn test_auto_stop_notifies_owner() {
    let dir = tempfile::tempdir().unwrap();
    let manager = RecordingManager::new(defaults(dir.path()));
    let mut auto_stops = manager.take_auto_stop_receiver().unwrap();

    let rec = manager
        .create_recording(&RecordingOptions {
            inactivity_timeout: Some(3),
            ..Default::default()
        })
        .unwrap();
    rec.start(Dimensions::default(), None).unwrap();

    manager.record_output_to_all("t0");
    tokio::time::advance(Duration::from_secs(2)).await;
    manager.record_output_to_all("t2");

    let event = auto_stops.recv().await.unwrap();
    assert_eq!(event.metadata.id, rec.id());
    assert_eq!(event.metadata.stop_reason, StopReason::Inactivity);
    assert_eq!(event.metadata.exit_code, None);
    assert!(event.metadata.duration_ms >= 5000 && event.metadata.duration_ms < 5100);
    assert!(event.metadata.saved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one_recording() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(RecordingManager::new(defaults(dir.path())));
    let controller = RecordingController::new(Arc::clone(&manager));
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let barrier = Arc::clone(&barrier);
            tokio::task::spawn_blocking(move || {
                let session = FakeSession::new(Dimensions::default());
                barrier.wait();
                controller.start_recording(StartRecordingParams::default(), &session)
            })
        })
        .collect();

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(e) => assert!(matches!(e, Error::RecordingInProgress(_))),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(manager.get_active_recordings().len(), 1);
    assert_eq!(controller.recording_status().count, 1);
}
