//! End-to-end exam scenarios against synthetic devices on virtual time.

use async_trait::async_trait;
use exam_studio::app::{CommandError, ExamController, ExamHandle, ExamSnapshot};
use exam_studio::auth::Authenticator;
use exam_studio::capture::{CaptureContext, CaptureOptions, CapturePhase};
use exam_studio::exam::{ExamStep, FlowError};
use exam_studio::media::{
    DeviceAvailability, PreviewSurface, SyntheticDevices, TimesliceRecorderFactory, TrackKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct AcceptAll;

#[async_trait]
impl Authenticator for AcceptAll {
    async fn authenticate(&self, _full_name: &str, _password: &str) -> bool {
        true
    }
}

fn start_controller(devices: &Arc<SyntheticDevices>) -> ExamHandle {
    let context = CaptureContext {
        devices: devices.clone(),
        recorders: Arc::new(TimesliceRecorderFactory::new(Duration::from_secs(1))),
        preview: PreviewSurface::new(),
    };
    let controller = ExamController::new(Arc::new(AcceptAll), context, CaptureOptions::default());
    let (handle, _task) = controller.spawn();
    handle
}

async fn wait_until(
    handle: &ExamHandle,
    what: &str,
    done: impl Fn(&ExamSnapshot) -> bool,
) -> ExamSnapshot {
    for _ in 0..2_000 {
        let snapshot = handle.snapshot().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_phase(handle: &ExamHandle, phase: CapturePhase) -> ExamSnapshot {
    wait_until(handle, phase.as_str(), |s| {
        s.session.as_ref().map(|session| session.status.phase) == Some(phase)
    })
    .await
}

async fn wait_for_step(handle: &ExamHandle, step: ExamStep) -> ExamSnapshot {
    wait_until(handle, &step.to_string(), |s| s.step == step).await
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_blocks_start_without_camera() {
    let devices = Arc::new(SyntheticDevices::new().with_video(DeviceAvailability::Denied));
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.step, ExamStep::Dashboard);
    let check = snapshot.devices.unwrap();
    assert!(!check.readiness.video_ready);
    assert!(check.readiness.audio_ready);
    assert!(!check.can_start);

    let err = handle.start_exam().await.unwrap_err();
    assert!(matches!(err, CommandError::Flow(FlowError::DevicesNotReady)));
    assert_eq!(handle.snapshot().await.unwrap().step, ExamStep::Dashboard);

    devices.set_availability(TrackKind::Video, DeviceAvailability::Available);
    let readiness = handle.retry_devices().await.unwrap();
    assert!(readiness.all_ready());
    assert_eq!(handle.start_exam().await.unwrap(), ExamStep::Session(1));
}

#[tokio::test(start_paused = true)]
async fn test_check_stream_released_before_first_session() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();
    let check_tracks = devices.issued_tracks();
    assert_eq!(check_tracks.len(), 2);

    handle.start_exam().await.unwrap();
    assert!(check_tracks.iter().all(|t| t.is_stopped()));

    let snapshot = wait_for_phase(&handle, CapturePhase::Recording).await;
    assert_eq!(snapshot.preview.unwrap().owner, "session-1");
    assert_eq!(devices.acquisitions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_full_session_produces_one_artifact() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();
    handle.start_exam().await.unwrap();

    wait_for_phase(&handle, CapturePhase::Recording).await;
    handle.finish_session().await.unwrap();
    wait_for_step(&handle, ExamStep::Break(1)).await;
    assert_eq!(handle.continue_from_break().await.unwrap(), ExamStep::Session(2));

    let snapshot = wait_for_phase(&handle, CapturePhase::Recording).await;
    let session = snapshot.session.unwrap();
    assert_eq!(session.status.session_number, 2);
    assert_eq!(session.script.title, "Phonetic Transcription (American IPA)");
    let started = Instant::now();

    let snapshot = wait_for_step(&handle, ExamStep::Break(2)).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(59), "ended after {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(61), "ended after {elapsed:?}");
    assert_eq!(snapshot.up_next, Some("Original Text Reading"));

    let session_two: Vec<_> = snapshot
        .recordings
        .iter()
        .filter(|r| r.session_number == 2)
        .collect();
    assert_eq!(session_two.len(), 1);
    assert_eq!(session_two[0].filename, "Asep_Sadboy_Session_2.webm");
    assert!(session_two[0].size_bytes > 0);
    assert_eq!(snapshot.recordings.len(), 2);

    assert!(devices.issued_tracks().iter().all(|t| t.is_stopped()));
    assert!(snapshot.preview.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_camera_loss_mid_session_keeps_partial_capture() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();
    handle.start_exam().await.unwrap();
    wait_for_phase(&handle, CapturePhase::Recording).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    devices.latest_track(TrackKind::Video).unwrap().end();

    let snapshot = wait_for_phase(&handle, CapturePhase::HardwareFailure).await;
    let status = snapshot.session.unwrap().status;
    assert!((19..=21).contains(&status.chunks), "chunks: {}", status.chunks);

    // Nothing moves on its own while the rescue prompt is up.
    tokio::time::sleep(Duration::from_secs(90)).await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.step, ExamStep::Session(1));
    assert!(snapshot.recordings.is_empty());

    handle.rescue_session().await.unwrap();
    let snapshot = wait_for_step(&handle, ExamStep::Break(1)).await;
    assert_eq!(snapshot.up_next, Some("Phonetic Transcription (IPA)"));

    let recording = handle.recording(1).await.unwrap().unwrap();
    assert_eq!(recording.suggested_filename(), "Asep_Sadboy_Session_1.webm");
    assert!(recording.data().len() >= 19 * 96_000);
    assert!(devices.issued_tracks().iter().all(|t| t.is_stopped()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_recovers_on_reload() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();

    devices.set_availability(TrackKind::Video, DeviceAvailability::Busy);
    devices.set_availability(TrackKind::Audio, DeviceAvailability::Busy);
    // Readiness came from the earlier check; the session itself fails.
    handle.start_exam().await.unwrap();

    let snapshot = wait_for_phase(&handle, CapturePhase::Failed).await;
    let status = snapshot.session.unwrap().status;
    assert_eq!(
        status.error.unwrap().to_string(),
        "Hardware error. Camera might be in use."
    );

    devices.set_availability(TrackKind::Video, DeviceAvailability::Available);
    devices.set_availability(TrackKind::Audio, DeviceAvailability::Available);
    assert_eq!(handle.reload_session().await.unwrap(), 1);
    wait_for_phase(&handle, CapturePhase::Recording).await;

    handle.finish_session().await.unwrap();
    wait_for_step(&handle, ExamStep::Break(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_reload_replaces_running_session() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);
    handle.login("Asep Sadboy", "secret").await.unwrap();
    handle.start_exam().await.unwrap();
    wait_for_phase(&handle, CapturePhase::Recording).await;
    let first_session = devices.issued_tracks();

    handle.reload_session().await.unwrap();
    assert!(first_session.iter().all(|t| t.is_stopped()));

    let snapshot = wait_for_phase(&handle, CapturePhase::Recording).await;
    let status = snapshot.session.unwrap().status;
    assert_eq!(status.time_remaining, 60);
    assert_eq!(status.chunks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_commands_outside_sessions_conflict() {
    let devices = Arc::new(SyntheticDevices::new());
    let handle = start_controller(&devices);

    assert!(matches!(
        handle.finish_session().await,
        Err(CommandError::Flow(FlowError::InvalidStep { .. }))
    ));
    assert!(matches!(
        handle.continue_from_break().await,
        Err(CommandError::Flow(FlowError::InvalidStep { .. }))
    ));
    assert!(matches!(
        handle.retry_devices().await,
        Err(CommandError::Flow(FlowError::InvalidStep { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_running_session() {
    let devices = Arc::new(SyntheticDevices::new());
    let preview = PreviewSurface::new();
    let context = CaptureContext {
        devices: devices.clone(),
        recorders: Arc::new(TimesliceRecorderFactory::new(Duration::from_secs(1))),
        preview: preview.clone(),
    };
    let (handle, task) =
        ExamController::new(Arc::new(AcceptAll), context, CaptureOptions::default()).spawn();

    handle.login("Asep Sadboy", "secret").await.unwrap();
    handle.start_exam().await.unwrap();
    wait_for_phase(&handle, CapturePhase::Recording).await;
    assert_eq!(devices.issued_tracks().len(), 4);

    // A clone elsewhere keeps the command channel open; shutdown still stops.
    let server_side = handle.clone();
    handle.shutdown();
    task.await.unwrap();

    assert!(devices.issued_tracks().iter().all(|t| t.is_stopped()));
    assert!(preview.current().is_none());
    assert!(matches!(
        server_side.snapshot().await,
        Err(CommandError::Unavailable)
    ));
}
