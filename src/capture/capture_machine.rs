//! Recording session state machine.
//!
//! One machine per session: acquire devices → record with a countdown →
//! finish or hardware failure → hand off the artifact.
//!
//! Each machine is a single tokio task. Commands, the countdown, recorder
//! events, track events and readiness updates are multiplexed in one
//! `select!` loop, so all session state lives on one logical thread.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::exam::recording::Recording;
use crate::media::{
    select_mime_type, AcquisitionError, HealthMonitor, MediaConstraints, MediaDevices,
    MediaRecorder, MediaStream, PreviewSurface, RecorderEvent, RecorderFactory, RecorderState,
    TrackEventKind,
};

use super::status::{CapturePhase, CaptureStatus, CaptureStatusHandle};

const TICK: Duration = Duration::from_secs(1);

/// Timing and device hints for one session.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub duration: Duration,
    /// Wait before requesting devices so a just-released stream can free the hardware.
    pub acquire_delay: Duration,
    pub health_poll: Duration,
    pub constraints: MediaConstraints,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            acquire_delay: Duration::from_millis(500),
            health_poll: Duration::from_millis(500),
            constraints: MediaConstraints::recording(),
        }
    }
}

impl CaptureOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            duration: Duration::from_secs(config.session.duration_seconds as u64),
            acquire_delay: config.session.acquire_delay(),
            health_poll: config.devices.health_poll(),
            constraints: MediaConstraints::from(&config.devices),
        }
    }
}

/// Collaborators shared by every session of an exam.
#[derive(Clone)]
pub struct CaptureContext {
    pub devices: Arc<dyn MediaDevices>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub preview: PreviewSurface,
}

#[derive(Debug)]
enum CaptureCommand {
    Finish,
    RescueContinue,
}

/// Owner's side of a running session. Dropping it tears the session down.
pub struct CaptureHandle {
    session_number: u8,
    status: CaptureStatusHandle,
    commands: mpsc::UnboundedSender<CaptureCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn session_number(&self) -> u8 {
        self.session_number
    }

    /// Finish early. Ignored unless the session is recording.
    pub fn finish(&self) {
        self.send(CaptureCommand::Finish);
    }

    /// Proceed with the partial capture after a hardware failure.
    pub fn rescue_continue(&self) {
        self.send(CaptureCommand::RescueContinue);
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    /// Cancel the session and wait until its devices are released.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Session {} task panicked: {}", self.session_number, e);
                }
            }
        }
    }

    fn send(&self, command: CaptureCommand) {
        if self.commands.send(command).is_err() {
            debug!("Session {} is no longer running", self.session_number);
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct CaptureMachine {
    session_number: u8,
    full_name: String,
    options: CaptureOptions,
    context: CaptureContext,
    status: CaptureStatusHandle,
    commands: mpsc::UnboundedReceiver<CaptureCommand>,
    cancel: CancellationToken,
    on_complete: Option<oneshot::Sender<Recording>>,
}

impl CaptureMachine {
    /// Start a session. The artifact arrives on `on_complete` at most once;
    /// the sender is dropped unsent if the session fails or is disposed.
    pub fn spawn(
        session_number: u8,
        full_name: impl Into<String>,
        options: CaptureOptions,
        context: CaptureContext,
        on_complete: oneshot::Sender<Recording>,
    ) -> CaptureHandle {
        let status = CaptureStatusHandle::new(CaptureStatus::new(
            session_number,
            options.duration.as_secs() as u32,
        ));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let machine = Self {
            session_number,
            full_name: full_name.into(),
            options,
            context,
            status: status.clone(),
            commands: commands_rx,
            cancel: cancel.clone(),
            on_complete: Some(on_complete),
        };

        let task = tokio::spawn(machine.run());

        CaptureHandle {
            session_number,
            status,
            commands: commands_tx,
            cancel,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        let Some(stream) = self.acquire().await else {
            return;
        };

        let owner = format!("session-{}", self.session_number);
        self.context.preview.attach(&stream, &owner);

        self.record(&stream).await;

        stream.stop_all();
        self.context.preview.detach(stream.id());
        debug!("Session {} released its devices", self.session_number);
    }

    async fn acquire(&mut self) -> Option<MediaStream> {
        info!("Session {} acquiring devices", self.session_number);

        // Commands that arrive before recording starts are dropped, not queued.
        let delay = tokio::time::sleep(self.options.acquire_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                command = self.commands.recv() => match command {
                    Some(command) => warn!("Session {} ignored {:?} while acquiring", self.session_number, command),
                    None => return None,
                },
                _ = &mut delay => break,
            }
        }

        let request = self.context.devices.get_user_media(&self.options.constraints);
        tokio::pin!(request);
        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Session {} disposed while acquiring", self.session_number);
                    return None;
                }
                command = self.commands.recv() => match command {
                    Some(command) => warn!("Session {} ignored {:?} while acquiring", self.session_number, command),
                    None => return None,
                },
                result = &mut request => break result,
            }
        };

        match result {
            Ok(stream) => {
                info!(
                    "Session {} acquired stream {} ({} tracks)",
                    self.session_number,
                    stream.id(),
                    stream.tracks().len()
                );
                Some(stream)
            }
            Err(e) => {
                error!("Session {} acquisition failed: {}", self.session_number, e);
                self.status.fail(e);
                None
            }
        }
    }

    async fn record(&mut self, stream: &MediaStream) {
        let mut track_events = stream.subscribe();
        let monitor = HealthMonitor::spawn(stream.clone(), self.options.health_poll);
        let mut readiness = monitor.subscribe();
        self.status.set_readiness(monitor.status());

        let (events_tx, mut recorder_events) = mpsc::unbounded_channel();
        let mime = select_mime_type(self.context.recorders.as_ref());
        let created = self
            .context
            .recorders
            .create(stream.clone(), mime, events_tx)
            .and_then(|mut recorder| recorder.start().map(|()| recorder));

        let mut recorder = match created {
            Ok(recorder) => recorder,
            Err(e) => {
                error!("Session {} could not start recording: {}", self.session_number, e);
                self.status.fail(AcquisitionError::Unknown(e.to_string()));
                return;
            }
        };

        let mime_type = recorder.mime_type().to_string();
        self.status.start_recording(&mime_type);
        info!(
            "Session {} recording ({}, {}s)",
            self.session_number,
            mime_type,
            self.options.duration.as_secs()
        );

        let cancel = self.cancel.clone();
        let mut countdown = tokio::time::interval_at(Instant::now() + TICK, TICK);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut phase = CapturePhase::Recording;
        let mut expected_end = false;
        let mut recorder_open = true;
        let mut events_open = true;
        let mut readiness_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Session {} disposed while {}", self.session_number, phase.as_str());
                    return;
                }
                event = recorder_events.recv(), if recorder_open => match event {
                    Some(RecorderEvent::DataAvailable(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        debug!("Session {} chunk {} ({} bytes)", self.session_number, chunks.len() + 1, chunk.len());
                        self.status.record_chunk(chunk.len());
                        chunks.push(chunk);
                    }
                    Some(RecorderEvent::Stopped) if expected_end => break,
                    Some(RecorderEvent::Stopped) => {
                        debug!("Session {} recorder stopped without finish, awaiting rescue", self.session_number);
                    }
                    None => {
                        recorder_open = false;
                        if expected_end {
                            break;
                        }
                    }
                },
                command = self.commands.recv() => match command {
                    Some(CaptureCommand::Finish) if phase == CapturePhase::Recording => {
                        info!("Session {} finished by user", self.session_number);
                        phase = CapturePhase::Finishing;
                        expected_end = true;
                        self.status.set_phase(phase);
                        if !request_stop(recorder.as_mut(), recorder_open) {
                            break;
                        }
                    }
                    Some(CaptureCommand::RescueContinue) if phase == CapturePhase::HardwareFailure => {
                        warn!(
                            "Session {} continuing after hardware failure with {} chunks",
                            self.session_number,
                            chunks.len()
                        );
                        break;
                    }
                    Some(command) => {
                        warn!("Session {} ignored {:?} while {}", self.session_number, command, phase.as_str());
                    }
                    None => return,
                },
                _ = countdown.tick(), if phase == CapturePhase::Recording => {
                    if self.status.tick() == 0 {
                        info!("Session {} time is up", self.session_number);
                        phase = CapturePhase::Finishing;
                        expected_end = true;
                        self.status.set_phase(phase);
                        if !request_stop(recorder.as_mut(), recorder_open) {
                            break;
                        }
                    }
                }
                event = track_events.recv(), if events_open => match event {
                    Some(event) if event.event == TrackEventKind::Ended => {
                        if phase == CapturePhase::Recording && !expected_end {
                            error!(
                                "Session {} lost its {} track {}",
                                self.session_number,
                                event.kind.as_str(),
                                event.track_id
                            );
                            phase = CapturePhase::HardwareFailure;
                            self.status.set_phase(phase);
                            if recorder.state() == RecorderState::Recording {
                                recorder.stop();
                            }
                        }
                    }
                    Some(_) => {}
                    None => events_open = false,
                },
                changed = readiness.changed(), if readiness_open => match changed {
                    Ok(()) => {
                        let status = *readiness.borrow_and_update();
                        self.status.set_readiness(status);
                    }
                    Err(_) => readiness_open = false,
                },
            }
        }

        drop(recorder);
        self.finalize(stream, chunks, &mime_type);
    }

    /// Build the artifact, release the tracks, then hand off.
    fn finalize(&mut self, stream: &MediaStream, chunks: Vec<Vec<u8>>, mime_type: &str) {
        let recording = Recording::assemble(self.session_number, &self.full_name, mime_type, chunks);
        stream.stop_all();
        self.status.set_phase(CapturePhase::Completed);

        info!(
            "Session {} completed: {} ({} bytes)",
            self.session_number,
            recording.suggested_filename(),
            recording.data().len()
        );

        if let Some(on_complete) = self.on_complete.take() {
            if on_complete.send(recording).is_err() {
                warn!("Session {} recording was not collected", self.session_number);
            }
        }
    }
}

/// Ask the recorder to flush and stop. Returns false when no `Stopped` event
/// will follow, so the caller must finalize right away.
fn request_stop(recorder: &mut dyn MediaRecorder, recorder_open: bool) -> bool {
    if !recorder_open || recorder.state() == RecorderState::Inactive {
        return false;
    }
    recorder.stop();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        DeviceAvailability, RecorderError, SyntheticDevices, TimesliceRecorderFactory, TrackKind,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Recorder whose data events are pushed by the test.
    #[derive(Default)]
    struct ScriptedFactory {
        events: Mutex<Option<mpsc::UnboundedSender<RecorderEvent>>>,
        stops: Arc<AtomicUsize>,
    }

    impl ScriptedFactory {
        fn emit(&self, chunk: &[u8]) {
            let events = self.events.lock().unwrap();
            events
                .as_ref()
                .expect("recorder created")
                .send(RecorderEvent::DataAvailable(chunk.to_vec()))
                .unwrap();
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    struct ScriptedRecorder {
        events: mpsc::UnboundedSender<RecorderEvent>,
        state: RecorderState,
        stops: Arc<AtomicUsize>,
    }

    impl MediaRecorder for ScriptedRecorder {
        fn mime_type(&self) -> &str {
            "video/webm"
        }

        fn state(&self) -> RecorderState {
            self.state
        }

        fn start(&mut self) -> Result<(), RecorderError> {
            self.state = RecorderState::Recording;
            Ok(())
        }

        fn stop(&mut self) {
            self.state = RecorderState::Inactive;
            self.stops.fetch_add(1, Ordering::SeqCst);
            let _ = self.events.send(RecorderEvent::Stopped);
        }
    }

    impl RecorderFactory for ScriptedFactory {
        fn is_type_supported(&self, mime_type: &str) -> bool {
            mime_type == "video/webm"
        }

        fn create(
            &self,
            _stream: MediaStream,
            _mime_type: Option<&str>,
            events: mpsc::UnboundedSender<RecorderEvent>,
        ) -> Result<Box<dyn MediaRecorder>, RecorderError> {
            *self.events.lock().unwrap() = Some(events.clone());
            Ok(Box::new(ScriptedRecorder {
                events,
                state: RecorderState::Inactive,
                stops: self.stops.clone(),
            }))
        }
    }

    struct Harness {
        devices: Arc<SyntheticDevices>,
        preview: PreviewSurface,
        handle: CaptureHandle,
        completed: oneshot::Receiver<Recording>,
    }

    fn start(devices: SyntheticDevices, recorders: Arc<dyn RecorderFactory>) -> Harness {
        let devices = Arc::new(devices);
        let preview = PreviewSurface::new();
        let context = CaptureContext {
            devices: devices.clone(),
            recorders,
            preview: preview.clone(),
        };
        let (tx, completed) = oneshot::channel();
        let handle = CaptureMachine::spawn(1, "Asep Sadboy", CaptureOptions::default(), context, tx);

        Harness {
            devices,
            preview,
            handle,
            completed,
        }
    }

    async fn wait_for_phase(handle: &CaptureHandle, phase: CapturePhase) {
        let mut rx = handle.subscribe();
        rx.wait_for(|status| status.phase == phase).await.unwrap();
    }

    fn all_released(devices: &SyntheticDevices) -> bool {
        devices.issued_tracks().iter().all(|t| t.is_stopped())
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_kept_in_arrival_order_without_empties() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders.clone());
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;

        recorders.emit(b"one ");
        recorders.emit(b"");
        recorders.emit(b"two ");
        recorders.emit(b"three");
        harness.handle.finish();

        let recording = harness.completed.await.unwrap();
        assert_eq!(recording.data(), b"one two three");
        assert_eq!(recording.mime_type(), "video/webm");
        assert_eq!(recording.suggested_filename(), "Asep_Sadboy_Session_1.webm");
        assert_eq!(harness.handle.status().chunks, 3);
        assert_eq!(recorders.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_finishes_once_at_zero() {
        let recorders = Arc::new(TimesliceRecorderFactory::new(Duration::from_secs(1)));
        let mut harness = start(SyntheticDevices::new(), recorders);
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;
        let started = Instant::now();

        tokio::time::sleep(Duration::from_millis(59_500)).await;
        let status = harness.handle.status();
        assert_eq!(status.phase, CapturePhase::Recording);
        assert_eq!(status.time_remaining, 1);
        assert!(harness.completed.try_recv().is_err());

        let recording = (&mut harness.completed).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "finished early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "finished late: {elapsed:?}");

        let status = harness.handle.status();
        assert_eq!(status.phase, CapturePhase::Completed);
        assert_eq!(status.time_remaining, 0);
        assert!(!recording.is_empty());
        assert!(all_released(&harness.devices));
        assert!(harness.preview.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_finish_hands_off_once() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders.clone());
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;

        recorders.emit(b"data");
        harness.handle.finish();
        harness.handle.finish();
        harness.handle.rescue_continue();

        let recording = harness.completed.await.unwrap();
        assert_eq!(recording.data(), b"data");
        assert_eq!(recorders.stops(), 1);
        assert_eq!(harness.handle.status().phase, CapturePhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_loss_waits_for_rescue() {
        let recorders = Arc::new(ScriptedFactory::default());
        let mut harness = start(SyntheticDevices::new(), recorders.clone());
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;

        recorders.emit(b"before loss");
        harness.devices.latest_track(TrackKind::Audio).unwrap().end();
        wait_for_phase(&harness.handle, CapturePhase::HardwareFailure).await;
        assert_eq!(recorders.stops(), 1);

        // The unexpected stop neither finalizes nor keeps the countdown going.
        tokio::time::sleep(Duration::from_secs(120)).await;
        let status = harness.handle.status();
        assert_eq!(status.phase, CapturePhase::HardwareFailure);
        assert!(status.time_remaining > 0);
        assert!(harness.completed.try_recv().is_err());

        // Finish is not a way out of the failure.
        harness.handle.finish();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(harness.completed.try_recv().is_err());

        harness.handle.rescue_continue();
        let recording = (&mut harness.completed).await.unwrap();
        assert_eq!(recording.data(), b"before loss");
        assert!(all_released(&harness.devices));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescue_without_chunks_still_hands_off() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders);
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;

        harness.devices.latest_track(TrackKind::Video).unwrap().end();
        wait_for_phase(&harness.handle, CapturePhase::HardwareFailure).await;
        harness.handle.rescue_continue();

        let recording = harness.completed.await.unwrap();
        assert!(recording.is_empty());
        assert_eq!(harness.handle.status().phase, CapturePhase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure_is_terminal() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(
            SyntheticDevices::new()
                .with_video(DeviceAvailability::Denied)
                .with_audio(DeviceAvailability::Denied),
            recorders,
        );

        wait_for_phase(&harness.handle, CapturePhase::Failed).await;
        let status = harness.handle.status();
        assert_eq!(status.error, Some(AcquisitionError::PermissionDenied));
        assert!(harness.preview.current().is_none());
        assert!(harness.completed.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_while_acquiring_is_dropped() {
        let recorders = Arc::new(ScriptedFactory::default());
        let mut harness = start(
            SyntheticDevices::new().with_latency(Duration::from_secs(1)),
            recorders.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.handle.status().phase, CapturePhase::Acquiring);
        harness.handle.finish();

        // Finish lands again while the device request is still pending.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(harness.handle.status().phase, CapturePhase::Acquiring);
        harness.handle.finish();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = harness.handle.status();
        assert_eq!(status.phase, CapturePhase::Recording);
        assert!(status.time_remaining < 60);
        assert_eq!(recorders.stops(), 0);
        assert!(harness.completed.try_recv().is_err());

        recorders.emit(b"late but real");
        harness.handle.finish();
        let recording = harness.completed.await.unwrap();
        assert_eq!(recording.data(), b"late but real");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_acquiring_skips_request() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders);

        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.handle.dispose().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.devices.acquisitions(), 0);
        assert!(harness.completed.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_recording_releases_everything() {
        let recorders = Arc::new(TimesliceRecorderFactory::new(Duration::from_secs(1)));
        let harness = start(SyntheticDevices::new(), recorders);
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status_rx = harness.handle.subscribe();
        harness.handle.dispose().await;
        let before = status_rx.borrow().clone();

        tokio::time::sleep(Duration::from_secs(120)).await;
        let after = status_rx.borrow().clone();
        assert_eq!(before, after, "no chunk or tick after teardown");
        assert_eq!(after.phase, CapturePhase::Recording);
        assert!(all_released(&harness.devices));
        assert!(harness.preview.current().is_none());
        assert!(harness.completed.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_tears_down() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders);
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;
        assert!(harness.preview.current().is_some());

        drop(harness.handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(all_released(&harness.devices));
        assert!(harness.preview.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_tracks_session_stream() {
        let recorders = Arc::new(ScriptedFactory::default());
        let harness = start(SyntheticDevices::new(), recorders);
        wait_for_phase(&harness.handle, CapturePhase::Recording).await;
        assert!(harness.handle.status().readiness.all_ready());

        harness
            .devices
            .latest_track(TrackKind::Video)
            .unwrap()
            .set_enabled(false);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let readiness = harness.handle.status().readiness;
        assert!(!readiness.video_ready);
        assert!(readiness.audio_ready);
        assert_eq!(harness.handle.status().phase, CapturePhase::Recording);
    }
}
