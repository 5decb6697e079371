//! Pre-flight camera/microphone check shown on the dashboard.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

use crate::media::{
    AcquisitionError, HealthMonitor, MediaConstraints, MediaDevices, MediaStream,
    MediaTrackStatus, PreviewSurface,
};

const PREVIEW_OWNER: &str = "device-check";

struct HeldStream {
    stream: MediaStream,
    _monitor: HealthMonitor,
    _forward: DropGuard,
}

/// Holds at most one check stream and publishes its readiness. The readiness
/// channel outlives individual acquisitions, so subscribers survive retries.
pub struct DeviceCheck {
    devices: Arc<dyn MediaDevices>,
    preview: PreviewSurface,
    poll_interval: Duration,
    constraints: MediaConstraints,
    held: Option<HeldStream>,
    readiness: Arc<watch::Sender<MediaTrackStatus>>,
    last_error: Option<AcquisitionError>,
}

impl DeviceCheck {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        preview: PreviewSurface,
        poll_interval: Duration,
    ) -> Self {
        let (readiness, _) = watch::channel(MediaTrackStatus::default());
        Self {
            devices,
            preview,
            poll_interval,
            constraints: MediaConstraints::preflight(),
            held: None,
            readiness: Arc::new(readiness),
            last_error: None,
        }
    }

    /// Release the current stream (if any) and request a fresh one.
    /// Safe to call repeatedly; this is the retry action.
    pub async fn acquire(&mut self) -> Result<MediaTrackStatus, AcquisitionError> {
        self.release();

        let stream = match self.devices.get_user_media(&self.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Device check failed on {} backend: {}", self.devices.name(), e);
                self.last_error = Some(e.clone());
                return Err(e);
            }
        };

        self.preview.attach(&stream, PREVIEW_OWNER);
        let monitor = HealthMonitor::spawn(stream.clone(), self.poll_interval);
        let status = monitor.status();
        self.readiness.send_replace(status);

        let mut updates = monitor.subscribe();
        let readiness = Arc::clone(&self.readiness);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *updates.borrow_and_update();
                        readiness.send_replace(status);
                    }
                }
            }
        });

        info!(
            "Device check acquired stream {} -> camera: {}, mic: {}",
            stream.id(),
            status.video_ready,
            status.audio_ready
        );

        self.last_error = None;
        self.held = Some(HeldStream {
            stream,
            _monitor: monitor,
            _forward: token.drop_guard(),
        });
        Ok(status)
    }

    /// Stop every track of the held stream and cancel its monitoring.
    pub fn release(&mut self) {
        if let Some(held) = self.held.take() {
            held.stream.stop_all();
            self.preview.detach(held.stream.id());
            info!("Device check released stream {}", held.stream.id());
        }
        self.readiness.send_replace(MediaTrackStatus::default());
    }

    pub fn readiness(&self) -> MediaTrackStatus {
        *self.readiness.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaTrackStatus> {
        self.readiness.subscribe()
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    pub fn last_error(&self) -> Option<&AcquisitionError> {
        self.last_error.as_ref()
    }
}

impl Drop for DeviceCheck {
    fn drop(&mut self) {
        self.release();
    }
}
