//! Microphone capture via cpal, and the `system` device backend.
//!
//! cpal streams are not `Send` on every platform, so each microphone track
//! owns a dedicated thread that builds, plays and finally drops the stream.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::devices::{AcquisitionError, AudioConstraints, MediaConstraints, MediaDevices};
use super::synthetic::SyntheticTrack;
use super::track::{MediaStream, MediaTrack, ReadyState, TrackEvent, TrackEventKind, TrackKind};

/// A device that delivers no audio for this long reports itself as muted.
const STALL_THRESHOLD: Duration = Duration::from_secs(1);

struct MicShared {
    id: String,
    ended: AtomicBool,
    stopped: AtomicBool,
    enabled: AtomicBool,
    pcm: Mutex<Vec<u8>>,
    last_data: Mutex<Instant>,
    events: broadcast::Sender<TrackEvent>,
}

impl MicShared {
    fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(TrackEvent {
            track_id: self.id.clone(),
            kind: TrackKind::Audio,
            event: TrackEventKind::Ended,
        });
    }
}

pub struct MicrophoneTrack {
    label: String,
    shared: Arc<MicShared>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl MicrophoneTrack {
    /// Open the default input device. Blocks until the stream is playing,
    /// so call it from a blocking context.
    pub fn open(constraints: &AudioConstraints) -> Result<Arc<Self>, AcquisitionError> {
        if constraints.echo_cancellation || constraints.noise_suppression || constraints.auto_gain_control {
            debug!("Audio processing hints are not applied to raw cpal input");
        }

        let (events, _) = broadcast::channel(32);
        let shared = Arc::new(MicShared {
            id: uuid::Uuid::new_v4().to_string(),
            ended: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            pcm: Mutex::new(Vec::new()),
            last_data: Mutex::new(Instant::now()),
            events,
        });

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<String, AcquisitionError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_shared = Arc::clone(&shared);

        std::thread::Builder::new()
            .name("exam-microphone".to_string())
            .spawn(move || {
                let (stream, label) = match build_input_stream(&thread_shared) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(label));

                // Returns on stop() or when the track is dropped.
                let _ = stop_rx.recv();
                debug!("Releasing microphone stream");
                drop(stream);
            })
            .map_err(|e| AcquisitionError::Unknown(format!("failed to spawn capture thread: {e}")))?;

        let label = ready_rx
            .recv()
            .map_err(|_| AcquisitionError::Unknown("capture thread exited".to_string()))??;

        info!("Microphone track opened: {}", label);

        Ok(Arc::new(Self {
            label,
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
        }))
    }
}

fn build_input_stream(shared: &Arc<MicShared>) -> Result<(cpal::Stream, String), AcquisitionError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AcquisitionError::DeviceNotFound)?;
    let label = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device.default_input_config().map_err(|e| {
        warn!("Failed to query input config for {}: {}", label, e);
        AcquisitionError::DeviceUnreadable
    })?;
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels.max(1) as usize;

    let data_shared = Arc::clone(shared);
    let err_shared = Arc::clone(shared);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                *data_shared
                    .last_data
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Instant::now();

                let enabled = data_shared.enabled.load(Ordering::Relaxed);
                let mut pcm = data_shared.pcm.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks(channels) {
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    let sample = if enabled {
                        (mono.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                    } else {
                        0
                    };
                    pcm.extend_from_slice(&sample.to_le_bytes());
                }
            },
            move |err| {
                error!("Microphone stream error: {}", err);
                err_shared.end();
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => AcquisitionError::DeviceNotFound,
            other => {
                warn!("Failed to build input stream on {}: {}", label, other);
                AcquisitionError::DeviceUnreadable
            }
        })?;

    stream.play().map_err(|e| {
        warn!("Failed to start input stream on {}: {}", label, e);
        AcquisitionError::DeviceUnreadable
    })?;

    Ok((stream, label))
}

impl MediaTrack for MicrophoneTrack {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        if self.shared.ended.load(Ordering::SeqCst) || self.shared.stopped.load(Ordering::SeqCst) {
            ReadyState::Ended
        } else {
            ReadyState::Live
        }
    }

    fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    /// Stalled input (no callbacks for a while) reads as muted. No event is
    /// emitted for it; the readiness poll picks it up.
    fn muted(&self) -> bool {
        let last = *self
            .shared
            .last_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.elapsed() > STALL_THRESHOLD
    }

    fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(tx) = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
            info!("Microphone track {} stopped", self.shared.id);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.shared.events.subscribe()
    }

    fn take_media(&self) -> Vec<u8> {
        let mut pcm = self.shared.pcm.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pcm)
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Real microphone through cpal plus a test-pattern camera track.
pub struct SystemDevices;

impl Default for SystemDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for SystemDevices {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, AcquisitionError> {
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let mut first_error = None;

        if let Some(video) = &constraints.video {
            debug!(
                "Using test-pattern camera (ideal {:?}x{:?})",
                video.ideal_width, video.ideal_height
            );
            tracks.push(SyntheticTrack::new(TrackKind::Video, "Test Pattern Camera"));
        }

        if let Some(audio) = constraints.audio.clone() {
            let opened = tokio::task::spawn_blocking(move || MicrophoneTrack::open(&audio))
                .await
                .map_err(|e| AcquisitionError::Unknown(e.to_string()))
                .and_then(|result| result);

            match opened {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    error!("Microphone acquisition failed: {}", e);
                    first_error = Some(e);
                }
            }
        }

        if tracks.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| AcquisitionError::Unknown("no media kinds requested".into())));
        }

        Ok(MediaStream::new(tracks))
    }
}
