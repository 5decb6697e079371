//! Software capture devices.
//!
//! Synthetic tracks generate a fixed byte rate of patterned media and can be
//! unplugged, muted or disabled on demand. `SyntheticDevices` grants them with
//! per-kind availability so permission denials, missing hardware and busy
//! devices can be reproduced without a camera or microphone attached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use super::devices::{AcquisitionError, MediaConstraints, MediaDevices};
use super::track::{MediaStream, MediaTrack, ReadyState, TrackEvent, TrackEventKind, TrackKind};

/// Bytes per second produced by a synthetic video track.
const VIDEO_BYTES_PER_SECOND: u64 = 96_000;
/// Bytes per second produced by a synthetic audio track (16 kHz mono PCM16).
const AUDIO_BYTES_PER_SECOND: u64 = 32_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAvailability {
    Available,
    /// The user refused the permission prompt.
    Denied,
    /// No device of this kind is attached.
    Missing,
    /// The device exists but another process holds it.
    Busy,
}

impl DeviceAvailability {
    fn into_error(self) -> Option<AcquisitionError> {
        match self {
            DeviceAvailability::Available => None,
            DeviceAvailability::Denied => Some(AcquisitionError::PermissionDenied),
            DeviceAvailability::Missing => Some(AcquisitionError::DeviceNotFound),
            DeviceAvailability::Busy => Some(AcquisitionError::DeviceUnreadable),
        }
    }
}

struct TrackState {
    ready_state: ReadyState,
    enabled: bool,
    muted: bool,
    stopped: bool,
    last_drain: Instant,
}

pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    label: String,
    bytes_per_second: u64,
    state: Mutex<TrackState>,
    events: broadcast::Sender<TrackEvent>,
}

impl SyntheticTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Arc<Self> {
        let bytes_per_second = match kind {
            TrackKind::Video => VIDEO_BYTES_PER_SECOND,
            TrackKind::Audio => AUDIO_BYTES_PER_SECOND,
        };
        let (events, _) = broadcast::channel(32);

        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            bytes_per_second,
            state: Mutex::new(TrackState {
                ready_state: ReadyState::Live,
                enabled: true,
                muted: false,
                stopped: false,
                last_drain: Instant::now(),
            }),
            events,
        })
    }

    /// Simulate the device disappearing: the track ends and emits `Ended`.
    pub fn end(&self) {
        {
            let mut state = self.lock();
            if state.ready_state == ReadyState::Ended {
                return;
            }
            state.ready_state = ReadyState::Ended;
        }
        info!("Synthetic {} track {} ended", self.kind.as_str(), self.label);
        self.emit(TrackEventKind::Ended);
    }

    pub fn set_muted(&self, muted: bool) {
        {
            let mut state = self.lock();
            if state.ready_state == ReadyState::Ended || state.muted == muted {
                return;
            }
            state.muted = muted;
        }
        self.emit(if muted {
            TrackEventKind::Mute
        } else {
            TrackEventKind::Unmute
        });
    }

    /// Toggle the enabled flag. Like real tracks, this emits no event.
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    /// True once the owner released the track through `stop()`.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    fn emit(&self, event: TrackEventKind) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(TrackEvent {
            track_id: self.id.clone(),
            kind: self.kind,
            event,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pattern_byte(&self) -> u8 {
        match self.kind {
            TrackKind::Video => b'V',
            TrackKind::Audio => b'A',
        }
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        self.lock().ready_state
    }

    fn enabled(&self) -> bool {
        self.lock().enabled
    }

    fn muted(&self) -> bool {
        self.lock().muted
    }

    fn stop(&self) {
        let mut state = self.lock();
        if !state.stopped {
            debug!("Stopping synthetic {} track {}", self.kind.as_str(), self.id);
        }
        state.stopped = true;
        state.ready_state = ReadyState::Ended;
    }

    fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.events.subscribe()
    }

    fn take_media(&self) -> Vec<u8> {
        let mut state = self.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_drain);
        state.last_drain = now;

        if state.ready_state == ReadyState::Ended {
            return Vec::new();
        }

        let len = (elapsed.as_millis() as u64 * self.bytes_per_second / 1000) as usize;
        // Muted or disabled sources still produce frames, just blank ones.
        let fill = if state.muted || !state.enabled {
            0
        } else {
            self.pattern_byte()
        };
        vec![fill; len]
    }
}

struct DevicesState {
    video: DeviceAvailability,
    audio: DeviceAvailability,
    acquisitions: usize,
    issued: Vec<Arc<SyntheticTrack>>,
}

/// Synthetic `MediaDevices` backend with fault injection.
pub struct SyntheticDevices {
    state: Mutex<DevicesState>,
    latency: Duration,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DevicesState {
                video: DeviceAvailability::Available,
                audio: DeviceAvailability::Available,
                acquisitions: 0,
                issued: Vec::new(),
            }),
            latency: Duration::ZERO,
        }
    }

    pub fn with_video(self, availability: DeviceAvailability) -> Self {
        self.set_availability(TrackKind::Video, availability);
        self
    }

    pub fn with_audio(self, availability: DeviceAvailability) -> Self {
        self.set_availability(TrackKind::Audio, availability);
        self
    }

    /// Delay every acquisition, like a permission prompt waiting for a click.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_availability(&self, kind: TrackKind, availability: DeviceAvailability) {
        let mut state = self.lock();
        match kind {
            TrackKind::Video => state.video = availability,
            TrackKind::Audio => state.audio = availability,
        }
    }

    /// Number of acquisition requests that reached the devices.
    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }

    /// Most recently granted track of the given kind.
    pub fn latest_track(&self, kind: TrackKind) -> Option<Arc<SyntheticTrack>> {
        self.lock()
            .issued
            .iter()
            .rev()
            .find(|t| t.kind == kind)
            .cloned()
    }

    pub fn issued_tracks(&self) -> Vec<Arc<SyntheticTrack>> {
        self.lock().issued.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DevicesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, AcquisitionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.lock();
        state.acquisitions += 1;

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        let mut first_error = None;

        let requested = [
            (TrackKind::Video, constraints.video.is_some(), state.video),
            (TrackKind::Audio, constraints.audio.is_some(), state.audio),
        ];

        for (kind, wanted, availability) in requested {
            if !wanted {
                continue;
            }
            match availability.into_error() {
                None => {
                    let label = match kind {
                        TrackKind::Video => "Synthetic Camera",
                        TrackKind::Audio => "Synthetic Microphone",
                    };
                    let track = SyntheticTrack::new(kind, label);
                    state.issued.push(track.clone());
                    tracks.push(track);
                }
                Some(err) => {
                    debug!("Synthetic {} device unavailable: {}", kind.as_str(), err);
                    first_error.get_or_insert(err);
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
