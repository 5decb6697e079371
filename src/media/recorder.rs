//! Recording primitive: turns a live stream into ordered data chunks.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::track::{MediaStream, TrackKind};

/// Encoding formats to probe, most preferred first. When none is supported
/// the recorder falls back to its platform default.
pub const PREFERRED_MIME_TYPES: &[&str] = &["video/webm;codecs=vp8,opus", "video/webm"];

/// Container label used when no explicit format was negotiated.
pub const DEFAULT_MIME_TYPE: &str = "video/webm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A slice of encoded media. May be empty.
    DataAvailable(Vec<u8>),
    /// Emitted once after the final `DataAvailable` following `stop()`.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),
    #[error("Stream has no live tracks")]
    InactiveStream,
    #[error("Recorder already started")]
    AlreadyStarted,
}

pub trait MediaRecorder: Send {
    fn mime_type(&self) -> &str;

    fn state(&self) -> RecorderState;

    fn start(&mut self) -> Result<(), RecorderError>;

    /// Request a stop. The recorder flushes pending data, then emits `Stopped`.
    fn stop(&mut self);
}

pub trait RecorderFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Bind a recorder to `stream`. `mime_type: None` selects the platform default.
    fn create(
        &self,
        stream: MediaStream,
        mime_type: Option<&str>,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Result<Box<dyn MediaRecorder>, RecorderError>;
}

/// Returns the first supported preferred format, or `None` for the platform default.
pub fn select_mime_type(factory: &dyn RecorderFactory) -> Option<&'static str> {
    let selected = PREFERRED_MIME_TYPES
        .iter()
        .copied()
        .find(|mime| factory.is_type_supported(mime));

    match selected {
        Some(mime) => debug!("Selected recording format {}", mime),
        None => warn!("No preferred recording format supported, using platform default"),
    }

    selected
}

/// Creates `TimesliceRecorder`s.
pub struct TimesliceRecorderFactory {
    timeslice: Duration,
    supported: Vec<String>,
}

impl TimesliceRecorderFactory {
    /// `timeslice` is floored at 1 ms; tokio intervals cannot have a zero period.
    pub fn new(timeslice: Duration) -> Self {
        Self {
            timeslice: timeslice.max(Duration::from_millis(1)),
            supported: PREFERRED_MIME_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_supported_types(mut self, types: &[&str]) -> Self {
        self.supported = types.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl RecorderFactory for TimesliceRecorderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|s| s == mime_type)
    }

    fn create(
        &self,
        stream: MediaStream,
        mime_type: Option<&str>,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Result<Box<dyn MediaRecorder>, RecorderError> {
        let mime_type = match mime_type {
            Some(mime) if !self.is_type_supported(mime) => {
                return Err(RecorderError::UnsupportedMimeType(mime.to_string()))
            }
            Some(mime) => mime.to_string(),
            None => DEFAULT_MIME_TYPE.to_string(),
        };

        Ok(Box::new(TimesliceRecorder {
            stream,
            mime_type,
            timeslice: self.timeslice,
            events: Some(events),
            state: RecorderState::Inactive,
            stop: CancellationToken::new(),
            task: None,
        }))
    }
}

/// Drains every track of its stream once per timeslice and emits the result
/// as one chunk. Each chunk is a sequence of segments:
/// `[kind: u8][len: u32 LE][bytes]`, one per track with pending media.
pub struct TimesliceRecorder {
    stream: MediaStream,
    mime_type: String,
    timeslice: Duration,
    events: Option<mpsc::UnboundedSender<RecorderEvent>>,
    state: RecorderState,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TimesliceRecorder {
    fn drain(stream: &MediaStream) -> Vec<u8> {
        let mut chunk = Vec::new();
        for track in stream.tracks() {
            let media = track.take_media();
            if media.is_empty() {
                continue;
            }
            chunk.push(match track.kind() {
                TrackKind::Video => b'V',
                TrackKind::Audio => b'A',
            });
            chunk.extend_from_slice(&(media.len() as u32).to_le_bytes());
            chunk.extend_from_slice(&media);
        }
        chunk
    }
}

impl MediaRecorder for TimesliceRecorder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    fn start(&mut self) -> Result<(), RecorderError> {
        let events = self.events.take().ok_or(RecorderError::AlreadyStarted)?;
        if !self.stream.is_active() {
            return Err(RecorderError::InactiveStream);
        }

        // Discard whatever the tracks buffered before recording began.
        Self::drain(&self.stream);

        let stream = self.stream.clone();
        let stop = self.stop.clone();
        let timeslice = self.timeslice;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let chunk = Self::drain(&stream);
                        if events.send(RecorderEvent::DataAvailable(chunk)).is_err() {
                            return;
                        }
                    }
                }
            }

            let chunk = Self::drain(&stream);
            let _ = events.send(RecorderEvent::DataAvailable(chunk));
            let _ = events.send(RecorderEvent::Stopped);
        }));

        self.state = RecorderState::Recording;
        info!(
            "Recorder started for stream {} ({}, {}ms slices)",
            self.stream.id(),
            self.mime_type,
            self.timeslice.as_millis()
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == RecorderState::Inactive {
            return;
        }
        self.state = RecorderState::Inactive;
        self.stop.cancel();
        debug!("Recorder stop requested for stream {}", self.stream.id());
    }
}

impl Drop for TimesliceRecorder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
