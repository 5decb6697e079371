//! Media tracks and the streams that group them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

/// Kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Liveness of a track. Once `Ended`, a track never becomes `Live` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEventKind {
    Mute,
    Unmute,
    /// The source went away (unplugged, revoked, driver failure).
    /// Never emitted by `MediaTrack::stop`.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub track_id: String,
    pub kind: TrackKind,
    pub event: TrackEventKind,
}

/// A single live source of audio or video.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Human readable device name.
    fn label(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    fn enabled(&self) -> bool;

    fn muted(&self) -> bool;

    /// Release the underlying device. Idempotent; does not emit `Ended`.
    fn stop(&self);

    /// Subscribe to mute/unmute/ended notifications for this track.
    fn subscribe(&self) -> broadcast::Receiver<TrackEvent>;

    /// Drain the media captured since the previous call.
    fn take_media(&self) -> Vec<u8>;
}

/// A set of tracks granted by one acquisition request.
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field(
                "tracks",
                &self
                    .tracks
                    .iter()
                    .map(|t| format!("{}:{}", t.kind().as_str(), t.id()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// True while at least one track is still live.
    pub fn is_active(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.ready_state() == ReadyState::Live)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Merge the event feeds of every track into one subscription.
    ///
    /// Must be called from within a tokio runtime. The forwarding tasks are
    /// cancelled when the subscription is dropped.
    pub fn subscribe(&self) -> TrackEventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        for track in &self.tracks {
            let mut events = track.subscribe();
            let tx = tx.clone();
            let cancel = token.clone();
            let track_id = track.id().to_string();

            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        event = events.recv() => event,
                    };

                    match event {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Track {} event feed lagged, skipped {}", track_id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        TrackEventSubscription {
            rx,
            _guard: token.drop_guard(),
        }
    }
}

/// Merged track events of one stream.
pub struct TrackEventSubscription {
    rx: mpsc::UnboundedReceiver<TrackEvent>,
    _guard: DropGuard,
}

impl TrackEventSubscription {
    /// Returns `None` once every track's feed has closed.
    pub async fn recv(&mut self) -> Option<TrackEvent> {
        self.rx.recv().await
    }
}
