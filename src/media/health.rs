//! Track health classification.
//!
//! `classify` is the single readiness rule. `HealthMonitor` re-runs it
//! immediately, on every track event and on a fixed poll interval, because
//! some device losses never produce an event.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::track::{MediaStream, MediaTrack, ReadyState, TrackKind};

/// Per-kind readiness derived from the current track set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrackStatus {
    pub video_ready: bool,
    pub audio_ready: bool,
}

impl MediaTrackStatus {
    pub fn all_ready(&self) -> bool {
        self.video_ready && self.audio_ready
    }
}

/// A track counts only while live, enabled and unmuted.
pub fn is_track_healthy(track: &dyn MediaTrack) -> bool {
    track.ready_state() == ReadyState::Live && track.enabled() && !track.muted()
}

/// A kind is ready iff at least one of its tracks is healthy.
pub fn classify(tracks: &[Arc<dyn MediaTrack>]) -> MediaTrackStatus {
    let ready = |kind: TrackKind| {
        tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .any(|t| is_track_healthy(t.as_ref()))
    };

    MediaTrackStatus {
        video_ready: ready(TrackKind::Video),
        audio_ready: ready(TrackKind::Audio),
    }
}

/// Keeps a readiness value current for one stream until dropped.
pub struct HealthMonitor {
    status: watch::Receiver<MediaTrackStatus>,
    _guard: DropGuard,
}

impl HealthMonitor {
    pub fn spawn(stream: MediaStream, poll_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(classify(stream.tracks()));
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut events = stream.subscribe();

        // A zero period would panic the interval.
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events_open = true;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv(), if events_open => {
                        if event.is_none() {
                            events_open = false;
                            continue;
                        }
                    }
                    _ = poll.tick() => {}
                }

                let status = classify(stream.tracks());
                tx.send_if_modified(|current| {
                    if *current == status {
                        return false;
                    }
                    debug!(
                        "Readiness changed for stream {} -> video: {}, audio: {}",
                        stream.id(),
                        status.video_ready,
                        status.audio_ready
                    );
                    *current = status;
                    true
                });
            }
        });

        Self {
            status: rx,
            _guard: token.drop_guard(),
        }
    }

    pub fn status(&self) -> MediaTrackStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaTrackStatus> {
        self.status.clone()
    }
}
