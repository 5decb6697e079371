//! The single live preview binding shared by the device check and sessions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::track::MediaStream;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewBinding {
    pub stream_id: String,
    pub owner: String,
}

/// Whoever acquired most recently owns the preview.
#[derive(Clone)]
pub struct PreviewSurface {
    tx: Arc<watch::Sender<Option<PreviewBinding>>>,
}

impl Default for PreviewSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSurface {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn attach(&self, stream: &MediaStream, owner: &str) {
        debug!("Preview bound to stream {} ({})", stream.id(), owner);
        self.tx.send_replace(Some(PreviewBinding {
            stream_id: stream.id().to_string(),
            owner: owner.to_string(),
        }));
    }

    /// Clear the binding, but only if it still points at `stream_id`.
    pub fn detach(&self, stream_id: &str) {
        self.tx.send_if_modified(|binding| match binding {
            Some(current) if current.stream_id == stream_id => {
                *binding = None;
                true
            }
            _ => false,
        });
    }

    pub fn current(&self) -> Option<PreviewBinding> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PreviewBinding>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_attach_wins() {
        let preview = PreviewSurface::new();
        let first = MediaStream::new(Vec::new());
        let second = MediaStream::new(Vec::new());

        preview.attach(&first, "device-check");
        preview.attach(&second, "session-1");

        let binding = preview.current().unwrap();
        assert_eq!(binding.stream_id, second.id());
        assert_eq!(binding.owner, "session-1");
    }

    #[test]
    fn test_stale_detach_is_ignored() {
        let preview = PreviewSurface::new();
        let first = MediaStream::new(Vec::new());
        let second = MediaStream::new(Vec::new());

        preview.attach(&first, "device-check");
        preview.attach(&second, "session-1");
        preview.detach(first.id());
        assert!(preview.current().is_some());

        preview.detach(second.id());
        assert!(preview.current().is_none());
    }
}
