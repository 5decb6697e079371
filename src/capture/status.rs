//! Capture session status types and shared state handle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::media::{AcquisitionError, MediaTrackStatus};

/// Phase of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    Acquiring,
    Recording,
    Finishing,
    HardwareFailure,
    Completed,
    /// Acquisition failed; the session must be reloaded.
    Failed,
}

impl CapturePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquiring => "acquiring",
            Self::Recording => "recording",
            Self::Finishing => "finishing",
            Self::HardwareFailure => "hardware_failure",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Phases in which the session holds (or is about to hold) devices.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Recording | Self::Finishing)
    }
}

/// Snapshot of a capture session, readable by the controller and API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStatus {
    pub session_number: u8,
    pub phase: CapturePhase,
    pub time_remaining: u32,
    pub duration_seconds: u32,
    pub chunks: usize,
    pub captured_bytes: usize,
    pub mime_type: Option<String>,
    pub readiness: MediaTrackStatus,
    pub error: Option<AcquisitionError>,
}

impl CaptureStatus {
    pub fn new(session_number: u8, duration_seconds: u32) -> Self {
        Self {
            session_number,
            phase: CapturePhase::Acquiring,
            time_remaining: duration_seconds,
            duration_seconds,
            chunks: 0,
            captured_bytes: 0,
            mime_type: None,
            readiness: MediaTrackStatus::default(),
            error: None,
        }
    }

    /// Share of the session elapsed, 0-100.
    pub fn progress_percent(&self) -> u32 {
        if self.duration_seconds == 0 {
            return 100;
        }
        (self.duration_seconds - self.time_remaining.min(self.duration_seconds)) * 100
            / self.duration_seconds
    }
}

/// Watch-backed handle; the capture machine writes, everyone else reads.
#[derive(Clone)]
pub struct CaptureStatusHandle {
    tx: Arc<watch::Sender<CaptureStatus>>,
}

impl CaptureStatusHandle {
    pub fn new(status: CaptureStatus) -> Self {
        let (tx, _) = watch::channel(status);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> CaptureStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.tx.subscribe()
    }

    pub fn set_phase(&self, phase: CapturePhase) {
        self.tx.send_if_modified(|status| {
            if status.phase == phase {
                return false;
            }
            status.phase = phase;
            true
        });
    }

    pub fn start_recording(&self, mime_type: &str) {
        self.tx.send_modify(|status| {
            status.phase = CapturePhase::Recording;
            status.mime_type = Some(mime_type.to_string());
        });
    }

    /// Count down one second and return what is left.
    pub fn tick(&self) -> u32 {
        let mut remaining = 0;
        self.tx.send_modify(|status| {
            status.time_remaining = status.time_remaining.saturating_sub(1);
            remaining = status.time_remaining;
        });
        remaining
    }

    pub fn record_chunk(&self, len: usize) {
        self.tx.send_modify(|status| {
            status.chunks += 1;
            status.captured_bytes += len;
        });
    }

    pub fn set_readiness(&self, readiness: MediaTrackStatus) {
        self.tx.send_if_modified(|status| {
            if status.readiness == readiness {
                return false;
            }
            status.readiness = readiness;
            true
        });
    }

    pub fn fail(&self, error: AcquisitionError) {
        self.tx.send_modify(|status| {
            status.phase = CapturePhase::Failed;
            status.error = Some(error);
        });
    }
}
