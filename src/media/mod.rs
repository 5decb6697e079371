//! Hardware boundary for camera and microphone capture.
//!
//! Everything above this module talks to hardware through the traits defined
//! here (`MediaDevices`, `MediaTrack`, `MediaRecorder`, `RecorderFactory`), so
//! the capture machine and the device check run unchanged against real
//! devices or the synthetic backend.

pub mod devices;
pub mod health;
pub mod microphone;
pub mod preview;
pub mod recorder;
pub mod synthetic;
pub mod track;

pub use devices::{AcquisitionError, AudioConstraints, MediaConstraints, MediaDevices, VideoConstraints};
pub use health::{classify, HealthMonitor, MediaTrackStatus};
pub use microphone::{MicrophoneTrack, SystemDevices};
pub use preview::{PreviewBinding, PreviewSurface};
pub use recorder::{
    select_mime_type, MediaRecorder, RecorderError, RecorderEvent, RecorderFactory, RecorderState,
    TimesliceRecorder, TimesliceRecorderFactory,
};
pub use synthetic::{DeviceAvailability, SyntheticDevices, SyntheticTrack};
pub use track::{MediaStream, MediaTrack, ReadyState, TrackEvent, TrackEventKind, TrackEventSubscription, TrackKind};

use std::sync::Arc;

/// Builds the device backend named in the config (`system` or `synthetic`).
pub fn backend_from_name(name: &str) -> anyhow::Result<Arc<dyn MediaDevices>> {
    match name {
        "system" => Ok(Arc::new(SystemDevices::new())),
        "synthetic" => Ok(Arc::new(SyntheticDevices::new())),
        other => anyhow::bail!(
            "Unknown device backend '{}'. Supported backends: system, synthetic",
            other
        ),
    }
}
