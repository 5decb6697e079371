//! Device acquisition contract and capability hints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::track::{MediaStream, TrackKind};
use crate::config::DevicesConfig;

/// Why a camera/microphone request failed. Messages are user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AcquisitionError {
    #[error("Access denied. Please check permissions.")]
    PermissionDenied,
    #[error("No camera or microphone found.")]
    DeviceNotFound,
    #[error("Hardware error. Camera might be in use.")]
    DeviceUnreadable,
    #[error("Camera/Microphone access error.")]
    Unknown(String),
}

impl AcquisitionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionError::PermissionDenied => "permission_denied",
            AcquisitionError::DeviceNotFound => "device_not_found",
            AcquisitionError::DeviceUnreadable => "device_unreadable",
            AcquisitionError::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Which kinds to request, with optional capability hints per kind.
/// `None` means the kind is not requested at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl MediaConstraints {
    /// Plain camera + microphone request without hints, used by the device check.
    pub fn preflight() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }

    /// Recording request: 1280x720 ideal video, processed voice audio.
    pub fn recording() -> Self {
        Self {
            video: Some(VideoConstraints {
                ideal_width: Some(1280),
                ideal_height: Some(720),
            }),
            audio: Some(AudioConstraints {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            }),
        }
    }

    pub fn requests(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Video => self.video.is_some(),
            TrackKind::Audio => self.audio.is_some(),
        }
    }
}

impl From<&DevicesConfig> for MediaConstraints {
    fn from(devices: &DevicesConfig) -> Self {
        Self {
            video: Some(VideoConstraints {
                ideal_width: Some(devices.video_width),
                ideal_height: Some(devices.video_height),
            }),
            audio: Some(AudioConstraints {
                echo_cancellation: devices.echo_cancellation,
                noise_suppression: devices.noise_suppression,
                auto_gain_control: devices.auto_gain_control,
            }),
        }
    }
}

/// Source of camera/microphone streams.
///
/// A request may be granted partially: kinds that are unavailable are left
/// out of the stream as long as at least one requested kind was granted.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, AcquisitionError>;
}
