pub mod capture_machine;
pub mod status;

pub use capture_machine::{CaptureContext, CaptureHandle, CaptureMachine, CaptureOptions};
pub use status::{CapturePhase, CaptureStatus, CaptureStatusHandle};
