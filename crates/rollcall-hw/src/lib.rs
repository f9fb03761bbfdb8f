//! rollcall-hw: Frame capture for live attendance sessions.
//!
//! A [`CaptureSource`] is started when a session begins, asked for one
//! frame per tick and stopped when the session ends. [`Camera`] reads a
//! V4L2 device; [`ReplaySource`] cycles through still images.

pub mod camera;
pub mod frame;
pub mod replay;

pub use camera::{Camera, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use replay::ReplaySource;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("capture source not started")]
    NotStarted,
    #[error("no frames to replay in {0}")]
    NoFrames(String),
}

/// Something that produces one grayscale frame on demand.
///
/// `start` and `stop` are idempotent. Implementations release the
/// underlying device on `stop` and on drop.
pub trait CaptureSource: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Capture one frame. Fails with [`CaptureError::NotStarted`] before `start`.
    fn capture(&mut self) -> Result<Frame, CaptureError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn start(&mut self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture()
    }
}
