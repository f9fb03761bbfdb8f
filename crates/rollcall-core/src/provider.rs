//! Face detection / recognition capability boundary.
//!
//! The engine never runs a model itself. Anything that can localize faces,
//! place 68 landmarks, score expressions and emit a feature vector can sit
//! behind [`FaceProvider`].

use crate::types::Detection;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider protocol error: {0}")]
    Protocol(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow interface to the external face model.
///
/// Calls may block on network or compute; callers on an async runtime run
/// them on a blocking thread.
pub trait FaceProvider: Send + Sync {
    /// Detect at most one face in a reference image.
    fn detect_single(&self, image: &GrayImage) -> Result<Option<Detection>, ProviderError>;

    /// Detect every face in a live frame.
    fn detect_all(&self, frame: &GrayImage) -> Result<Vec<Detection>, ProviderError>;
}

impl<P: FaceProvider + ?Sized> FaceProvider for std::sync::Arc<P> {
    fn detect_single(&self, image: &GrayImage) -> Result<Option<Detection>, ProviderError> {
        (**self).detect_single(image)
    }

    fn detect_all(&self, frame: &GrayImage) -> Result<Vec<Detection>, ProviderError> {
        (**self).detect_all(frame)
    }
}
