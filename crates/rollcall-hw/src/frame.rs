//! Captured frames and raw pixel conversion.

use image::GrayImage;
use std::time::Instant;
use thiserror::Error;

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// One 8-bit grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major pixels, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
            is_dark,
        }
    }

    pub fn from_gray_image(image: GrayImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, sequence)
    }

    /// Copy into an [`image::GrayImage`] for the detection provider.
    pub fn to_gray_image(&self) -> Result<GrayImage, FrameError> {
        let expected = self.width as usize * self.height as usize;
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )
    }

    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Keep the Y channel of packed YUYV 4:2:2 (`[Y0, U, Y1, V]`).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Take the high byte of each little-endian 16-bit sample.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// True when more than `threshold_pct` of pixels are below 32.
///
/// A dark frame is still handed to the provider; it simply finds no faces.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_keeps_luma() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert_eq!(
            yuyv_to_grayscale(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        );
    }

    #[test]
    fn test_y16_high_byte() {
        // 0x12ff, 0x8000
        let gray = y16_to_grayscale(&[0xff, 0x12, 0x00, 0x80], 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0x80]);
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&[0u8; 100], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&[128u8; 100], DARK_FRAME_THRESHOLD));

        let mut mostly_dark = vec![10u8; 940];
        mostly_dark.extend([128u8; 60]);
        assert!(!is_dark_frame(&mostly_dark, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_frame_to_gray_image() {
        let frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 3, 2, 7);
        let image = frame.to_gray_image().unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0[0], 6);
        assert!(frame.is_dark);
    }

    #[test]
    fn test_frame_with_wrong_length_is_rejected() {
        let frame = Frame::new(vec![0; 5], 3, 2, 0);
        assert!(frame.to_gray_image().is_err());
    }

    #[test]
    fn test_from_gray_image_keeps_dimensions() {
        let frame = Frame::from_gray_image(GrayImage::from_pixel(4, 3, image::Luma([200])), 1);
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.avg_brightness(), 200.0);
        assert!(!frame.is_dark);
    }
}
