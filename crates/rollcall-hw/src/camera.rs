//! V4L2 classroom camera via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::{CaptureError, CaptureSource};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// A discovered V4L2 capture device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel format the driver agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2, luma in every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }
}

struct OpenDevice {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// Camera opened on `start` and closed on `stop` or drop.
pub struct Camera {
    device_path: String,
    width: u32,
    height: u32,
    open: Option<OpenDevice>,
}

impl Camera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            open: None,
        }
    }

    /// Resolution to request; the driver may pick something close.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn open_device(&self) -> Result<OpenDevice, CaptureError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CaptureError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CaptureError::DeviceBusy
            } else {
                CaptureError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = self.width;
        fmt.height = self.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(OpenDevice {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// List V4L2 devices that can capture video.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

impl OpenDevice {
    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let converted = match self.pixel_format {
            PixelFormat::Grey => {
                let pixels = self.width as usize * self.height as usize;
                if buf.len() < pixels {
                    return Err(CaptureError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CaptureError::CaptureFailed(format!("{:?} conversion: {e}", self.pixel_format)))
    }
}

impl CaptureSource for Camera {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.open.is_none() {
            self.open = Some(self.open_device()?);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.open.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_running(&self) -> bool {
        self.open.is_some()
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let open = self.open.as_ref().ok_or(CaptureError::NotStarted)?;

        let mut stream = MmapStream::with_buffers(&open.device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = open.to_grayscale(buf)?;
        let frame = Frame::new(gray, open.width, open.height, meta.sequence);
        if frame.is_dark {
            tracing::debug!(seq = meta.sequence, "dark frame");
        }
        Ok(frame)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_fails_start() {
        let mut camera = Camera::new("/dev/rollcall-no-such-camera");
        let err = camera.start().unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        assert!(!camera.is_running());
    }

    #[test]
    fn test_capture_before_start() {
        let mut camera = Camera::new("/dev/rollcall-no-such-camera");
        assert!(matches!(camera.capture(), Err(CaptureError::NotStarted)));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut camera = Camera::new("/dev/rollcall-no-such-camera");
        camera.stop();
        camera.stop();
        assert!(!camera.is_running());
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }
}
