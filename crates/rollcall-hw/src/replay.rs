//! Capture source that cycles through still images.
//!
//! Used for demos without a camera and for driving sessions in tests.

use crate::frame::Frame;
use crate::{CaptureError, CaptureSource};
use image::GrayImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm"];

enum Frames {
    Files { dir: PathBuf, paths: Vec<PathBuf> },
    Memory(Vec<GrayImage>),
}

pub struct ReplaySource {
    frames: Frames,
    next: usize,
    sequence: u32,
    running: bool,
}

impl ReplaySource {
    /// Replay every image file in `dir`, in file name order.
    ///
    /// The directory is scanned on `start`, so files added between sessions
    /// are picked up.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_frames(Frames::Files {
            dir: dir.into(),
            paths: Vec::new(),
        })
    }

    /// Replay in-memory frames.
    pub fn from_images(images: Vec<GrayImage>) -> Self {
        Self::with_frames(Frames::Memory(images))
    }

    fn with_frames(frames: Frames) -> Self {
        Self {
            frames,
            next: 0,
            sequence: 0,
            running: false,
        }
    }

    fn frame_count(&self) -> usize {
        match &self.frames {
            Frames::Files { paths, .. } => paths.len(),
            Frames::Memory(images) => images.len(),
        }
    }
}

fn scan_dir(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CaptureError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

impl CaptureSource for ReplaySource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.running {
            return Ok(());
        }
        if let Frames::Files { dir, paths } = &mut self.frames {
            *paths = scan_dir(dir)?;
            tracing::info!(dir = %dir.display(), frames = paths.len(), "replay source opened");
        }
        if self.frame_count() == 0 {
            let origin = match &self.frames {
                Frames::Files { dir, .. } => dir.display().to_string(),
                Frames::Memory(_) => "memory".to_string(),
            };
            return Err(CaptureError::NoFrames(origin));
        }
        self.next = 0;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.running {
            return Err(CaptureError::NotStarted);
        }

        let index = self.next;
        self.next = (self.next + 1) % self.frame_count();
        self.sequence = self.sequence.wrapping_add(1);

        let image = match &self.frames {
            Frames::Files { paths, .. } => {
                let path = &paths[index];
                image::open(path)
                    .map_err(|e| CaptureError::CaptureFailed(format!("{}: {e}", path.display())))?
                    .to_luma8()
            }
            Frames::Memory(images) => images[index].clone(),
        };
        Ok(Frame::from_gray_image(image, self.sequence))
    }
}
