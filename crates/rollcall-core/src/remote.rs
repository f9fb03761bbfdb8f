//! Client for an out-of-process face detection service.
//!
//! One request per connection over a Unix socket. Every frame on the wire
//! is a little-endian `u32` length followed by that many bytes:
//!
//! ```text
//! client → service: [len][JSON RequestHeader] [len][raw 8-bit grayscale pixels]
//! service → client: [len][JSON Reply]
//! ```

use crate::provider::{FaceProvider, ProviderError};
use crate::types::Detection;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOCKET_PATH: &str = "/run/rollcall/faces.sock";

const MAX_REPLY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    DetectSingle,
    DetectAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub op: Op,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Faces(Vec<Detection>),
    Error(String),
}

/// [`FaceProvider`] backed by the detection service socket.
#[derive(Debug, Clone)]
pub struct SocketProvider {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketProvider {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    fn request(&self, op: Op, image: &GrayImage) -> Result<Vec<Detection>, ProviderError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            ProviderError::Unavailable(format!("{}: {e}", self.socket_path.display()))
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let header = RequestHeader {
            op,
            width: image.width(),
            height: image.height(),
        };
        let header = serde_json::to_vec(&header)
            .map_err(|e| ProviderError::Protocol(format!("encode header: {e}")))?;

        write_frame(&mut stream, &header).map_err(io_to_provider)?;
        write_frame(&mut stream, image.as_raw()).map_err(io_to_provider)?;
        stream.flush().map_err(io_to_provider)?;

        let reply = read_frame(&mut stream, MAX_REPLY_BYTES).map_err(io_to_provider)?;
        let reply: Reply = serde_json::from_slice(&reply)
            .map_err(|e| ProviderError::Protocol(format!("decode reply: {e}")))?;

        match reply {
            Reply::Faces(faces) => Ok(faces),
            Reply::Error(message) => Err(ProviderError::Rejected(message)),
        }
    }
}

impl FaceProvider for SocketProvider {
    fn detect_single(&self, image: &GrayImage) -> Result<Option<Detection>, ProviderError> {
        let mut faces = self.request(Op::DetectSingle, image)?;
        if faces.len() > 1 {
            return Err(ProviderError::Protocol(format!(
                "expected at most one face in a reference image, got {}",
                faces.len()
            )));
        }
        Ok(faces.pop())
    }

    fn detect_all(&self, frame: &GrayImage) -> Result<Vec<Detection>, ProviderError> {
        let faces = self.request(Op::DetectAll, frame)?;
        tracing::trace!(faces = faces.len(), "detection service replied");
        Ok(faces)
    }
}

fn io_to_provider(e: std::io::Error) -> ProviderError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ProviderError::Timeout,
        _ => ProviderError::Io(e),
    }
}

/// Write one length-prefixed frame.
pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(ErrorKind::InvalidInput, "frame exceeds u32 length")
    })?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)
}

/// Read one length-prefixed frame of at most `max_len` bytes.
pub fn read_frame(r: &mut impl Read, max_len: usize) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_len {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max_len}"),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
