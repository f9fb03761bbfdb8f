use crate::controller::ControllerSettings;
use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Replay still images from this directory instead of opening the camera.
    pub replay_dir: Option<PathBuf>,
    /// Unix socket of the face detection service.
    pub provider_socket: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a face matches a signature.
    pub match_threshold: f32,
    pub tick_interval_ms: u64,
    /// Per-tick budget; a tick that overruns is dropped.
    pub tick_timeout_secs: u64,
    pub enrollment_workers: usize,
    /// Timetable TOML; the built-in day is used when unset.
    pub timetable_path: Option<PathBuf>,
    /// Reuse signatures across sessions while a student's photo is unchanged.
    pub signature_cache: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            replay_dir: env_path("ROLLCALL_REPLAY_DIR"),
            provider_socket: env_path("ROLLCALL_PROVIDER_SOCKET")
                .unwrap_or_else(|| PathBuf::from(rollcall_core::remote::DEFAULT_SOCKET_PATH)),
            db_path: env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join("attendance.db")),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            tick_interval_ms: env_u64("ROLLCALL_TICK_INTERVAL_MS", 1500),
            tick_timeout_secs: env_u64("ROLLCALL_TICK_TIMEOUT_SECS", 5),
            enrollment_workers: env_usize(
                "ROLLCALL_ENROLLMENT_WORKERS",
                rollcall_core::enrollment::DEFAULT_ENROLLMENT_WORKERS,
            ),
            timetable_path: env_path("ROLLCALL_TIMETABLE"),
            signature_cache: std::env::var("ROLLCALL_SIGNATURE_CACHE")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            tick_timeout: Duration::from_secs(self.tick_timeout_secs.max(1)),
            match_threshold: self.match_threshold,
            enrollment_workers: self.enrollment_workers,
            signature_cache: self.signature_cache,
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
