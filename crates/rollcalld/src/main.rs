use anyhow::{Context, Result};
use rollcall_core::remote::SocketProvider;
use rollcall_core::Timetable;
use rollcall_hw::{Camera, CaptureSource, ReplaySource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod dbus_interface;
mod store;

use config::Config;
use controller::SessionController;
use dbus_interface::AttendanceService;
use store::SqliteStore;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::from_env();

    let timetable = match &config.timetable_path {
        Some(path) => Timetable::load(path)
            .with_context(|| format!("failed to load timetable {}", path.display()))?,
        None => Timetable::default(),
    };
    tracing::info!(
        periods = timetable.periods().len(),
        free = timetable.periods().iter().filter(|p| p.free).count(),
        "timetable loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "database opened");

    let capture: Box<dyn CaptureSource> = match &config.replay_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "replaying still images instead of the camera");
            Box::new(ReplaySource::from_dir(dir.clone()))
        }
        None => Box::new(Camera::new(config.camera_device.clone())),
    };

    let provider = Arc::new(SocketProvider::new(
        config.provider_socket.clone(),
        Duration::from_secs(config.tick_timeout_secs.max(1)),
    ));
    tracing::info!(socket = %config.provider_socket.display(), "detection provider configured");

    let controller = Arc::new(Mutex::new(SessionController::new(
        capture,
        provider,
        store.clone(),
        store.clone(),
        timetable,
        config.controller_settings(),
    )));

    let service = AttendanceService::new(controller.clone(), store);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    controller.lock().await.shutdown().await;

    Ok(())
}
