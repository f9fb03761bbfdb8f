use crate::controller::{ControllerError, SessionController, StartRequest};
use crate::store::SqliteStore;
use chrono::NaiveDate;
use rollcall_core::persistence::AttendanceStore;
use rollcall_core::{AttentivenessStatus, Student};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    controller: Arc<Mutex<SessionController>>,
    store: Arc<SqliteStore>,
}

impl AttendanceService {
    pub fn new(controller: Arc<Mutex<SessionController>>, store: Arc<SqliteStore>) -> Self {
        Self { controller, store }
    }
}

fn to_fdo(e: ControllerError) -> zbus::fdo::Error {
    match e {
        ControllerError::AlreadyRunning
        | ControllerError::NoSession
        | ControllerError::FreePeriod(_)
        | ControllerError::Timetable(_)
        | ControllerError::Rejected(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Fields the student directory cannot store empty.
fn check_registration(id: &str, reg_no: &str, class: &str) -> zbus::fdo::Result<()> {
    let missing: Vec<&str> = [("id", id), ("reg_no", reg_no), ("class", class)]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(zbus::fdo::Error::InvalidArgs(format!(
            "required: {}",
            missing.join(", ")
        )))
    }
}

/// Empty means today.
fn parse_date(date: &str) -> zbus::fdo::Result<NaiveDate> {
    if date.is_empty() {
        return Ok(chrono::Local::now().date_naive());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("date {date:?}: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Start a session for a period. An empty class enrolls every student.
    async fn start_session(&self, period: u32, class: &str) -> zbus::fdo::Result<String> {
        tracing::info!(period, class, "start requested");
        let request = StartRequest {
            period,
            class: (!class.is_empty()).then(|| class.to_string()),
        };
        let session_id = self.controller.lock().await.start(request).await.map_err(to_fdo)?;
        Ok(session_id.to_string())
    }

    /// Stop the running session; returns the status counts as JSON.
    async fn stop_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop requested");
        let summary = self.controller.lock().await.stop().await.map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Persist the session for `date` (YYYY-MM-DD, empty for today).
    async fn save_session(&self, date: &str, recorded_by: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        tracing::info!(%date, recorded_by, "save requested");
        let report = self
            .controller
            .lock()
            .await
            .save(date, recorded_by)
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Override one student's status until the session is saved.
    async fn mark_student(&self, student_id: &str, status: &str) -> zbus::fdo::Result<String> {
        let status: AttentivenessStatus = status
            .parse()
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{e}")))?;
        let applied = self
            .controller
            .lock()
            .await
            .override_status(student_id, status)
            .map_err(to_fdo)?;
        Ok(applied.to_string())
    }

    /// Add or update a student. An empty photo path means no photo.
    async fn register_student(
        &self,
        id: &str,
        name: &str,
        reg_no: &str,
        class: &str,
        photo: &str,
    ) -> zbus::fdo::Result<()> {
        check_registration(id, reg_no, class)?;
        let student = Student {
            id: id.to_string(),
            name: name.to_string(),
            reg_no: reg_no.to_string(),
            class: class.to_string(),
            photo: (!photo.is_empty()).then(|| PathBuf::from(photo)),
        };
        tracing::info!(student = id, class, has_photo = student.photo.is_some(), "register requested");
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.upsert_student(&student))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Saved records for one date and period, as a JSON array.
    async fn records(&self, date: &str, period: u32) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let store = self.store.clone();
        let records = tokio::task::spawn_blocking(move || store.records_for(date, period))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&records)
    }

    /// Daemon status: version plus the current (or last) session.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let controller = self.controller.lock().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": controller.is_running(),
            "session": controller.status(),
        })
        .to_string())
    }
}
