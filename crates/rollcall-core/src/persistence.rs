//! Persistence adapter: frozen session state → attendance records.
//!
//! Records are upserted on (student, date, period). A store applies as many
//! rows of a batch as it can and reports the rest; nothing already written
//! is rolled back.

use crate::session::SessionState;
use crate::timetable::{Timetable, TimetableError};
use crate::types::{AttendanceRecord, RecordKey, Student};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("period {0} is a free period; attendance is disabled")]
    FreePeriod(u32),
    #[error(transparent)]
    Timetable(#[from] TimetableError),
    #[error("attendance store error: {0}")]
    Store(#[from] StoreError),
    #[error("{} of {} attendance records failed to save", .0.failed.len(), .0.attempted())]
    Partial(UpsertReport),
}

/// A record the store could not write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub key: RecordKey,
    pub reason: String,
}

/// Outcome of a bulk upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertReport {
    pub written: usize,
    pub failed: Vec<RecordFailure>,
}

impl UpsertReport {
    pub fn attempted(&self) -> usize {
        self.written + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Attendance record storage keyed by (student, date, period).
pub trait AttendanceStore: Send + Sync {
    /// Insert or replace each record. Per-record failures go in the report.
    fn upsert_records(&self, records: &[AttendanceRecord]) -> Result<UpsertReport, StoreError>;

    /// All records for one date and period, ordered by student id.
    fn records_for(&self, date: NaiveDate, period: u32) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Source of the students enrolled for a session.
pub trait StudentDirectory: Send + Sync {
    /// Students of one class/section, or everyone when `class` is `None`.
    fn enrolled_students(&self, class: Option<&str>) -> Result<Vec<Student>, StoreError>;
}

/// Who saves what, for which slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub date: NaiveDate,
    pub period: u32,
    pub recorded_by: String,
}

/// One record per enrolled student, all stamped with the same time.
pub fn build_records(
    state: &SessionState,
    request: &SaveRequest,
    recorded_at: DateTime<Utc>,
) -> Vec<AttendanceRecord> {
    state
        .snapshot()
        .into_iter()
        .map(|(student_id, status)| AttendanceRecord {
            student_id,
            date: request.date,
            period: request.period,
            status,
            recorded_by: request.recorded_by.clone(),
            recorded_at,
        })
        .collect()
}

/// Write the session's verdicts. Refuses free periods.
pub fn save_session(
    store: &dyn AttendanceStore,
    timetable: &Timetable,
    state: &SessionState,
    request: &SaveRequest,
) -> Result<UpsertReport, SaveError> {
    if timetable.is_free(request.period)? {
        return Err(SaveError::FreePeriod(request.period));
    }

    let records = build_records(state, request, Utc::now());
    let report = store.upsert_records(&records)?;

    if !report.is_complete() {
        tracing::warn!(
            session = %state.id(),
            written = report.written,
            failed = report.failed.len(),
            "attendance save partially failed"
        );
        return Err(SaveError::Partial(report));
    }

    tracing::info!(
        session = %state.id(),
        date = %request.date,
        period = request.period,
        written = report.written,
        "attendance saved"
    );
    Ok(report)
}
