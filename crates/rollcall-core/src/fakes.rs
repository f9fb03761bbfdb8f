//! In-memory store and provider fakes.
//!
//! `MemoryStore` satisfies the storage contracts without a database;
//! `ScriptedProvider` replays canned detections.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::NaiveDate;
use image::GrayImage;

use crate::persistence::{
    AttendanceStore, RecordFailure, StoreError, StudentDirectory, UpsertReport,
};
use crate::provider::{FaceProvider, ProviderError};
use crate::types::{AttendanceRecord, Detection, RecordKey, Student, StudentId};

/// Attendance records in a `BTreeMap<RecordKey, AttendanceRecord>`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<RecordKey, AttendanceRecord>>,
    students: Mutex<Vec<Student>>,
    failing: Mutex<HashSet<StudentId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(students: Vec<Student>) -> Self {
        let store = Self::new();
        *store.students.lock().unwrap_or_else(|p| p.into_inner()) = students;
        store
    }

    /// Make every later upsert for `student_id` fail.
    pub fn fail_student(&self, student_id: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(student_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AttendanceStore for MemoryStore {
    fn upsert_records(&self, records: &[AttendanceRecord]) -> Result<UpsertReport, StoreError> {
        let failing = self.failing.lock().unwrap_or_else(|p| p.into_inner());
        let mut stored = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut report = UpsertReport::default();

        for record in records {
            if failing.contains(&record.student_id) {
                report.failed.push(RecordFailure {
                    key: record.key(),
                    reason: "injected failure".into(),
                });
                continue;
            }
            stored.insert(record.key(), record.clone());
            report.written += 1;
        }

        Ok(report)
    }

    fn records_for(&self, date: NaiveDate, period: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        let stored = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(stored
            .values()
            .filter(|r| r.date == date && r.period == period)
            .cloned()
            .collect())
    }
}

impl StudentDirectory for MemoryStore {
    fn enrolled_students(&self, class: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let students = self.students.lock().unwrap_or_else(|p| p.into_inner());
        Ok(students
            .iter()
            .filter(|s| class.map_or(true, |c| s.class == c))
            .cloned()
            .collect())
    }
}

/// Provider answering `detect_all` from a queue of canned frames.
///
/// An empty queue yields no faces. `detect_single` answers from a fixed
/// optional detection.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    frames: Mutex<VecDeque<Result<Vec<Detection>, String>>>,
    reference: Mutex<Option<Detection>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&self, detections: Vec<Detection>) {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(detections));
    }

    pub fn push_failure(&self, message: &str) {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(message.to_string()));
    }

    pub fn set_reference(&self, detection: Option<Detection>) {
        *self.reference.lock().unwrap_or_else(|p| p.into_inner()) = detection;
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl FaceProvider for ScriptedProvider {
    fn detect_single(&self, _image: &GrayImage) -> Result<Option<Detection>, ProviderError> {
        Ok(self.reference.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn detect_all(&self, _frame: &GrayImage) -> Result<Vec<Detection>, ProviderError> {
        match self.frames.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(ProviderError::Unavailable(message)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttentivenessStatus;
    use chrono::Utc;

    fn record(student: &str, period: u32, status: AttentivenessStatus) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student.into(),
            date: NaiveDate::from_ymd_opt(2026, 2, 24).unwrap(),
            period,
            status,
            recorded_by: "f1".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_is_keyed() {
        let store = MemoryStore::new();
        store
            .upsert_records(&[
                record("s1", 1, AttentivenessStatus::Absent),
                record("s1", 2, AttentivenessStatus::Present),
            ])
            .unwrap();
        store
            .upsert_records(&[record("s1", 1, AttentivenessStatus::Sleepy)])
            .unwrap();

        assert_eq!(store.len(), 2);
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        let period_one = store.records_for(date, 1).unwrap();
        assert_eq!(period_one.len(), 1);
        assert_eq!(period_one[0].status, AttentivenessStatus::Sleepy);
    }

    #[test]
    fn test_directory_filters_by_class() {
        let student = |id: &str, class: &str| Student {
            id: id.into(),
            name: id.into(),
            reg_no: id.into(),
            class: class.into(),
            photo: None,
        };
        let store = MemoryStore::with_students(vec![
            student("s1", "CSE-A"),
            student("s2", "CSE-B"),
            student("s3", "CSE-A"),
        ]);
        assert_eq!(store.enrolled_students(Some("CSE-A")).unwrap().len(), 2);
        assert_eq!(store.enrolled_students(None).unwrap().len(), 3);
        assert!(store.enrolled_students(Some("ECE-A")).unwrap().is_empty());
    }

    #[test]
    fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new();
        provider.push_failure("timeout");
        provider.push_frame(Vec::new());
        let frame = GrayImage::new(1, 1);

        assert!(provider.detect_all(&frame).is_err());
        assert!(provider.detect_all(&frame).unwrap().is_empty());
        assert!(provider.detect_all(&frame).unwrap().is_empty());
        assert_eq!(provider.pending_frames(), 0);
    }
}
