use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable student identifier as issued by the student directory.
pub type StudentId = String;

/// Landmark point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face feature vector (128-dimensional for the reference provider).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`, or `None` when dimensionalities differ.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

/// Expression probabilities reported by the provider, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

/// One face localized on one frame. Lives only while that frame is processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Landmarks in the 68-point convention; may be shorter for partial faces.
    #[serde(default)]
    pub landmarks: Vec<Point>,
    #[serde(default)]
    pub expressions: Expressions,
    pub descriptor: FeatureVector,
}

/// Identity template for one enrolled student, rebuilt at every session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    pub student_id: StudentId,
    pub descriptor: FeatureVector,
}

/// Attendance verdict for a student within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentivenessStatus {
    Present,
    #[default]
    Absent,
    Sleepy,
    Talking,
    NotAttentive,
}

impl AttentivenessStatus {
    pub const ALL: [AttentivenessStatus; 5] = [
        AttentivenessStatus::Present,
        AttentivenessStatus::Absent,
        AttentivenessStatus::Sleepy,
        AttentivenessStatus::Talking,
        AttentivenessStatus::NotAttentive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttentivenessStatus::Present => "present",
            AttentivenessStatus::Absent => "absent",
            AttentivenessStatus::Sleepy => "sleepy",
            AttentivenessStatus::Talking => "talking",
            AttentivenessStatus::NotAttentive => "not-attentive",
        }
    }
}

impl fmt::Display for AttentivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attentiveness status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for AttentivenessStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttentivenessStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// An enrolled student as seen by the engine. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub reg_no: String,
    pub class: String,
    /// Reference photo used only for enrollment.
    pub photo: Option<PathBuf>,
}

/// Identity key of an attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub period: u32,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.student_id, self.date, self.period)
    }
}

/// Persisted attendance verdict. At most one per [`RecordKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub period: u32,
    pub status: AttentivenessStatus,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            student_id: self.student_id.clone(),
            date: self.date,
            period: self.period,
        }
    }
}

/// A (student, status) verdict emitted by the frame classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub student_id: StudentId,
    pub status: AttentivenessStatus,
}
