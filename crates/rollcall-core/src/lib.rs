//! rollcall-core: Live-session attendance engine.
//!
//! Matches detected faces against per-session signatures, grades
//! attentiveness from landmark geometry, folds verdicts into session state
//! and upserts the result as attendance records. The face model itself sits
//! behind [`FaceProvider`].

pub mod attentiveness;
pub mod classifier;
pub mod enrollment;
pub mod fakes;
pub mod matcher;
pub mod persistence;
pub mod provider;
pub mod remote;
pub mod session;
pub mod timetable;
pub mod types;

pub use classifier::{FrameClassifier, FrameVerdict};
pub use enrollment::{CoverageGap, CoverageNote, Enrollment, EnrollmentBuilder, SignatureCache};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use persistence::{AttendanceStore, SaveError, SaveRequest, StoreError, StudentDirectory, UpsertReport};
pub use provider::{FaceProvider, ProviderError};
pub use session::{Phase, SessionEvent, SessionState, StatusSummary};
pub use timetable::{Period, Timetable};
pub use types::{
    AttendanceRecord, AttentivenessStatus, Detection, FaceSignature, FeatureVector, Observation,
    Student, StudentId,
};
