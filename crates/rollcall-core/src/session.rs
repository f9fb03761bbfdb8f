//! Session aggregator: per-student status for one live session.
//!
//! All mutation goes through [`transition`]. Observations are
//! last-write-wins with no smoothing; `absent` is only ever the seed value
//! (or an explicit instructor override).

use crate::classifier::FrameVerdict;
use crate::types::{AttentivenessStatus, StudentId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

/// Input to the per-student state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Verdict from the frame classifier.
    Observed(AttentivenessStatus),
    /// Instructor correction.
    Override(AttentivenessStatus),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("the classifier never reports absent")]
    AbsentObservation,
    #[error("student {0} is not enrolled in this session")]
    UnknownStudent(StudentId),
    #[error("session is frozen")]
    Frozen,
    #[error("observation belongs to session {0}")]
    StaleSession(Uuid),
}

/// The per-student transition function.
pub fn transition(
    _current: AttentivenessStatus,
    event: SessionEvent,
) -> Result<AttentivenessStatus, Rejection> {
    match event {
        SessionEvent::Observed(AttentivenessStatus::Absent) => Err(Rejection::AbsentObservation),
        SessionEvent::Observed(status) | SessionEvent::Override(status) => Ok(status),
    }
}

/// Lifecycle of a session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Accepting observations and overrides.
    Live,
    /// Capture ended; overrides still accepted until save.
    Stopped,
    /// Persisted; no further input.
    Saved,
}

/// Counts of how many observations of a verdict were applied vs. dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub discarded: usize,
}

/// Per-status head count for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub sleepy: usize,
    pub talking: usize,
    pub not_attentive: usize,
    /// Share of `present` students, rounded to a whole percent.
    pub present_pct: u32,
}

/// Student → status map for exactly the students enrolled in the session.
#[derive(Debug, Clone)]
pub struct SessionState {
    id: Uuid,
    statuses: HashMap<StudentId, AttentivenessStatus>,
    phase: Phase,
    faces_in_view: usize,
}

impl SessionState {
    /// Seed every enrolled student as `absent`.
    pub fn new<I, S>(id: Uuid, students: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StudentId>,
    {
        let statuses = students
            .into_iter()
            .map(|s| (s.into(), AttentivenessStatus::Absent))
            .collect();
        Self {
            id,
            statuses,
            phase: Phase::Live,
            faces_in_view: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn status_of(&self, student_id: &str) -> Option<AttentivenessStatus> {
        self.statuses.get(student_id).copied()
    }

    pub fn faces_in_view(&self) -> usize {
        self.faces_in_view
    }

    /// Feed one event for one student. Returns the new status.
    pub fn apply(
        &mut self,
        session_id: Uuid,
        student_id: &str,
        event: SessionEvent,
    ) -> Result<AttentivenessStatus, Rejection> {
        if session_id != self.id {
            return Err(Rejection::StaleSession(session_id));
        }
        match (self.phase, event) {
            (Phase::Live, _) | (Phase::Stopped, SessionEvent::Override(_)) => {}
            _ => return Err(Rejection::Frozen),
        }

        let current = self
            .statuses
            .get_mut(student_id)
            .ok_or_else(|| Rejection::UnknownStudent(student_id.to_string()))?;
        let next = transition(*current, event)?;
        *current = next;
        Ok(next)
    }

    /// Fold one frame's verdict in, in observation order.
    pub fn apply_verdict(&mut self, session_id: Uuid, verdict: &FrameVerdict) -> ApplySummary {
        let mut summary = ApplySummary::default();

        if session_id == self.id && self.phase == Phase::Live {
            self.faces_in_view = verdict.faces_detected;
        }

        for observation in &verdict.observations {
            match self.apply(
                session_id,
                &observation.student_id,
                SessionEvent::Observed(observation.status),
            ) {
                Ok(_) => summary.applied += 1,
                Err(rejection) => {
                    summary.discarded += 1;
                    tracing::debug!(student = %observation.student_id, %rejection, "observation discarded");
                }
            }
        }

        summary
    }

    /// End capture. Idempotent; a saved session stays saved.
    pub fn stop(&mut self) {
        if self.phase == Phase::Live {
            self.phase = Phase::Stopped;
            self.faces_in_view = 0;
        }
    }

    pub fn mark_saved(&mut self) {
        self.stop();
        self.phase = Phase::Saved;
    }

    /// Ordered copy of the statuses.
    pub fn snapshot(&self) -> BTreeMap<StudentId, AttentivenessStatus> {
        self.statuses
            .iter()
            .map(|(id, status)| (id.clone(), *status))
            .collect()
    }

    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            total: self.statuses.len(),
            ..Default::default()
        };
        for status in self.statuses.values() {
            match status {
                AttentivenessStatus::Present => summary.present += 1,
                AttentivenessStatus::Absent => summary.absent += 1,
                AttentivenessStatus::Sleepy => summary.sleepy += 1,
                AttentivenessStatus::Talking => summary.talking += 1,
                AttentivenessStatus::NotAttentive => summary.not_attentive += 1,
            }
        }
        if summary.total > 0 {
            summary.present_pct =
                (summary.present as f64 * 100.0 / summary.total as f64).round() as u32;
        }
        summary
    }
}
