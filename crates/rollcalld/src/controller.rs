//! Session controller: drives one live attendance session at a time.
//!
//! Start acquires the capture source, seeds the session and spawns the
//! session loop. The loop builds signatures, then runs one tick per
//! interval: capture a frame, detect, classify, fold into the state.
//! At most one detection is in flight: a tick that outlives its timeout
//! is abandoned, its result is never applied, and later ticks are dropped
//! until the abandoned detection has returned.

use chrono::NaiveDate;
use rollcall_core::persistence::{save_session, AttendanceStore, SaveRequest, StudentDirectory};
use rollcall_core::session::Rejection;
use rollcall_core::timetable::TimetableError;
use rollcall_core::{
    AttentivenessStatus, CoverageNote, EnrollmentBuilder, EuclideanMatcher, FaceProvider,
    FaceSignature, FrameClassifier, FrameVerdict, Phase, ProviderError, SaveError, SessionEvent,
    SessionState, SignatureCache, StatusSummary, StoreError, Student, StudentId, Timetable,
    UpsertReport,
};
use rollcall_hw::{CaptureError, CaptureSource, FrameError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("no session has been started")]
    NoSession,
    #[error("period {0} is a free period; attendance is disabled")]
    FreePeriod(u32),
    #[error(transparent)]
    Timetable(#[from] TimetableError),
    #[error("capture source unavailable: {0}")]
    Capture(#[from] CaptureError),
    #[error("student directory error: {0}")]
    Directory(#[source] StoreError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("background task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
enum TickError {
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("detection: {0}")]
    Provider(#[from] ProviderError),
    #[error("tick task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub tick_interval: Duration,
    pub tick_timeout: Duration,
    pub match_threshold: f32,
    pub enrollment_workers: usize,
    pub signature_cache: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1500),
            tick_timeout: Duration::from_secs(5),
            match_threshold: rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD,
            enrollment_workers: rollcall_core::enrollment::DEFAULT_ENROLLMENT_WORKERS,
            signature_cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub period: u32,
    /// Class/section whose students are enrolled; everyone when `None`.
    pub class: Option<String>,
}

/// Outcome of enrollment, known once the session loop has built signatures.
#[derive(Debug, Clone, Serialize)]
pub struct Coverage {
    pub signatures: usize,
    pub notes: Vec<CoverageNote>,
}

/// Point-in-time view of the current (or last) session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub period: u32,
    pub class: Option<String>,
    pub phase: Phase,
    pub faces_in_view: usize,
    /// `None` while signatures are still being built.
    pub coverage: Option<Coverage>,
    pub summary: StatusSummary,
    pub students: BTreeMap<StudentId, AttentivenessStatus>,
}

struct ActiveSession {
    period: u32,
    class: Option<String>,
    state: Mutex<SessionState>,
    coverage: Mutex<Option<Coverage>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type SharedCapture = Arc<Mutex<Box<dyn CaptureSource>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn task_err(e: tokio::task::JoinError) -> ControllerError {
    ControllerError::Task(e.to_string())
}

pub struct SessionController {
    capture: SharedCapture,
    provider: Arc<dyn FaceProvider>,
    directory: Arc<dyn StudentDirectory>,
    store: Arc<dyn AttendanceStore>,
    timetable: Arc<Timetable>,
    settings: ControllerSettings,
    cache: Option<Arc<SignatureCache>>,
    session: Option<Arc<ActiveSession>>,
    running: Option<Running>,
}

impl SessionController {
    pub fn new(
        capture: Box<dyn CaptureSource>,
        provider: Arc<dyn FaceProvider>,
        directory: Arc<dyn StudentDirectory>,
        store: Arc<dyn AttendanceStore>,
        timetable: Timetable,
        settings: ControllerSettings,
    ) -> Self {
        let cache = settings
            .signature_cache
            .then(|| Arc::new(SignatureCache::new()));
        Self {
            capture: Arc::new(Mutex::new(capture)),
            provider,
            directory,
            store,
            timetable: Arc::new(timetable),
            settings,
            cache,
            session: None,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start a session for `request.period`.
    ///
    /// Fails without side effects when the period is free or unknown, the
    /// directory cannot be read, or the capture source will not start.
    pub async fn start(&mut self, request: StartRequest) -> Result<Uuid, ControllerError> {
        if self.running.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        if self.timetable.is_free(request.period)? {
            return Err(ControllerError::FreePeriod(request.period));
        }

        let directory = self.directory.clone();
        let class = request.class.clone();
        let students = tokio::task::spawn_blocking(move || directory.enrolled_students(class.as_deref()))
            .await
            .map_err(task_err)?
            .map_err(ControllerError::Directory)?;

        let capture = self.capture.clone();
        tokio::task::spawn_blocking(move || lock(&capture).start())
            .await
            .map_err(task_err)??;

        if let Some(previous) = &self.session {
            let state = lock(&previous.state);
            if state.phase() == Phase::Stopped {
                tracing::warn!(session = %state.id(), "discarding unsaved session");
            }
        }

        let session_id = Uuid::new_v4();
        let session = Arc::new(ActiveSession {
            period: request.period,
            class: request.class,
            state: Mutex::new(SessionState::new(
                session_id,
                students.iter().map(|s| s.id.clone()),
            )),
            coverage: Mutex::new(None),
        });

        let cancel = CancellationToken::new();
        let ctx = TickContext {
            session: session.clone(),
            session_id,
            capture: self.capture.clone(),
            provider: self.provider.clone(),
            classifier: Arc::new(FrameClassifier::new(EuclideanMatcher::new(
                self.settings.match_threshold,
            ))),
            tick_timeout: self.settings.tick_timeout,
        };
        let enroll = EnrollJob {
            students,
            workers: self.settings.enrollment_workers,
            cache: self.cache.clone(),
        };
        let handle = tokio::spawn(session_loop(
            ctx,
            enroll,
            self.settings.tick_interval,
            cancel.clone(),
        ));

        tracing::info!(
            session = %session_id,
            period = request.period,
            enrolled = lock(&session.state).len(),
            "session started"
        );
        self.session = Some(session);
        self.running = Some(Running { cancel, handle });
        Ok(session_id)
    }

    /// Stop ticking, release the capture source and freeze the session.
    pub async fn stop(&mut self) -> Result<StatusSummary, ControllerError> {
        let session = self.session.clone().ok_or(ControllerError::NoSession)?;
        self.halt().await;

        let mut state = lock(&session.state);
        state.stop();
        tracing::info!(session = %state.id(), "session stopped");
        Ok(state.summary())
    }

    /// Persist the session for `date`, stopping it first if it is running.
    ///
    /// A partial failure leaves the session unsaved so it can be retried.
    pub async fn save(
        &mut self,
        date: NaiveDate,
        recorded_by: &str,
    ) -> Result<UpsertReport, ControllerError> {
        let session = self.session.clone().ok_or(ControllerError::NoSession)?;
        if self.running.is_some() {
            self.stop().await?;
        }

        let state = lock(&session.state).clone();
        let request = SaveRequest {
            date,
            period: session.period,
            recorded_by: recorded_by.to_string(),
        };
        let store = self.store.clone();
        let timetable = self.timetable.clone();
        let report = tokio::task::spawn_blocking(move || {
            save_session(store.as_ref(), &timetable, &state, &request)
        })
        .await
        .map_err(task_err)??;

        lock(&session.state).mark_saved();
        Ok(report)
    }

    /// Instructor correction for one student. Accepted until the session is saved.
    pub fn override_status(
        &self,
        student_id: &str,
        status: AttentivenessStatus,
    ) -> Result<AttentivenessStatus, ControllerError> {
        let session = self.session.as_ref().ok_or(ControllerError::NoSession)?;
        let mut state = lock(&session.state);
        let id = state.id();
        let applied = state.apply(id, student_id, SessionEvent::Override(status))?;
        tracing::info!(session = %id, student = student_id, %status, "status overridden");
        Ok(applied)
    }

    pub fn status(&self) -> Option<SessionStatus> {
        let session = self.session.as_ref()?;
        let coverage = lock(&session.coverage).clone();
        let state = lock(&session.state);
        Some(SessionStatus {
            session_id: state.id(),
            period: session.period,
            class: session.class.clone(),
            phase: state.phase(),
            faces_in_view: state.faces_in_view(),
            coverage,
            summary: state.summary(),
            students: state.snapshot(),
        })
    }

    /// Stop any running session; used on daemon shutdown.
    pub async fn shutdown(&mut self) {
        if self.running.is_some() {
            if let Err(e) = self.stop().await {
                tracing::warn!(error = %e, "stop during shutdown failed");
            }
        } else {
            self.halt().await;
        }
    }

    async fn halt(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!(error = %e, "session loop ended abnormally");
            }
        }

        let capture = self.capture.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || lock(&capture).stop()).await {
            tracing::warn!(error = %e, "releasing capture source failed");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.handle.abort();
        }
        // An abandoned tick may still hold the capture; don't block a runtime thread on it.
        match self.capture.try_lock() {
            Ok(mut capture) => capture.stop(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().stop(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("capture busy during teardown; releasing it in the background");
                let capture = self.capture.clone();
                std::thread::spawn(move || lock(&capture).stop());
            }
        }
    }
}

struct TickContext {
    session: Arc<ActiveSession>,
    session_id: Uuid,
    capture: SharedCapture,
    provider: Arc<dyn FaceProvider>,
    classifier: Arc<FrameClassifier<EuclideanMatcher>>,
    tick_timeout: Duration,
}

struct EnrollJob {
    students: Vec<Student>,
    workers: usize,
    cache: Option<Arc<SignatureCache>>,
}

async fn session_loop(
    ctx: TickContext,
    job: EnrollJob,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut builder = EnrollmentBuilder::new(ctx.provider.clone()).workers(job.workers);
    if let Some(cache) = job.cache {
        builder = builder.cache(cache);
    }

    let enrollment = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(session = %ctx.session_id, "session stopped during enrollment");
            return;
        }
        enrollment = builder.build(&job.students) => enrollment,
    };

    tracing::info!(
        session = %ctx.session_id,
        signatures = enrollment.signatures.len(),
        gaps = enrollment.notes.len(),
        "enrollment complete"
    );
    *lock(&ctx.session.coverage) = Some(Coverage {
        signatures: enrollment.signatures.len(),
        notes: enrollment.notes,
    });
    let signatures = Arc::new(enrollment.signatures);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut abandoned: Option<PendingTick> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(previous) = &abandoned {
            if !previous.is_finished() {
                tracing::debug!(session = %ctx.session_id, "detection still in flight; tick dropped");
                continue;
            }
            // Its verdict belongs to a timed-out tick.
            abandoned = None;
        }

        let mut detection = spawn_detection(&ctx, &signatures);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = tokio::time::timeout(ctx.tick_timeout, &mut detection) => outcome,
        };

        match outcome {
            Ok(joined) => {
                let verdict = joined
                    .map_err(|e| TickError::Task(e.to_string()))
                    .and_then(|verdict| verdict);
                match verdict {
                    Ok(verdict) => {
                        let summary = lock(&ctx.session.state).apply_verdict(ctx.session_id, &verdict);
                        tracing::trace!(
                            session = %ctx.session_id,
                            applied = summary.applied,
                            discarded = summary.discarded,
                            "tick applied"
                        );
                    }
                    Err(e) => tracing::warn!(session = %ctx.session_id, error = %e, "tick failed; skipping"),
                }
            }
            Err(_) => {
                tracing::warn!(
                    session = %ctx.session_id,
                    timeout_ms = ctx.tick_timeout.as_millis() as u64,
                    "tick timed out; skipping"
                );
                abandoned = Some(detection);
            }
        }
    }

    tracing::debug!(session = %ctx.session_id, "session loop exiting");
}

type PendingTick = JoinHandle<Result<FrameVerdict, TickError>>;

/// Capture one frame and classify it on the blocking pool.
fn spawn_detection(ctx: &TickContext, signatures: &Arc<Vec<FaceSignature>>) -> PendingTick {
    let capture = ctx.capture.clone();
    let provider = ctx.provider.clone();
    let classifier = ctx.classifier.clone();
    let signatures = signatures.clone();

    tokio::task::spawn_blocking(move || {
        let frame = lock(&capture).capture()?;
        let image = frame.to_gray_image()?;
        let detections = provider.detect_all(&image)?;
        Ok(classifier.classify_frame(&detections, &signatures))
    })
}
