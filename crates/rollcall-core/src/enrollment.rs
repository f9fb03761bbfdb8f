//! Enrollment: reference photos → per-session face signatures.
//!
//! Building never fails as a whole. Every student that cannot yield a
//! signature is reported as a [`CoverageNote`] and simply won't be
//! recognized during the session.

use crate::provider::FaceProvider;
use crate::types::{FaceSignature, FeatureVector, Student, StudentId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_ENROLLMENT_WORKERS: usize = 4;

/// Why a student is missing from the signature set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum CoverageGap {
    NoPhoto,
    PhotoUnreadable(String),
    NoFaceDetected,
    ProviderFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CoverageNote {
    pub student_id: StudentId,
    pub gap: CoverageGap,
}

/// Signatures for one session plus the students left uncovered.
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    pub signatures: Vec<FaceSignature>,
    pub notes: Vec<CoverageNote>,
}

impl Enrollment {
    pub fn covers(&self, student_id: &str) -> bool {
        self.signatures.iter().any(|s| s.student_id == student_id)
    }
}

/// Signatures keyed by student and the SHA-256 of the photo they came from.
///
/// A changed photo produces a different digest, so stale entries are never
/// served.
#[derive(Debug, Default)]
pub struct SignatureCache {
    entries: Mutex<HashMap<StudentId, (String, FeatureVector)>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, student_id: &str, digest: &str) -> Option<FeatureVector> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(student_id)
            .filter(|(cached_digest, _)| cached_digest == digest)
            .map(|(_, descriptor)| descriptor.clone())
    }

    pub fn insert(&self, student_id: &str, digest: String, descriptor: FeatureVector) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(student_id.to_string(), (digest, descriptor));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the signature set for a session.
pub struct EnrollmentBuilder<P: FaceProvider + ?Sized> {
    provider: Arc<P>,
    workers: usize,
    cache: Option<Arc<SignatureCache>>,
}

impl<P: FaceProvider + ?Sized + 'static> EnrollmentBuilder<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            workers: DEFAULT_ENROLLMENT_WORKERS,
            cache: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn cache(mut self, cache: Arc<SignatureCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Extract one signature per student whose photo shows a detectable face.
    ///
    /// Each extraction runs as a blocking task; at most `workers` of them
    /// are in flight at once. Students without a photo never reach the
    /// provider. Signatures come back in input order.
    pub async fn build(&self, students: &[Student]) -> Enrollment {
        let mut enrollment = Enrollment::default();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        for (idx, student) in students.iter().enumerate() {
            let Some(photo) = student.photo.clone() else {
                enrollment.notes.push(CoverageNote {
                    student_id: student.id.clone(),
                    gap: CoverageGap::NoPhoto,
                });
                continue;
            };

            let provider = Arc::clone(&self.provider);
            let cache = self.cache.clone();
            let semaphore = Arc::clone(&semaphore);
            let student_id = student.id.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let id = student_id.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    enroll_one(provider.as_ref(), cache.as_deref(), &id, &photo)
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(student = %student_id, error = %e, "extraction task failed");
                    Err(CoverageNote {
                        student_id: student_id.clone(),
                        gap: CoverageGap::ProviderFailed(format!("extraction task failed: {e}")),
                    })
                });
                (idx, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "enrollment task join error"),
            }
        }
        outcomes.sort_by_key(|(idx, _)| *idx);

        for (_, outcome) in outcomes {
            match outcome {
                Ok(signature) => enrollment.signatures.push(signature),
                Err(note) => enrollment.notes.push(note),
            }
        }

        tracing::info!(
            students = students.len(),
            signatures = enrollment.signatures.len(),
            uncovered = enrollment.notes.len(),
            "enrollment complete"
        );

        enrollment
    }
}

fn enroll_one<P: FaceProvider + ?Sized>(
    provider: &P,
    cache: Option<&SignatureCache>,
    student_id: &str,
    photo: &Path,
) -> Result<FaceSignature, CoverageNote> {
    let gap = |gap: CoverageGap| {
        tracing::warn!(student = student_id, photo = %photo.display(), ?gap, "student not enrolled");
        CoverageNote {
            student_id: student_id.to_string(),
            gap,
        }
    };

    let bytes = std::fs::read(photo).map_err(|e| gap(CoverageGap::PhotoUnreadable(e.to_string())))?;

    let digest = cache.map(|_| photo_digest(&bytes));
    if let (Some(cache), Some(digest)) = (cache, digest.as_deref()) {
        if let Some(descriptor) = cache.get(student_id, digest) {
            tracing::debug!(student = student_id, "signature served from cache");
            return Ok(FaceSignature {
                student_id: student_id.to_string(),
                descriptor,
            });
        }
    }

    let image = image::load_from_memory(&bytes)
        .map_err(|e| gap(CoverageGap::PhotoUnreadable(e.to_string())))?
        .to_luma8();

    let detection = provider
        .detect_single(&image)
        .map_err(|e| gap(CoverageGap::ProviderFailed(e.to_string())))?
        .ok_or_else(|| gap(CoverageGap::NoFaceDetected))?;

    if let (Some(cache), Some(digest)) = (cache, digest) {
        cache.insert(student_id, digest, detection.descriptor.clone());
    }

    Ok(FaceSignature {
        student_id: student_id.to_string(),
        descriptor: detection.descriptor,
    })
}

/// Lowercase hex SHA-256 of the photo bytes.
pub fn photo_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::provider::{FaceProvider, ProviderError};
    use crate::types::{BoundingBox, Detection, Expressions, FeatureVector};
    use image::{GrayImage, Luma};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider that derives a descriptor from the image's top-left pixel.
    /// Pixel value 0 means "no face".
    #[derive(Default)]
    pub struct PixelProvider {
        pub single_calls: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        in_flight: AtomicUsize,
        delay: Duration,
    }

    impl PixelProvider {
        pub fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        pub fn descriptor_for(value: u8) -> FeatureVector {
            FeatureVector::new(vec![value as f32 / 10.0, 0.0])
        }
    }

    impl FaceProvider for PixelProvider {
        fn detect_single(&self, image: &GrayImage) -> Result<Option<Detection>, ProviderError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let value = image.get_pixel(0, 0).0[0];
            if value == 0 {
                return Ok(None);
            }
            if value == 255 {
                return Err(ProviderError::Unavailable("model offline".into()));
            }
            Ok(Some(Detection {
                bbox: BoundingBox::default(),
                landmarks: Vec::new(),
                expressions: Expressions::default(),
                descriptor: Self::descriptor_for(value),
            }))
        }

        fn detect_all(&self, _frame: &GrayImage) -> Result<Vec<Detection>, ProviderError> {
            Ok(Vec::new())
        }
    }

    /// Write a 4x4 PNG whose pixels are all `value`.
    pub fn write_photo(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(4, 4, Luma([value]))
            .save(&path)
            .expect("write fixture photo");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{write_photo, PixelProvider};
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn student(id: &str, photo: Option<std::path::PathBuf>) -> Student {
        Student {
            id: id.into(),
            name: format!("Student {id}"),
            reg_no: format!("CS{id}"),
            class: "CSE-A".into(),
            photo,
        }
    }

    #[tokio::test]
    async fn test_students_without_photo_never_reach_provider() {
        let provider = Arc::new(PixelProvider::default());
        let students = vec![student("s1", None), student("s2", None)];
        let enrollment = EnrollmentBuilder::new(provider.clone()).build(&students).await;

        assert!(enrollment.signatures.is_empty());
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 0);
        assert!(enrollment.notes.iter().all(|n| n.gap == CoverageGap::NoPhoto));
    }

    #[tokio::test]
    async fn test_gaps_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();

        let students = vec![
            student("ok", Some(write_photo(dir.path(), "ok.png", 30))),
            student("blank", Some(write_photo(dir.path(), "blank.png", 0))),
            student("offline", Some(write_photo(dir.path(), "offline.png", 255))),
            student("missing", Some(dir.path().join("missing.png"))),
            student("garbage", Some(garbage)),
            student("none", None),
        ];

        let provider = Arc::new(PixelProvider::default());
        let enrollment = EnrollmentBuilder::new(provider).workers(3).build(&students).await;

        assert_eq!(enrollment.signatures.len(), 1);
        assert_eq!(enrollment.signatures[0].student_id, "ok");
        assert_eq!(enrollment.signatures[0].descriptor, PixelProvider::descriptor_for(30));
        assert_eq!(enrollment.notes.len(), 5);

        let gap_of = |id: &str| {
            enrollment
                .notes
                .iter()
                .find(|n| n.student_id == id)
                .map(|n| n.gap.clone())
                .unwrap()
        };
        assert_eq!(gap_of("blank"), CoverageGap::NoFaceDetected);
        assert!(matches!(gap_of("offline"), CoverageGap::ProviderFailed(_)));
        assert!(matches!(gap_of("missing"), CoverageGap::PhotoUnreadable(_)));
        assert!(matches!(gap_of("garbage"), CoverageGap::PhotoUnreadable(_)));
        assert_eq!(gap_of("none"), CoverageGap::NoPhoto);
    }

    #[tokio::test]
    async fn test_one_signature_per_student_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let students: Vec<Student> = (1..=9)
            .map(|i| {
                let name = format!("p{i}.png");
                student(&format!("s{i}"), Some(write_photo(dir.path(), &name, i * 10)))
            })
            .collect();

        let provider = Arc::new(PixelProvider::default());
        let enrollment = EnrollmentBuilder::new(provider).workers(4).build(&students).await;

        let ids: Vec<_> = enrollment.signatures.iter().map(|s| s.student_id.clone()).collect();
        let expected: Vec<_> = (1..=9).map(|i| format!("s{i}")).collect();
        assert_eq!(ids, expected);
        assert!(enrollment.notes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_extractions_bounded_by_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let students: Vec<Student> = (1..=8)
            .map(|i| {
                let name = format!("p{i}.png");
                student(&format!("s{i}"), Some(write_photo(dir.path(), &name, i * 10)))
            })
            .collect();

        let provider = Arc::new(PixelProvider::slow(Duration::from_millis(30)));
        let enrollment = EnrollmentBuilder::new(provider.clone())
            .workers(2)
            .build(&students)
            .await;

        assert_eq!(enrollment.signatures.len(), 8);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 8);
        let peak = provider.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "{peak} extractions ran at once");
    }

    #[tokio::test]
    async fn test_cache_skips_provider_for_unchanged_photo() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("s1", Some(write_photo(dir.path(), "s1.png", 40)))];
        let provider = Arc::new(PixelProvider::default());
        let cache = Arc::new(SignatureCache::new());

        let first = EnrollmentBuilder::new(provider.clone())
            .cache(cache.clone())
            .build(&students)
            .await;
        let second = EnrollmentBuilder::new(provider.clone())
            .cache(cache.clone())
            .build(&students)
            .await;

        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.signatures, second.signatures);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_misses_when_photo_changes() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("s1", Some(write_photo(dir.path(), "s1.png", 40)))];
        let provider = Arc::new(PixelProvider::default());
        let cache = Arc::new(SignatureCache::new());

        EnrollmentBuilder::new(provider.clone())
            .cache(cache.clone())
            .build(&students)
            .await;
        write_photo(dir.path(), "s1.png", 50);
        let rebuilt = EnrollmentBuilder::new(provider.clone())
            .cache(cache)
            .build(&students)
            .await;

        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 2);
        assert_eq!(rebuilt.signatures[0].descriptor, PixelProvider::descriptor_for(50));
    }

    #[test]
    fn test_photo_digest_is_hex_sha256() {
        let digest = photo_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
