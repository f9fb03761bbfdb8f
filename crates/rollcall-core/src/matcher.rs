//! Identity matching of a probe descriptor against the session's signatures.

use crate::types::{FaceSignature, FeatureVector, StudentId};

/// Distance below which a probe is accepted as the nearest signature's owner.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a probe descriptor against a signature set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the nearest signature (`f32::INFINITY` if none comparable).
    pub distance: f32,
    /// Student owning the matched signature (if any).
    pub student_id: Option<StudentId>,
}

impl MatchResult {
    fn unmatched(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            student_id: None,
        }
    }
}

/// Strategy for comparing a probe against the enrolled signatures.
pub trait Matcher: Send + Sync {
    fn compare(&self, probe: &FeatureVector, signatures: &[FaceSignature]) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The threshold is exclusive: a probe at exactly `threshold` does not match.
/// Ties go to the first signature in set order. Signatures whose
/// dimensionality differs from the probe are skipped.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &FeatureVector, signatures: &[FaceSignature]) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, signature) in signatures.iter().enumerate() {
            let Some(dist) = probe.euclidean_distance(&signature.descriptor) else {
                tracing::trace!(
                    student = %signature.student_id,
                    probe_dim = probe.dim(),
                    signature_dim = signature.descriptor.dim(),
                    "skipping signature with mismatched dimensionality"
                );
                continue;
            };
            // Strict `<` keeps the first of equidistant signatures.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < self.threshold => MatchResult {
                matched: true,
                distance: best_dist,
                student_id: Some(signatures[idx].student_id.clone()),
            },
            _ => MatchResult::unmatched(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(id: &str, values: Vec<f32>) -> FaceSignature {
        FaceSignature {
            student_id: id.into(),
            descriptor: FeatureVector::new(values),
        }
    }

    #[test]
    fn test_nearest_signature_wins() {
        let probe = FeatureVector::new(vec![1.0, 0.0, 0.0]);
        let signatures = vec![
            sig("far", vec![0.0, 1.0, 0.0]),
            sig("near", vec![0.9, 0.0, 0.0]),
            sig("mid", vec![0.5, 0.0, 0.0]),
        ];
        let result = EuclideanMatcher::default().compare(&probe, &signatures);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("near"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_just_inside_matches() {
        let probe = FeatureVector::new(vec![0.59, 0.0]);
        let signatures = vec![sig("a", vec![0.0, 0.0])];
        let result = EuclideanMatcher::default().compare(&probe, &signatures);
        assert!(result.matched);
        assert_eq!(result.student_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_threshold_just_outside_does_not_match() {
        let probe = FeatureVector::new(vec![0.61, 0.0]);
        let signatures = vec![sig("a", vec![0.0, 0.0])];
        let result = EuclideanMatcher::default().compare(&probe, &signatures);
        assert!(!result.matched);
        assert!(result.student_id.is_none());
        assert!((result.distance - 0.61).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let probe = FeatureVector::new(vec![0.5, 0.0]);
        let signatures = vec![sig("a", vec![0.0, 0.0])];
        let result = EuclideanMatcher::new(0.5).compare(&probe, &signatures);
        assert!(!result.matched);
    }

    #[test]
    fn test_tie_resolves_to_first_signature() {
        let probe = FeatureVector::new(vec![0.0, 0.0]);
        let signatures = vec![sig("first", vec![0.1, 0.0]), sig("second", vec![0.0, 0.1])];
        let result = EuclideanMatcher::default().compare(&probe, &signatures);
        assert_eq!(result.student_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_signature_set() {
        let probe = FeatureVector::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher::default().compare(&probe, &[]);
        assert!(!result.matched);
        assert_eq!(result.distance, f32::INFINITY);
    }

    #[test]
    fn test_mismatched_dimensions_are_skipped() {
        let probe = FeatureVector::new(vec![0.0, 0.0]);
        let signatures = vec![sig("wrong-dim", vec![0.0, 0.0, 0.0]), sig("ok", vec![0.2, 0.0])];
        let result = EuclideanMatcher::default().compare(&probe, &signatures);
        assert_eq!(result.student_id.as_deref(), Some("ok"));
    }
}
